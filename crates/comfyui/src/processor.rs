//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, decodes the
//! `{"type", "data"}` envelope of each text frame and hands the pair to
//! an [`EventHandler`].

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use taskmon_core::events::EventHandler;

use crate::messages::parse_message;

/// Process WebSocket messages until the connection closes, a receive
/// error occurs, or the stream ends.
///
/// Each text frame is handled to completion before the next frame is
/// read, so events reach the handler in arrival order. Binary frames
/// (preview images) are ignored.
pub async fn process_messages<S>(ws_stream: &mut S, handler: &dyn EventHandler)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                dispatch_frame(&text, handler).await;
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!("Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                break;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}

/// Decode one text frame and deliver it. Undecodable frames are logged
/// and skipped.
pub async fn dispatch_frame(text: &str, handler: &dyn EventHandler) {
    match parse_message(text) {
        Ok(msg) => {
            tracing::trace!(event_kind = %msg.kind, "ComfyUI event");
            handler.handle_event(&msg.kind, &msg.data).await;
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
        }
    }
}
