#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed {kind} event: {source}")]
    MalformedEvent {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Execution directory unavailable: {0}")]
    DirectoryUnavailable(String),
}
