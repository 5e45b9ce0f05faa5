//! Task monitor HTTP server library.
//!
//! Exposes config, state, handlers and the router builder so integration
//! tests and the binary entrypoint share them.

pub mod config;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
