//! Domain logic for the workflow task monitor.
//!
//! - [`workflow`]: the submitted node graph and node eligibility.
//! - [`events`]: typed lifecycle events and the [`events::EventHandler`] seam.
//! - [`directory`]: the [`directory::ExecutionDirectory`] seam over the
//!   engine's queue and history.
//! - [`progress`]: the [`progress::TrackedExecution`] aggregate and its fold rules.
//! - [`status`]: the status document served to clients.
//! - [`tracker`]: [`tracker::ProgressTracker`], the lock-guarded aggregate
//!   shared by event delivery and status queries.

pub mod directory;
pub mod error;
pub mod events;
pub mod progress;
pub mod status;
pub mod tracker;
pub mod types;
pub mod workflow;
