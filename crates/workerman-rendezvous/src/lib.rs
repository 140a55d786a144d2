//! # Workerman Rendezvous
//!
//! The file-system rendezvous used for cross-process coordination. All
//! cross-process state other than signals lives in small JSON files under
//! the working directory:
//!
//! - `process.pid`: decimal pid of the master
//! - `status.workerman`: hash list written on a status request
//! - `shutdown.workerman`: hash list written when a graceful stop begins
//! - `restart.workerman`: unix timestamp written after a reload completes
//! - per-process hash files: status payloads and drain stubs, named by the
//!   raw hash string
//!
//! Ownership rule: the process that creates a file owns it; deletion is the
//! signal of completion.

pub mod files;
pub mod poller;
pub mod status;

pub use files::{LockRegistry, RendezvousDir};
pub use poller::{PollOutcome, RendezvousPoller};
pub use status::{StatusId, StatusRow};
