//! # Workerman Common
//!
//! Shared types for the workerman supervisor: the domain error enum and the
//! identifier newtypes used across the master, worker, and controller
//! processes.

pub mod errors;
pub mod types;

pub use errors::{Error, Result, ResultExt};
pub use types::{ProcessHash, WorkerId};
