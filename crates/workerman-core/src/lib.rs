//! # Workerman Core
//!
//! The process-lifecycle and coordination engine: the master that forks and
//! supervises workers, the worker runtime around the event loop, the
//! short-lived controller the CLI runs, and the facade that wires them to a
//! configuration.
//!
//! POSIX only. Control flows through signals; state flows through the
//! rendezvous files. Master and controller never share memory.

pub mod config;
pub mod context;
pub mod controller;
pub mod daemon;
pub mod facade;
pub mod master;
pub mod memory;
pub mod output;
pub mod proctitle;
pub mod table;
pub mod worker;

pub use config::{ListenerConfig, ServerConfig};
pub use context::RuntimeContext;
pub use workerman_common::{Error, Result};
pub use controller::Controller;
pub use facade::{Command, Workerman};
pub use output::{Output, OutputSink, ProgressEvent};
