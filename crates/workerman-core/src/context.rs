//! Runtime context threaded through the master, worker, and controller.
//!
//! Gathers what would otherwise be process-global state (the working
//! directory, the process name, the output sinks) into one value
//! constructed by the facade and passed explicitly.

use std::path::PathBuf;

use workerman_rendezvous::{RendezvousDir, RendezvousPoller};

use crate::output::Output;

/// Default process name when the configuration does not set one.
pub const DEFAULT_NAME: &str = "Workerman";

#[derive(Clone)]
pub struct RuntimeContext {
    name: String,
    dir: RendezvousDir,
    std_error_path: Option<PathBuf>,
    output: Output,
    poller: RendezvousPoller,
}

impl RuntimeContext {
    pub fn new(
        name: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        std_error_path: Option<PathBuf>,
        output: Output,
    ) -> Self {
        Self {
            name: name.into(),
            dir: RendezvousDir::new(working_dir),
            std_error_path,
            output,
            poller: RendezvousPoller::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The master process title: `"<name> master"`.
    pub fn master_title(&self) -> String {
        format!("{} master", self.name)
    }

    pub fn dir(&self) -> &RendezvousDir {
        &self.dir
    }

    pub fn std_error_path(&self) -> Option<&PathBuf> {
        self.std_error_path.as_ref()
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn poller(&self) -> &RendezvousPoller {
        &self.poller
    }
}
