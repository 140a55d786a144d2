//! The `Workerman` facade: wires configuration, listeners, and output
//! sinks, and dispatches one of the four operator commands.

use std::path::PathBuf;
use std::sync::Arc;

use workerman_common::Result;
use workerman_net::{Listener, ServerCallbacks};

use crate::config::{ListenerConfig, ServerConfig};
use crate::context::{RuntimeContext, DEFAULT_NAME};
use crate::controller::Controller;
use crate::output::{ConsoleSink, Output, OutputSink, TracingSink};

/// One operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start { daemon: bool },
    Stop { graceful: bool },
    Restart { graceful: bool },
    Status { info: bool },
}

/// The configured server: listener set, process name, stderr path, and the
/// two output sink lists.
pub struct Workerman {
    name: String,
    working_dir: PathBuf,
    std_error_path: Option<PathBuf>,
    listeners: Vec<Listener>,
    sinks: Vec<Arc<dyn OutputSink>>,
    daemon_sinks: Vec<Arc<dyn OutputSink>>,
}

impl Workerman {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            working_dir: working_dir.into(),
            std_error_path: None,
            listeners: Vec::new(),
            sinks: vec![Arc::new(ConsoleSink)],
            daemon_sinks: vec![Arc::new(TracingSink)],
        }
    }

    /// Builds a facade from a loaded configuration, asking `callbacks` for
    /// each listener's application callbacks.
    pub fn from_config<F>(config: &ServerConfig, callbacks: F) -> Self
    where
        F: Fn(&ListenerConfig) -> ServerCallbacks,
    {
        let mut facade = Self::new(&config.path);
        facade.name = config.name.clone();
        facade.std_error_path = config.std_error_path.clone();
        facade.listeners = config.build_listeners(callbacks);
        facade
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_std_error_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.std_error_path = Some(path.into());
        self
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replaces the general sink list.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Replaces the post-daemonize sink list.
    pub fn with_daemon_sinks(mut self, sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        self.daemon_sinks = sinks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Dispatches one command. `Start` in the foreground blocks for the
    /// master's lifetime; everything else returns when the controller has
    /// finished.
    pub fn run(self, command: Command) -> Result<()> {
        let output = Output::new(self.sinks, self.daemon_sinks);
        let ctx = RuntimeContext::new(self.name, self.working_dir, self.std_error_path, output);
        let controller = Controller::new(ctx);
        match command {
            Command::Start { daemon } => controller.start(self.listeners, daemon),
            Command::Stop { graceful } => controller.stop(graceful),
            Command::Restart { graceful } => controller.restart(graceful),
            Command::Status { info } => controller.status(info).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use workerman_net::Transport;

    #[test]
    fn test_facade_wiring() {
        let facade = Workerman::new("/tmp/wm")
            .with_name("echo")
            .with_std_error_path("/tmp/wm/stderr.log")
            .with_listener(Listener::new(Transport::Tcp, "127.0.0.1:0").with_name("echo"));
        assert_eq!(facade.name(), "echo");
        assert_eq!(facade.listeners().len(), 1);
    }

    #[test]
    fn test_stop_without_master_is_lifecycle_error() {
        let tmp = TempDir::new().unwrap();
        let err = Workerman::new(tmp.path())
            .run(Command::Stop { graceful: false })
            .unwrap_err();
        assert!(err.is_lifecycle());
    }
}
