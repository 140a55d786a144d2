//! YAML configuration for the server binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use workerman_common::{Error, Result};
use workerman_net::{Listener, Protocol, ServerCallbacks, SocketContext, Transport};

use crate::context::DEFAULT_NAME;

/// Top-level configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Process name; appears in process titles and the status table.
    #[serde(default = "default_name")]
    pub name: String,

    /// Working directory holding the rendezvous files.
    pub path: PathBuf,

    /// Where the master's stderr goes in daemon mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_error_path: Option<PathBuf>,

    pub listeners: Vec<ListenerConfig>,
}

/// One listening address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub name: String,
    pub transport: Transport,
    pub address: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub reuse_port: bool,
    #[serde(default)]
    pub context: SocketContext,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_protocol() -> Protocol {
    Protocol::Raw
}

fn default_worker_count() -> usize {
    1
}

impl ServerConfig {
    /// Loads the configuration from a YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::file_io(path, format!("invalid configuration: {e}")))
    }

    /// Builds the listener set, asking `callbacks` for each listener's
    /// application callbacks.
    pub fn build_listeners<F>(&self, callbacks: F) -> Vec<Listener>
    where
        F: Fn(&ListenerConfig) -> ServerCallbacks,
    {
        self.listeners
            .iter()
            .map(|config| {
                Listener::new(config.transport, config.address.clone())
                    .with_name(config.name.clone())
                    .with_protocol(config.protocol)
                    .with_worker_count(config.worker_count)
                    .with_reuse_port(config.reuse_port)
                    .with_context(config.context.clone())
                    .with_callbacks(callbacks(config))
            })
            .collect()
    }
}
