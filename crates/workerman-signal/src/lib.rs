//! # Workerman Signal
//!
//! Signal plumbing for the supervisor. POSIX handlers only enqueue; the
//! master drains the queue cooperatively between reap attempts and the
//! worker receives dispatch through its event loop. Nothing runs in signal
//! context beyond signal-hook's own enqueueing.

use std::io;

use mio::{Interest, Registry, Token};
use signal_hook::consts::signal::{
    SIGABRT, SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGTSTP, SIGUSR1, SIGUSR2,
};
use signal_hook::iterator::Signals;
use tracing::trace;

/// Signals the master installs. SIGABRT is the IOT status-collection
/// signal.
pub const MASTER_SIGNALS: &[i32] = &[
    SIGINT, SIGTERM, SIGHUP, SIGTSTP, SIGQUIT, SIGUSR1, SIGUSR2, SIGABRT,
];

/// Signals each worker installs after the fork.
pub const WORKER_SIGNALS: &[i32] = &[
    SIGINT, SIGTERM, SIGHUP, SIGTSTP, SIGQUIT, SIGUSR1, SIGUSR2, SIGABRT,
];

/// Operator command decoded from a signal delivered to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterAction {
    StopHard,
    StopGraceful,
    ReloadHard,
    ReloadGraceful,
    CollectStatus,
}

/// Decodes a master-side control signal.
pub fn master_action(signal: i32) -> Option<MasterAction> {
    match signal {
        SIGINT | SIGTERM | SIGHUP | SIGTSTP => Some(MasterAction::StopHard),
        SIGQUIT => Some(MasterAction::StopGraceful),
        SIGUSR1 => Some(MasterAction::ReloadHard),
        SIGUSR2 => Some(MasterAction::ReloadGraceful),
        SIGABRT => Some(MasterAction::CollectStatus),
        _ => None,
    }
}

/// Command decoded from a signal delivered to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    StopHard,
    StopGraceful,
    WriteStatus,
}

/// Decodes a worker-side signal.
pub fn worker_action(signal: i32) -> Option<WorkerAction> {
    match signal {
        SIGINT | SIGTERM | SIGHUP | SIGTSTP | SIGUSR1 => Some(WorkerAction::StopHard),
        SIGQUIT | SIGUSR2 => Some(WorkerAction::StopGraceful),
        SIGABRT => Some(WorkerAction::WriteStatus),
        _ => None,
    }
}

/// Cooperative signal queue for the master's monitor loop.
///
/// Handlers enqueue; `drain` returns everything pending since the last
/// drain, in delivery order.
pub struct SignalBus {
    signals: Signals,
}

impl SignalBus {
    /// Installs handlers for the given signal set.
    pub fn install(set: &[i32]) -> io::Result<Self> {
        let signals = Signals::new(set.iter().copied())?;
        Ok(Self { signals })
    }

    /// Returns the pending signals without blocking.
    pub fn drain(&mut self) -> Vec<i32> {
        let pending: Vec<i32> = self.signals.pending().collect();
        if !pending.is_empty() {
            trace!(?pending, "drained signal queue");
        }
        pending
    }

    /// Uninstalls the handlers. A forked child calls this before setting up
    /// its own worker signal source.
    pub fn close(&self) {
        self.signals.handle().close();
    }
}

/// Worker-side signal source, registered on the worker's event loop.
pub struct WorkerSignalSource {
    signals: signal_hook_mio::v1_0::Signals,
}

impl WorkerSignalSource {
    /// Installs handlers for the given signal set.
    pub fn install(set: &[i32]) -> io::Result<Self> {
        let signals = signal_hook_mio::v1_0::Signals::new(set.iter().copied())?;
        Ok(Self { signals })
    }

    /// Registers the source for readability on the event loop registry.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.signals, token, Interest::READABLE)
    }

    /// Returns the pending signals without blocking. Called when the event
    /// loop reports the source readable.
    pub fn drain(&mut self) -> Vec<i32> {
        self.signals.pending().collect()
    }
}
