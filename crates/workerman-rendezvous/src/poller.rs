//! Typed polling over the rendezvous directory.
//!
//! The controller coordinates with the master exclusively through file
//! appearance and disappearance. This poller centralizes the cadence (one
//! observation every 200 ms) so the call sites express *what* they wait
//! for, not how.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The awaited condition was observed.
    Satisfied,
    /// The timeout elapsed first.
    TimedOut,
}

impl PollOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Polls the rendezvous directory for file lifecycle events.
#[derive(Debug, Clone)]
pub struct RendezvousPoller {
    interval: Duration,
}

impl Default for RendezvousPoller {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
        }
    }
}

impl RendezvousPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Waits until `path` exists. `timeout = None` waits forever, which is
    /// intentional for supervisor rendezvous (the operator interrupts).
    pub fn wait_for_appearance(&self, path: &Path, timeout: Option<Duration>) -> PollOutcome {
        self.wait_until(timeout, || path.exists())
    }

    /// Waits until `path` no longer exists.
    pub fn wait_for_removal(&self, path: &Path, timeout: Option<Duration>) -> PollOutcome {
        self.wait_until(timeout, || !path.exists())
    }

    /// Waits until every path in `paths` has been removed, invoking
    /// `on_removed` once per path as its removal is first observed. Drives
    /// the controller's progress bar during a graceful drain.
    pub fn wait_for_all_removed<F>(
        &self,
        paths: &[PathBuf],
        timeout: Option<Duration>,
        mut on_removed: F,
    ) -> PollOutcome
    where
        F: FnMut(&Path),
    {
        let mut pending: Vec<&PathBuf> = paths.iter().collect();
        self.wait_until(timeout, || {
            pending.retain(|path| {
                if path.exists() {
                    true
                } else {
                    on_removed(path);
                    false
                }
            });
            pending.is_empty()
        })
    }

    fn wait_until<F>(&self, timeout: Option<Duration>, mut condition: F) -> PollOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if condition() {
                return PollOutcome::Satisfied;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return PollOutcome::TimedOut;
                }
            }
            thread::sleep(self.interval);
        }
    }
}
