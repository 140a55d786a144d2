//! The controller: the short-lived CLI-side driver.
//!
//! Runs in its own process, never sharing memory with the master. It
//! discovers the master through the pid file, commands it with signals, and
//! watches rendezvous files for progress and results.

use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, error};

use workerman_common::{Error, ProcessHash, Result};
use workerman_net::Listener;
use workerman_rendezvous::{status::COLUMN_DESCRIPTIONS, StatusRow};

use crate::context::RuntimeContext;
use crate::daemon::{self, DaemonOutcome};
use crate::master::Master;
use crate::output::ProgressEvent;

pub struct Controller {
    ctx: RuntimeContext,
}

impl Controller {
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    /// Starts the master, either in the foreground (blocking for its
    /// lifetime) or as a daemon.
    pub fn start(&self, listeners: Vec<Listener>, daemon: bool) -> Result<()> {
        self.ctx.dir().ensure_exists()?;
        if self.ctx.dir().pid_file().exists() {
            return Err(Error::lifecycle(
                "Cannot start workerman, workerman already running.",
            ));
        }

        if daemon {
            if self.ctx.std_error_path().is_none() {
                self.ctx
                    .output()
                    .warning("std_error_path is not configured, daemon stderr will be discarded");
            }
            match daemon::daemonize(self.ctx.dir())? {
                DaemonOutcome::ParentExit { success: true } => {
                    self.ctx.output().success("workerman started in daemon mode");
                    Ok(())
                }
                DaemonOutcome::ParentExit { success: false } => Err(Error::lifecycle(
                    "workerman failed to start in daemon mode, check the stderr log",
                )),
                DaemonOutcome::RunMaster => {
                    // Detached grandchild. The master owns this process
                    // from here; never fall back into the CLI.
                    match self.ctx.std_error_path() {
                        Some(path) => daemon::redirect_stderr(path)?,
                        None => daemon::redirect_stderr(Path::new("/dev/null"))?,
                    }
                    self.ctx.output().apply_daemon_mode();
                    let code = match Master::start(self.ctx.clone(), listeners, true) {
                        Ok(()) => 0,
                        Err(e) => {
                            error!(error = %e, "master failed");
                            1
                        }
                    };
                    process::exit(code)
                }
            }
        } else {
            if let Some(path) = self.ctx.std_error_path() {
                daemon::redirect_stderr(path)?;
            }
            Master::start(self.ctx.clone(), listeners, false)
        }
    }

    /// Stops the running master, optionally draining connections first.
    pub fn stop(&self, graceful: bool) -> Result<()> {
        let pid = self.require_pid("Cannot stop workerman, workerman is not running.")?;
        self.ctx.output().info("stopping workerman...");
        self.send(pid, if graceful { Signal::SIGQUIT } else { Signal::SIGINT })?;
        if graceful {
            let pid_file = self.ctx.dir().pid_file();
            self.watch_drain(|| !pid_file.exists())?;
        }
        self.ctx
            .poller()
            .wait_for_removal(&self.ctx.dir().pid_file(), None);
        self.ctx.output().success("workerman stopped");
        Ok(())
    }

    /// Reload-restarts the workers, leaving the master in place.
    pub fn restart(&self, graceful: bool) -> Result<()> {
        let pid = self.require_pid("Cannot restart workerman, workerman is not running.")?;
        let restart_file = self.ctx.dir().restart_file();
        // A confirmation left over from an earlier reload would satisfy the
        // appearance poll immediately; clear it before signaling.
        self.ctx.dir().remove(&restart_file)?;

        let sent_at = Utc::now().timestamp();
        self.ctx.output().info("restarting workerman workers...");
        self.send(pid, if graceful { Signal::SIGUSR2 } else { Signal::SIGUSR1 })?;

        if graceful {
            let marker = restart_file.clone();
            self.watch_drain(move || marker.exists())?;
        }
        self.ctx.poller().wait_for_appearance(&restart_file, None);
        let confirmed_at: i64 = self.ctx.dir().read_json(&restart_file)?;
        if confirmed_at < sent_at {
            return Err(Error::lifecycle(
                "stale restart confirmation found, workerman may not have reloaded",
            ));
        }
        self.ctx.output().success("workerman restarted");
        Ok(())
    }

    /// Collects and renders the aggregated status table. Returns the rows
    /// for callers that want them.
    pub fn status(&self, info: bool) -> Result<Vec<StatusRow>> {
        if info {
            for (column, description) in COLUMN_DESCRIPTIONS {
                self.ctx.output().info(&format!("{column:<14} {description}"));
            }
            return Ok(Vec::new());
        }
        let pid =
            self.require_pid("Cannot collect worker status, workerman is not running.")?;
        self.send(pid, Signal::SIGABRT)?;

        let status_file = self.ctx.dir().status_file();
        self.ctx.poller().wait_for_appearance(&status_file, None);
        let hashes: Vec<ProcessHash> = self.ctx.dir().read_json(&status_file)?;
        let rows = self.collect_rows(&hashes)?;
        self.ctx.dir().remove(&status_file)?;
        self.render(&rows);
        Ok(rows)
    }

    /// Waits for each per-process hash file, reads its row, and deletes
    /// it, leaving the rendezvous directory as it was found.
    fn collect_rows(&self, hashes: &[ProcessHash]) -> Result<Vec<StatusRow>> {
        let mut rows = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let path = self.ctx.dir().hash_file(hash);
            self.ctx.poller().wait_for_appearance(&path, None);
            let row: StatusRow = self.ctx.dir().read_json(&path)?;
            self.ctx.dir().remove(&path)?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Renders the graceful-drain progress bar: waits for the hash list,
    /// then ticks as each worker's stub file disappears. `done` short-
    /// circuits the wait when the drain already completed.
    fn watch_drain<F: Fn() -> bool>(&self, done: F) -> Result<()> {
        let shutdown_file = self.ctx.dir().shutdown_file();
        loop {
            if shutdown_file.exists() {
                break;
            }
            if done() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(200));
        }
        let hashes: Vec<ProcessHash> = match self.ctx.dir().read_json(&shutdown_file) {
            Ok(hashes) => hashes,
            // The master finished and removed the file between the
            // existence check and the read.
            Err(_) if done() => return Ok(()),
            Err(e) => return Err(e),
        };
        let stubs: Vec<PathBuf> = hashes
            .iter()
            .map(|hash| self.ctx.dir().hash_file(hash))
            .collect();
        self.ctx
            .output()
            .progress(ProgressEvent::Start { total: stubs.len() });
        self.ctx.poller().wait_for_all_removed(&stubs, None, |path| {
            debug!(stub = %path.display(), "worker drained");
            self.ctx.output().progress(ProgressEvent::Tick);
        });
        self.ctx.output().progress(ProgressEvent::Finish);
        Ok(())
    }

    fn render(&self, rows: &[StatusRow]) {
        self.ctx.output().info(&format!(
            "{:<4} {:<22} {:<12} {:<10} {:<12} {:<18} {:<14} {:<6}",
            "id", "listen", "name", "memory", "peak_memory", "start_time", "connections", "timers"
        ));
        for row in rows {
            self.ctx.output().info(&format!(
                "{:<4} {:<22} {:<12} {:<10} {:<12} {:<18} {:<14} {:<6}",
                row.id.label(),
                row.listen,
                row.name,
                row.memory,
                row.peak_memory,
                row.start_time,
                row.connections,
                row.timers
            ));
        }
    }

    fn require_pid(&self, message: &str) -> Result<i32> {
        match self.ctx.dir().read_pid()? {
            Some(pid) => Ok(pid),
            None => Err(Error::lifecycle(message)),
        }
    }

    fn send(&self, pid: i32, signal: Signal) -> Result<()> {
        kill(Pid::from_raw(pid), signal)
            .map_err(|e| Error::signal_delivery(pid, format!("{signal:?}"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;
    use tempfile::TempDir;
    use workerman_rendezvous::{status, RendezvousDir, StatusId};

    fn controller(tmp: &TempDir) -> Controller {
        let ctx = RuntimeContext::new("Workerman", tmp.path(), None, Output::standard());
        Controller::new(ctx)
    }

    #[test]
    fn test_start_fails_when_already_running() {
        let tmp = TempDir::new().unwrap();
        let dir = RendezvousDir::new(tmp.path());
        dir.write_pid(12345).unwrap();

        let err = controller(&tmp).start(Vec::new(), false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot start workerman, workerman already running."
        );
        assert!(err.is_lifecycle());
    }

    #[test]
    fn test_stop_fails_when_not_running() {
        let tmp = TempDir::new().unwrap();
        let err = controller(&tmp).stop(false).unwrap_err();
        assert_eq!(err.to_string(), "Cannot stop workerman, workerman is not running.");
    }

    #[test]
    fn test_restart_fails_when_not_running() {
        let tmp = TempDir::new().unwrap();
        let err = controller(&tmp).restart(true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot restart workerman, workerman is not running."
        );
    }

    #[test]
    fn test_status_fails_when_not_running() {
        let tmp = TempDir::new().unwrap();
        let err = controller(&tmp).status(false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot collect worker status, workerman is not running."
        );
    }

    #[test]
    fn test_status_info_needs_no_master() {
        let tmp = TempDir::new().unwrap();
        let rows = controller(&tmp).status(true).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_collect_rows_consumes_hash_files() {
        let tmp = TempDir::new().unwrap();
        let dir = RendezvousDir::new(tmp.path());
        let hashes = vec![ProcessHash::from("aaaa"), ProcessHash::from("bbbb")];
        for (index, hash) in hashes.iter().enumerate() {
            let row = StatusRow {
                id: StatusId::worker(index as u32 + 1),
                listen: "127.0.0.1:9000".to_string(),
                name: "echo".to_string(),
                memory: status::format_memory(1024),
                peak_memory: status::format_memory(2048),
                start_time: status::format_start_time(0, 5),
                connections: status::format_connections(0, 0),
                timers: 0,
            };
            dir.write_json(&dir.hash_file(hash), &row).unwrap();
        }

        let rows = controller(&tmp).collect_rows(&hashes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id.label(), "1");
        for hash in &hashes {
            assert!(!dir.hash_file(hash).exists());
        }
    }

    #[test]
    fn test_watch_drain_ticks_as_stubs_disappear() {
        let tmp = TempDir::new().unwrap();
        let dir = RendezvousDir::new(tmp.path());
        let hashes = vec![ProcessHash::from("h1"), ProcessHash::from("h2")];
        dir.write_json(&dir.shutdown_file(), &hashes).unwrap();
        for hash in &hashes {
            dir.touch(&dir.hash_file(hash)).unwrap();
        }

        let stub_dir = dir.clone();
        let stub_hashes = hashes.clone();
        let remover = std::thread::spawn(move || {
            for hash in &stub_hashes {
                std::thread::sleep(Duration::from_millis(50));
                stub_dir.remove(&stub_dir.hash_file(hash)).unwrap();
            }
        });

        controller(&tmp).watch_drain(|| false).unwrap();
        remover.join().unwrap();
        for hash in &hashes {
            assert!(!dir.hash_file(hash).exists());
        }
    }

    #[test]
    fn test_watch_drain_returns_when_already_done() {
        let tmp = TempDir::new().unwrap();
        // no shutdown file and the done predicate is immediately true
        controller(&tmp).watch_drain(|| true).unwrap();
    }
}
