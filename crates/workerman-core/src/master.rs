//! The master process: forks workers, reaps them, revives crashed ones,
//! and orchestrates stop, reload, and status collection.
//!
//! The monitor loop alternates a cooperative signal-queue drain with a
//! `WNOHANG` reap, so control handlers always run between reaps, never
//! during one.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};
use tracing::{debug, info, warn};
use uuid::Uuid;

use workerman_common::{Error, ProcessHash, Result};
use workerman_net::Listener;
use workerman_rendezvous::{status, StatusId, StatusRow};
use workerman_signal::{master_action, MasterAction, SignalBus, MASTER_SIGNALS};

use crate::context::RuntimeContext;
use crate::proctitle::set_process_title;
use crate::table::{DeadWorkerDisposition, ReapOutcome, WorkerRecord, WorkerTable};
use crate::worker::{run_worker, WorkerParams};

/// Cadence of the monitor loop when nothing is pending.
const REAP_INTERVAL: Duration = Duration::from_millis(100);

pub struct Master {
    ctx: RuntimeContext,
    listeners: Vec<Listener>,
    table: WorkerTable,
    run: bool,
    shutdown_disabled: bool,
    daemon: bool,
    start_time: DateTime<Utc>,
    hash: ProcessHash,
    bus: Option<SignalBus>,
}

impl Master {
    /// Runs the master to completion: binds, forks the workers, then
    /// monitors until a stop drains them. Blocks for the master's entire
    /// lifetime.
    ///
    /// Exit cleanup rides on `Drop`, so a bootstrap failure after workers
    /// have already been forked, or any other abnormal exit, still kills
    /// them and clears the rendezvous state.
    pub fn start(ctx: RuntimeContext, listeners: Vec<Listener>, daemon: bool) -> Result<()> {
        let mut master = Self {
            ctx,
            listeners,
            table: WorkerTable::new(),
            run: false,
            shutdown_disabled: false,
            daemon,
            start_time: Utc::now(),
            hash: ProcessHash::new(Uuid::new_v4().simple().to_string()),
            bus: None,
        };
        master.bootstrap()?;
        master.monitor();
        Ok(())
    }

    fn bootstrap(&mut self) -> Result<()> {
        self.ctx.dir().ensure_exists()?;
        // A prior run may have left rendezvous files behind.
        self.ctx.dir().remove_well_known()?;
        set_process_title(&self.ctx.master_title());

        for listener in &mut self.listeners {
            listener.build()?;
        }

        self.ctx.dir().write_pid(getpid().as_raw())?;
        self.bus = Some(SignalBus::install(MASTER_SIGNALS).map_err(Error::Io)?);

        for index in 0..self.listeners.len() {
            for _ in 0..self.listeners[index].worker_count() {
                let id = self.table.allocate_id();
                self.spawn_worker(WorkerRecord::new(id, index))?;
            }
        }
        info!(pid = getpid().as_raw(), workers = self.table.len(), "master started");
        Ok(())
    }

    /// Forks one worker from its record. The child clears master state and
    /// never returns; the parent records the new pid.
    fn spawn_worker(&mut self, record: WorkerRecord) -> Result<()> {
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!(worker = %record.id, pid = child.as_raw(), "worker forked");
                self.table.insert(
                    child.as_raw(),
                    WorkerRecord {
                        start_time: Utc::now(),
                        ..record
                    },
                );
                Ok(())
            }
            Ok(ForkResult::Child) => {
                if let Some(bus) = &self.bus {
                    bus.close();
                }
                self.run = false;
                self.shutdown_disabled = true;
                let listeners = std::mem::take(&mut self.listeners);
                run_worker(WorkerParams {
                    id: record.id,
                    hash: record.hash,
                    restart_count: record.restart_count,
                    daemon: self.daemon,
                    listeners,
                    claimed_index: record.listener_index,
                    dir: self.ctx.dir().clone(),
                })
            }
            Err(e) => Err(Error::fork("worker spawn", e)),
        }
    }

    fn monitor(&mut self) {
        self.run = true;
        while self.run {
            let pending = match self.bus.as_mut() {
                Some(bus) => bus.drain(),
                None => Vec::new(),
            };
            for signal in pending {
                self.handle_signal(signal);
                if !self.run {
                    return;
                }
            }
            if !self.reap_once() {
                thread::sleep(REAP_INTERVAL);
            }
        }
    }

    fn handle_signal(&mut self, signal: i32) {
        let Some(action) = master_action(signal) else {
            return;
        };
        info!(signal, ?action, "control signal");
        match action {
            MasterAction::StopHard => self.initiate_stop(false),
            MasterAction::StopGraceful => self.initiate_stop(true),
            MasterAction::ReloadHard => self.initiate_reload(false),
            MasterAction::ReloadGraceful => self.initiate_reload(true),
            MasterAction::CollectStatus => self.collect_status(),
        }
    }

    fn initiate_stop(&mut self, graceful: bool) {
        self.table.set_disposition(DeadWorkerDisposition::Stop);
        if graceful {
            self.table.snapshot_pending();
            if let Err(e) = self.write_drain_stubs() {
                self.ctx.output().error(&e.to_string());
            }
            self.fanout(Signal::SIGQUIT);
        } else {
            self.fanout(Signal::SIGINT);
        }
        if self.table.is_empty() {
            self.run = false;
            self.shutdown_disabled = true;
        }
    }

    fn initiate_reload(&mut self, graceful: bool) {
        self.table.snapshot_pending();
        self.table.set_disposition(DeadWorkerDisposition::Reload);
        if graceful {
            if let Err(e) = self.write_drain_stubs() {
                self.ctx.output().error(&e.to_string());
            }
            self.fanout(Signal::SIGQUIT);
        } else {
            self.fanout(Signal::SIGINT);
        }
        if self.table.pending_is_empty() {
            self.finish_reload();
        }
    }

    /// Writes the drain hash list and the per-hash stub files before the
    /// QUIT fanout, so every worker sees its own delete target and the
    /// controller can watch the stubs disappear.
    fn write_drain_stubs(&self) -> Result<()> {
        let dir = self.ctx.dir();
        let hashes = self.table.hashes();
        dir.write_json(&dir.shutdown_file(), &hashes)?;
        for hash in &hashes {
            dir.touch(&dir.hash_file(hash))?;
        }
        Ok(())
    }

    /// Writes the master's own status row and the hash list, then asks
    /// every worker for its row.
    fn collect_status(&mut self) {
        let dir = self.ctx.dir();
        let memory = crate::memory::read_self_memory();
        let uptime = (Utc::now() - self.start_time).num_seconds();
        let row = StatusRow {
            id: StatusId::master(),
            listen: "N/A".to_string(),
            name: self.ctx.name().to_string(),
            memory: status::format_memory(memory.rss_kb),
            peak_memory: status::format_memory(memory.peak_kb),
            start_time: status::format_start_time(0, uptime),
            connections: status::format_connections(0, 0),
            timers: 0,
        };
        if let Err(e) = dir.write_json(&dir.hash_file(&self.hash), &row) {
            self.ctx.output().error(&e.to_string());
            return;
        }
        let mut hashes = vec![self.hash.clone()];
        hashes.extend(self.table.hashes());
        if let Err(e) = dir.write_json(&dir.status_file(), &hashes) {
            self.ctx.output().error(&e.to_string());
            return;
        }
        self.fanout(Signal::SIGABRT);
    }

    /// Delivers a signal to every worker. A failed delivery is logged per
    /// pid and does not abort the fanout.
    fn fanout(&self, signal: Signal) {
        for pid in self.table.pids() {
            if let Err(e) = kill(Pid::from_raw(pid), signal) {
                let err = Error::signal_delivery(pid, format!("{signal:?}"), e);
                warn!(error = %err, "fanout delivery failed");
            }
        }
    }

    /// One non-blocking reap attempt. Returns true when it made progress.
    fn reap_once(&mut self) -> bool {
        match waitpid(None, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                self.dispatch_dead_worker(pid.as_raw(), code);
                true
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                self.dispatch_dead_worker(pid.as_raw(), 128 + signal as i32);
                true
            }
            Ok(WaitStatus::Stopped(pid, signal)) => {
                debug!(pid = pid.as_raw(), ?signal, "child stopped");
                true
            }
            Ok(WaitStatus::StillAlive) => false,
            Ok(_) => false,
            Err(nix::errno::Errno::ECHILD) => false,
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                false
            }
        }
    }

    fn dispatch_dead_worker(&mut self, pid: i32, exit_status: i32) {
        match self.table.on_reaped(pid, exit_status) {
            ReapOutcome::Unexpected { record } => {
                self.ctx.output().error(&format!(
                    "worker {} (pid {pid}) exited unexpectedly, reviving",
                    record.id
                ));
                if let Err(e) = self.spawn_worker(record) {
                    self.ctx.output().exception(&e.to_string());
                }
            }
            ReapOutcome::StoppedClean { record } => {
                info!(worker = %record.id, pid, "worker stopped");
                self.after_stop_removal();
            }
            ReapOutcome::StoppedDirty { record, status } => {
                let err = Error::unexpected_exit(record.id, status);
                self.ctx.output().error(&err.to_string());
                self.after_stop_removal();
            }
            ReapOutcome::ReloadReplace { record, status } => {
                if status != 0 {
                    let err = Error::unexpected_exit(record.id, status);
                    self.ctx.output().error(&err.to_string());
                }
                if let Err(e) = self.spawn_worker(record) {
                    self.ctx.output().exception(&e.to_string());
                }
                if self.table.pending_is_empty() {
                    self.finish_reload();
                }
            }
            ReapOutcome::Unknown => {
                debug!(pid, "reaped unrelated child");
            }
        }
    }

    fn after_stop_removal(&mut self) {
        if self.table.disposition() == DeadWorkerDisposition::Stop && self.table.is_empty() {
            self.run = false;
            self.shutdown_disabled = true;
        }
    }

    fn finish_reload(&mut self) {
        let dir = self.ctx.dir();
        if let Err(e) = dir.write_json(&dir.restart_file(), &Utc::now().timestamp()) {
            self.ctx.output().error(&e.to_string());
        }
        self.table.set_disposition(DeadWorkerDisposition::None);
        info!("reload complete");
    }

    /// Clean shutdown: every worker has been reaped; remove all rendezvous
    /// state so the next `start` finds a clean directory.
    fn controlled_exit(&mut self) {
        let dir = self.ctx.dir();
        let _ = dir.remove(&dir.hash_file(&self.hash));
        let _ = dir.remove_well_known();
        info!("master stopped");
    }

    /// Any exit other than the controlled one: kill the workers so they do
    /// not outlive their supervisor, then clear the rendezvous state.
    fn emergency_exit(&mut self) {
        self.ctx
            .output()
            .exception("master exiting abnormally, killing workers and removing rendezvous files");
        for pid in self.table.pids() {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
        let dir = self.ctx.dir();
        for hash in self.table.hashes() {
            let _ = dir.remove(&dir.hash_file(&hash));
        }
        let _ = dir.remove(&dir.hash_file(&self.hash));
        let _ = dir.remove_well_known();
    }
}

/// The at-exit handler, in the spirit of the worker's hash-file guard: it
/// runs on every exit path out of [`Master::start`], including error
/// returns from bootstrap and unwinds. A controlled stop sets
/// `shutdown_disabled` when the last worker is reaped, which bypasses the
/// abnormal-exit handling. Forked children never reach this; they leave
/// through `process::exit`.
impl Drop for Master {
    fn drop(&mut self) {
        if self.shutdown_disabled {
            self.controlled_exit();
        } else {
            self.emergency_exit();
        }
    }
}
