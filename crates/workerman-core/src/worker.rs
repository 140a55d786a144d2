//! The worker runtime: one child process bound to one listener.
//!
//! A worker accepts connections, drives its event loop, reacts to signals,
//! keeps local counters, and writes a status row on demand. It exits by
//! stopping the loop; the hash-file guard removes its rendezvous file on
//! every exit path.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mio::Token;
use tracing::{debug, error, info, warn};

use workerman_common::{ProcessHash, Result, WorkerId};
use workerman_event::{EventHandler, EventLoop, TimerId};
use workerman_net::{
    drop_competing_state, Connection, Datagram, Listener, ServerCallbacks, Transport,
};
use workerman_rendezvous::{status, RendezvousDir, StatusId, StatusRow};
use workerman_signal::{worker_action, WorkerAction, WorkerSignalSource, WORKER_SIGNALS};

use crate::proctitle::set_process_title;

const DRAIN_RETRY: Duration = Duration::from_secs(1);

/// Everything a freshly forked worker needs. Built by the master in the
/// child branch of the fork.
pub struct WorkerParams {
    pub id: WorkerId,
    pub hash: ProcessHash,
    pub restart_count: u32,
    pub daemon: bool,
    pub listeners: Vec<Listener>,
    pub claimed_index: usize,
    pub dir: RendezvousDir,
}

/// Removes the worker's hash file on every exit path, including unwinds.
struct HashFileGuard {
    dir: RendezvousDir,
    hash: ProcessHash,
}

impl Drop for HashFileGuard {
    fn drop(&mut self) {
        let _ = self.dir.remove(&self.dir.hash_file(&self.hash));
    }
}

/// Worker entry point in the child process. Never returns.
pub fn run_worker(params: WorkerParams) -> ! {
    let guard = HashFileGuard {
        dir: params.dir.clone(),
        hash: params.hash.clone(),
    };
    let code = match Worker::new(params) {
        Ok(mut worker) => match worker.run() {
            Ok(code) => code,
            Err(e) => {
                error!(error = %e, "worker failed");
                1
            }
        },
        Err(e) => {
            error!(error = %e, "worker setup failed");
            1
        }
    };
    drop(guard);
    std::process::exit(code)
}

pub struct Worker {
    id: WorkerId,
    hash: ProcessHash,
    restart_count: u32,
    #[allow(dead_code)]
    daemon: bool,
    start_time: DateTime<Utc>,
    listeners: Vec<Listener>,
    claimed_index: usize,
    callbacks: ServerCallbacks,
    connections: HashMap<Token, Connection>,
    next_conn_id: usize,
    total_connections: u64,
    dir: RendezvousDir,
    accept_token: Option<Token>,
    signal_token: Option<Token>,
    signals: Option<WorkerSignalSource>,
    draining: bool,
    drain_timer: Option<TimerId>,
    exit_code: i32,
}

impl Worker {
    pub fn new(params: WorkerParams) -> Result<Self> {
        let callbacks = params.listeners[params.claimed_index].callbacks().clone();
        Ok(Self {
            id: params.id,
            hash: params.hash,
            restart_count: params.restart_count,
            daemon: params.daemon,
            start_time: Utc::now(),
            listeners: params.listeners,
            claimed_index: params.claimed_index,
            callbacks,
            connections: HashMap::new(),
            next_conn_id: 0,
            total_connections: 0,
            dir: params.dir,
            accept_token: None,
            signal_token: None,
            signals: None,
            draining: false,
            drain_timer: None,
            exit_code: 0,
        })
    }

    /// Runs the worker to completion and returns its exit code.
    pub fn run(&mut self) -> Result<i32> {
        // Fresh loop; nothing carries over from the parent.
        let mut event_loop = EventLoop::new()?;

        if self.listener().reuse_port() {
            self.listener_mut().build_in_worker()?;
        }
        drop_competing_state(&mut self.listeners, self.claimed_index);

        set_process_title(&format!("{} worker ({})", self.listener().name(), self.id));

        let mut signals = WorkerSignalSource::install(WORKER_SIGNALS)?;
        let signal_token = event_loop.next_token();
        signals.register(event_loop.registry(), signal_token)?;
        self.signal_token = Some(signal_token);
        self.signals = Some(signals);

        let accept_token = self.listeners[self.claimed_index].resume_accept(&mut event_loop)?;
        self.accept_token = Some(accept_token);

        info!(
            worker = %self.id,
            listen = %self.listener().bound_address(),
            "worker started"
        );
        event_loop.run(self)?;
        Ok(self.exit_code)
    }

    fn listener(&self) -> &Listener {
        &self.listeners[self.claimed_index]
    }

    fn listener_mut(&mut self) -> &mut Listener {
        &mut self.listeners[self.claimed_index]
    }

    fn handle_signal(&mut self, event_loop: &mut EventLoop, signal: i32) {
        let Some(action) = worker_action(signal) else {
            return;
        };
        debug!(worker = %self.id, signal, ?action, "signal received");
        match action {
            WorkerAction::StopHard => self.hard_stop(event_loop),
            WorkerAction::StopGraceful => self.graceful_stop(event_loop),
            WorkerAction::WriteStatus => self.write_status(event_loop),
        }
    }

    /// Tears the listener down, force-closes every connection, and leaves
    /// the loop with exit code 0.
    fn hard_stop(&mut self, event_loop: &mut EventLoop) {
        self.listener_mut().teardown();
        let mut connections: Vec<Connection> =
            self.connections.drain().map(|(_, conn)| conn).collect();
        for conn in &mut connections {
            conn.deregister(event_loop);
        }
        drop(connections);
        self.exit_code = 0;
        event_loop.stop();
    }

    /// Level-triggered drain: pause accepting, then exit once the last
    /// connection has closed itself, re-checking every second. No timeout;
    /// a stuck drain is the operator's call to escalate to a hard stop.
    fn graceful_stop(&mut self, event_loop: &mut EventLoop) {
        self.draining = true;
        if self.listener().is_accepting() {
            if let Err(e) = self.listeners[self.claimed_index].pause_accept(event_loop) {
                warn!(worker = %self.id, error = %e, "pause accept failed");
            }
        }
        if self.connections.is_empty() {
            self.finish_drain(event_loop);
        } else if self.drain_timer.is_none() {
            self.drain_timer = Some(event_loop.add_timer(DRAIN_RETRY));
        }
    }

    fn finish_drain(&mut self, event_loop: &mut EventLoop) {
        self.listener_mut().teardown();
        self.exit_code = 0;
        event_loop.stop();
    }

    /// Serializes the worker's status row under its hash file.
    fn write_status(&mut self, event_loop: &mut EventLoop) {
        let memory = crate::memory::read_self_memory();
        let uptime = (Utc::now() - self.start_time).num_seconds();
        let row = StatusRow {
            id: StatusId::worker(self.id.get()),
            listen: self.listener().bound_address(),
            name: self.listener().name().to_string(),
            memory: status::format_memory(memory.rss_kb),
            peak_memory: status::format_memory(memory.peak_kb),
            start_time: status::format_start_time(self.restart_count, uptime),
            connections: status::format_connections(
                self.connections.len(),
                self.total_connections,
            ),
            timers: event_loop.timer_count(),
        };
        let path = self.dir.hash_file(&self.hash);
        if let Err(e) = self.dir.write_json(&path, &row) {
            warn!(worker = %self.id, error = %e, "status write failed");
        }
    }

    fn accept_ready(&mut self, event_loop: &mut EventLoop) {
        if self.listener().transport() == Transport::Udp {
            self.drain_datagrams();
            return;
        }
        loop {
            match self.listeners[self.claimed_index].accept() {
                Ok(Some((stream, peer))) => self.admit(event_loop, stream, peer),
                // Empty queue: the kernel handed the connection to a
                // sibling worker.
                Ok(None) => break,
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, event_loop: &mut EventLoop, stream: workerman_net::connection::Stream, peer: String) {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        let transport = self.listener().transport();
        let protocol = self.listener().protocol();
        match Connection::register(event_loop, id, stream, peer, transport, protocol) {
            Ok(conn) => {
                let token = conn.token();
                self.connections.insert(token, conn);
                self.total_connections += 1;
                if let Some(on_connect) = self.callbacks.on_connect.clone() {
                    if let Some(conn) = self.connections.get_mut(&token) {
                        on_connect(conn);
                    }
                }
            }
            Err(e) => warn!(worker = %self.id, error = %e, "connection registration failed"),
        }
    }

    fn drain_datagrams(&mut self) {
        let mut buf = [0u8; 64 * 1024];
        loop {
            match self.listeners[self.claimed_index].recv_datagram(&mut buf) {
                Ok(Some((peer, len))) => {
                    if let Some(on_datagram) = self.callbacks.on_datagram.clone() {
                        let listener = &mut self.listeners[self.claimed_index];
                        on_datagram(Datagram::new(listener, peer, &buf[..len]));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "datagram receive failed");
                    break;
                }
            }
        }
    }

    fn connection_ready(
        &mut self,
        event_loop: &mut EventLoop,
        token: Token,
        readable: bool,
        writable: bool,
    ) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if writable {
            if let Err(e) = conn.write_ready() {
                debug!(conn = conn.id(), error = %e, "flush failed");
            }
        }
        if !readable {
            return;
        }
        let event = conn.read_ready();
        if !event.data.is_empty() {
            if let Some(on_message) = self.callbacks.on_message.clone() {
                on_message(conn, &event.data);
            }
        }
        if event.closed {
            if let Some(on_close) = self.callbacks.on_close.clone() {
                on_close(conn);
            }
            conn.deregister(event_loop);
            self.connections.remove(&token);
            if self.draining && self.connections.is_empty() {
                self.finish_drain(event_loop);
            }
        }
    }
}

impl EventHandler for Worker {
    fn ready(&mut self, event_loop: &mut EventLoop, token: Token, readable: bool, writable: bool) {
        if self.signal_token == Some(token) {
            let pending = match self.signals.as_mut() {
                Some(signals) => signals.drain(),
                None => Vec::new(),
            };
            for signal in pending {
                self.handle_signal(event_loop, signal);
                if !event_loop.is_running() {
                    return;
                }
            }
        } else if self.accept_token == Some(token) {
            self.accept_ready(event_loop);
        } else {
            self.connection_ready(event_loop, token, readable, writable);
        }
    }

    fn timer(&mut self, event_loop: &mut EventLoop, id: TimerId) {
        if self.drain_timer == Some(id) {
            self.drain_timer = None;
            self.graceful_stop(event_loop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use workerman_net::Protocol;

    fn test_worker(tmp: &TempDir, callbacks: ServerCallbacks) -> (Worker, EventLoop) {
        let mut listener = Listener::new(Transport::Tcp, "127.0.0.1:0")
            .with_name("echo")
            .with_protocol(Protocol::Text)
            .with_callbacks(callbacks);
        listener.build().unwrap();
        let params = WorkerParams {
            id: WorkerId::new(1),
            hash: ProcessHash::from("testhash0000000000000000000000ff"),
            restart_count: 0,
            daemon: false,
            listeners: vec![listener],
            claimed_index: 0,
            dir: RendezvousDir::new(tmp.path()),
        };
        let worker = Worker::new(params).unwrap();
        let event_loop = EventLoop::new().unwrap();
        (worker, event_loop)
    }

    fn connect_and_accept(worker: &mut Worker, event_loop: &mut EventLoop) -> std::net::TcpStream {
        let addr = worker.listener().bound_address();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let before = worker.total_connections;
        for _ in 0..200 {
            worker.accept_ready(event_loop);
            if worker.total_connections > before {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(worker.total_connections, before + 1);
        client
    }

    #[test]
    fn test_accept_tracks_counters() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        let _client = connect_and_accept(&mut worker, &mut el);
        assert_eq!(worker.connections.len(), 1);
        assert_eq!(worker.total_connections, 1);
        // total never dips below active
        assert!(worker.total_connections >= worker.connections.len() as u64);
    }

    #[test]
    fn test_accept_with_empty_queue_is_silent() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        worker.accept_ready(&mut el);
        assert_eq!(worker.total_connections, 0);
    }

    #[test]
    fn test_graceful_stop_with_no_connections_exits_immediately() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        worker.graceful_stop(&mut el);
        assert_eq!(worker.exit_code, 0);
        assert!(!worker.listener().is_bound());
        assert!(worker.drain_timer.is_none());
    }

    #[test]
    fn test_graceful_stop_with_connection_arms_drain_timer() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        let _client = connect_and_accept(&mut worker, &mut el);

        worker.graceful_stop(&mut el);
        assert!(worker.draining);
        assert!(worker.drain_timer.is_some());
        assert!(worker.listener().is_bound());
        assert_eq!(el.timer_count(), 1);
    }

    #[test]
    fn test_drain_finishes_when_last_connection_closes() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        let client = connect_and_accept(&mut worker, &mut el);
        let token = *worker.connections.keys().next().unwrap();

        worker.graceful_stop(&mut el);
        drop(client);
        for _ in 0..200 {
            worker.connection_ready(&mut el, token, true, true);
            if worker.connections.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.connections.is_empty());
        assert!(!worker.listener().is_bound());
        assert_eq!(worker.exit_code, 0);
    }

    #[test]
    fn test_hard_stop_closes_everything() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        let _client = connect_and_accept(&mut worker, &mut el);

        worker.hard_stop(&mut el);
        assert!(worker.connections.is_empty());
        assert!(!worker.listener().is_bound());
        assert_eq!(worker.exit_code, 0);
    }

    #[test]
    fn test_echo_callback_round_trip() {
        let tmp = TempDir::new().unwrap();
        let callbacks = ServerCallbacks::new().on_message(|conn, data| {
            let _ = conn.send(data);
        });
        let (mut worker, mut el) = test_worker(&tmp, callbacks);
        let mut client = connect_and_accept(&mut worker, &mut el);
        let token = *worker.connections.keys().next().unwrap();

        client.write_all(b"ping").unwrap();
        client.flush().unwrap();
        for _ in 0..200 {
            worker.connection_ready(&mut el, token, true, false);
            std::thread::sleep(Duration::from_millis(5));
            let mut buf = [0u8; 16];
            client
                .set_read_timeout(Some(Duration::from_millis(10)))
                .unwrap();
            match std::io::Read::read(&mut client, &mut buf) {
                Ok(n) if n > 0 => {
                    assert_eq!(&buf[..n], b"ping");
                    return;
                }
                _ => continue,
            }
        }
        panic!("echo reply not received");
    }

    #[test]
    fn test_status_row_written_under_hash() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        let _client = connect_and_accept(&mut worker, &mut el);

        worker.write_status(&mut el);
        let path = worker.dir.hash_file(&worker.hash);
        assert!(path.exists());
        let row: StatusRow = worker.dir.read_json(&path).unwrap();
        assert_eq!(row.id.label(), "1");
        assert_eq!(row.name, "echo");
        assert_eq!(row.connections, "1/1");
        assert!(row.listen.starts_with("127.0.0.1:"));
        assert!(row.start_time.starts_with("(0) "));
    }

    #[test]
    fn test_worker_signal_dispatch_table() {
        let tmp = TempDir::new().unwrap();
        let (mut worker, mut el) = test_worker(&tmp, ServerCallbacks::new());
        // SIGUSR1 is a hard stop for workers
        worker.handle_signal(&mut el, nix::sys::signal::Signal::SIGUSR1 as i32);
        assert!(!worker.listener().is_bound());
        assert_eq!(worker.exit_code, 0);
    }
}
