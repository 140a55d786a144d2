//! # Workerman Event
//!
//! The cooperative event loop each worker runs: a mio poll, a token
//! allocator, and a heap of one-shot timers. The loop owns no application
//! state; the worker implements [`EventHandler`] and receives dispatch with
//! a mutable handle back to the loop so it can register connections, re-arm
//! timers, or stop from inside a callback.
//!
//! Registrations are edge-triggered, so accept and read paths must drain
//! until `WouldBlock`.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::io;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::trace;

/// Identifier of a pending one-shot timer.
pub type TimerId = u64;

#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Instant,
    id: TimerId,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Dispatch surface a worker implements.
pub trait EventHandler {
    /// An I/O source registered on the loop became ready.
    fn ready(&mut self, event_loop: &mut EventLoop, token: Token, readable: bool, writable: bool);

    /// A one-shot timer fired.
    fn timer(&mut self, event_loop: &mut EventLoop, id: TimerId);
}

/// Single-threaded poll + timer loop.
pub struct EventLoop {
    poll: Poll,
    next_token: usize,
    timers: std::collections::BinaryHeap<Reverse<TimerEntry>>,
    cancelled: HashSet<TimerId>,
    next_timer: TimerId,
    running: bool,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            next_token: 0,
            timers: std::collections::BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_timer: 0,
            running: false,
        })
    }

    /// The mio registry, for sources that register themselves.
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Allocates a fresh token. Tokens are never reused within a process.
    pub fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Registers a source and returns its token.
    pub fn register<S: Source + ?Sized>(
        &mut self,
        source: &mut S,
        interests: Interest,
    ) -> io::Result<Token> {
        let token = self.next_token();
        self.poll.registry().register(source, token, interests)?;
        Ok(token)
    }

    /// Removes a source from the poll.
    pub fn deregister<S: Source + ?Sized>(&mut self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Arms a one-shot timer.
    pub fn add_timer(&mut self, delay: Duration) -> TimerId {
        let id = self.next_timer;
        self.next_timer += 1;
        self.timers.push(Reverse(TimerEntry {
            deadline: Instant::now() + delay,
            id,
        }));
        id
    }

    /// Cancels a pending timer. Cancelling an already-fired timer is a
    /// no-op.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if self.timers.iter().any(|Reverse(entry)| entry.id == id) {
            self.cancelled.insert(id);
        }
    }

    /// Number of pending (non-cancelled) timers. Backs the `timers` status
    /// column.
    pub fn timer_count(&self) -> usize {
        self.timers
            .iter()
            .filter(|Reverse(entry)| !self.cancelled.contains(&entry.id))
            .count()
    }

    /// Requests loop exit after the current dispatch round.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Runs until [`stop`](Self::stop) is called from a handler.
    pub fn run<H: EventHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        self.running = true;
        let mut events = Events::with_capacity(1024);
        while self.running {
            let timeout = self.next_timeout();
            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            for event in events.iter() {
                trace!(token = event.token().0, "event ready");
                handler.ready(
                    self,
                    event.token(),
                    event.is_readable(),
                    event.is_writable(),
                );
                if !self.running {
                    break;
                }
            }
            self.fire_due_timers(handler);
        }
        Ok(())
    }

    fn next_timeout(&mut self) -> Option<Duration> {
        let now = Instant::now();
        loop {
            match self.timers.peek() {
                Some(Reverse(entry)) if self.cancelled.contains(&entry.id) => {
                    let id = entry.id;
                    self.timers.pop();
                    self.cancelled.remove(&id);
                }
                Some(Reverse(entry)) => {
                    return Some(entry.deadline.saturating_duration_since(now));
                }
                None => return None,
            }
        }
    }

    fn fire_due_timers<H: EventHandler>(&mut self, handler: &mut H) {
        let now = Instant::now();
        while self.running {
            let due = match self.timers.peek() {
                Some(Reverse(entry)) if entry.deadline <= now => {
                    let id = entry.id;
                    self.timers.pop();
                    if self.cancelled.remove(&id) {
                        continue;
                    }
                    id
                }
                _ => break,
            };
            handler.timer(self, due);
        }
    }
}
