//! An accepted stream connection.
//!
//! The per-byte protocol state machine is an external collaborator; a
//! `Connection` only drains reads, hands the bytes to the application
//! callback, and buffers writes that would block.

use std::io::{self, Read, Write};

use mio::{Interest, Token};
use tracing::trace;

use workerman_event::EventLoop;

use crate::listener::{Protocol, Transport};

/// Stream handle for TCP (and SSL-tagged) or unix-domain connections.
pub enum Stream {
    Tcp(mio::net::TcpStream),
    Unix(mio::net::UnixStream),
}

impl Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            Self::Unix(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            Self::Unix(s) => s.write(buf),
        }
    }
}

/// What a readiness dispatch produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Bytes drained from the socket, possibly empty.
    pub data: Vec<u8>,
    /// The peer closed (EOF) or the stream errored.
    pub closed: bool,
}

/// One accepted connection, bound to a worker and tagged with its
/// listener's transport and protocol.
pub struct Connection {
    id: usize,
    token: Token,
    stream: Stream,
    peer: String,
    transport: Transport,
    protocol: Protocol,
    pending_out: Vec<u8>,
}

impl Connection {
    pub fn new(
        id: usize,
        token: Token,
        stream: Stream,
        peer: String,
        transport: Transport,
        protocol: Protocol,
    ) -> Self {
        Self {
            id,
            token,
            stream,
            peer,
            transport,
            protocol,
            pending_out: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Registers the connection's stream on the event loop under a fresh
    /// token and returns a `Connection`.
    pub fn register(
        event_loop: &mut EventLoop,
        id: usize,
        mut stream: Stream,
        peer: String,
        transport: Transport,
        protocol: Protocol,
    ) -> io::Result<Self> {
        let token = match &mut stream {
            Stream::Tcp(s) => event_loop.register(s, Interest::READABLE | Interest::WRITABLE)?,
            Stream::Unix(s) => event_loop.register(s, Interest::READABLE | Interest::WRITABLE)?,
        };
        Ok(Self::new(id, token, stream, peer, transport, protocol))
    }

    /// Drains the socket. Registration is edge-triggered, so this reads
    /// until `WouldBlock`, EOF, or error.
    pub fn read_ready(&mut self) -> ConnectionEvent {
        let mut event = ConnectionEvent::default();
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    event.closed = true;
                    break;
                }
                Ok(n) => event.data.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    trace!(conn = self.id, error = %e, "read failed, closing");
                    event.closed = true;
                    break;
                }
            }
        }
        event
    }

    /// Queues bytes for the peer, writing as much as the socket accepts
    /// now and buffering the rest for the next writable dispatch.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.pending_out.is_empty() {
            let written = self.write_some(data)?;
            if written < data.len() {
                self.pending_out.extend_from_slice(&data[written..]);
            }
        } else {
            self.pending_out.extend_from_slice(data);
        }
        Ok(())
    }

    /// Flushes buffered output. Called on a writable dispatch.
    pub fn write_ready(&mut self) -> io::Result<()> {
        if self.pending_out.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending_out);
        let written = self.write_some(&pending)?;
        if written < pending.len() {
            self.pending_out = pending[written..].to_vec();
        }
        Ok(())
    }

    /// True while output is still buffered.
    pub fn has_pending_output(&self) -> bool {
        !self.pending_out.is_empty()
    }

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            match self.stream.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    /// Removes the stream from the event loop. The socket closes when the
    /// connection is dropped.
    pub fn deregister(&mut self, event_loop: &mut EventLoop) {
        let result = match &mut self.stream {
            Stream::Tcp(s) => event_loop.deregister(s),
            Stream::Unix(s) => event_loop.deregister(s),
        };
        if let Err(e) = result {
            trace!(conn = self.id, error = %e, "deregister failed");
        }
    }
}
