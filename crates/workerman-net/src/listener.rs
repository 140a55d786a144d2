//! One listening address: bind, share, hand off, tear down.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::Path;

use mio::{Interest, Token};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Socket, Type};
use tracing::debug;

use workerman_common::{Error, Result};
use workerman_event::EventLoop;

use crate::callbacks::ServerCallbacks;
use crate::connection::Stream;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 102_400;

/// Transport of a listener. SSL is TCP at this layer; the handshake belongs
/// to the protocol collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
    Ssl,
    Unix,
}

impl Transport {
    pub fn is_stream(&self) -> bool {
        !matches!(self, Self::Udp)
    }
}

/// Application-protocol tag carried on every connection. Opaque here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Frame,
    Text,
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
    Raw,
}

/// Opaque bag of socket options passed through to the platform socket
/// layer (SSL certificates, etc). Interpreted by collaborators, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketContext {
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for SocketContext {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            options: HashMap::new(),
        }
    }
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

enum BoundSocket {
    Tcp(mio::net::TcpListener),
    Udp(mio::net::UdpSocket),
    Unix(mio::net::UnixListener),
}

/// One configured listening address.
///
/// Constructed before `start`; the configuration fields are immutable
/// afterwards. The runtime handle (`socket`) is populated by `build` in the
/// master or `build_in_worker` in each worker under `reuse_port`.
pub struct Listener {
    transport: Transport,
    address: String,
    context: SocketContext,
    protocol: Protocol,
    worker_count: usize,
    name: String,
    reuse_port: bool,
    callbacks: ServerCallbacks,
    socket: Option<BoundSocket>,
    accepting: bool,
}

impl Listener {
    pub fn new(transport: Transport, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            context: SocketContext::default(),
            protocol: Protocol::Raw,
            worker_count: 1,
            name: "none".to_string(),
            reuse_port: false,
            callbacks: ServerCallbacks::default(),
            socket: None,
            accepting: false,
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_reuse_port(mut self, reuse_port: bool) -> Self {
        self.reuse_port = reuse_port;
        self
    }

    pub fn with_context(mut self, context: SocketContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_callbacks(mut self, callbacks: ServerCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reuse_port(&self) -> bool {
        self.reuse_port
    }

    pub fn callbacks(&self) -> &ServerCallbacks {
        &self.callbacks
    }

    pub fn is_bound(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// The actual bound address, which differs from the configured one for
    /// port-0 binds. Falls back to the configured address string.
    pub fn bound_address(&self) -> String {
        match &self.socket {
            Some(BoundSocket::Tcp(listener)) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| self.address.clone()),
            Some(BoundSocket::Udp(socket)) => socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| self.address.clone()),
            _ => self.address.clone(),
        }
    }

    /// Binds in the master. Skipped under `reuse_port`, where each worker
    /// binds its own socket instead. Idempotent per process.
    pub fn build(&mut self) -> Result<()> {
        if self.reuse_port || self.socket.is_some() {
            return Ok(());
        }
        self.socket = Some(self.open_socket(false)?);
        debug!(name = %self.name, address = %self.bound_address(), "listener bound in master");
        Ok(())
    }

    /// Binds inside a worker with `SO_REUSEPORT`, letting the kernel
    /// balance accepts across workers. Idempotent per process.
    pub fn build_in_worker(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        self.socket = Some(self.open_socket(true)?);
        debug!(name = %self.name, address = %self.bound_address(), "listener bound in worker");
        Ok(())
    }

    fn open_socket(&self, reuse_port: bool) -> Result<BoundSocket> {
        match self.transport {
            Transport::Tcp | Transport::Ssl => {
                let addr = self.parse_socket_addr()?;
                let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)
                    .map_err(|e| Error::bind(&self.address, e))?;
                socket
                    .set_reuse_address(true)
                    .map_err(|e| Error::bind(&self.address, e))?;
                if reuse_port {
                    socket
                        .set_reuse_port(true)
                        .map_err(|e| Error::bind(&self.address, e))?;
                }
                socket
                    .set_nonblocking(true)
                    .map_err(|e| Error::bind(&self.address, e))?;
                socket
                    .bind(&addr.into())
                    .map_err(|e| Error::bind(&self.address, e))?;
                socket
                    .listen(self.context.backlog)
                    .map_err(|e| Error::bind(&self.address, e))?;
                let std_listener: std::net::TcpListener = socket.into();
                Ok(BoundSocket::Tcp(mio::net::TcpListener::from_std(
                    std_listener,
                )))
            }
            Transport::Udp => {
                let addr = self.parse_socket_addr()?;
                let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, None)
                    .map_err(|e| Error::bind(&self.address, e))?;
                if reuse_port {
                    socket
                        .set_reuse_port(true)
                        .map_err(|e| Error::bind(&self.address, e))?;
                }
                socket
                    .set_nonblocking(true)
                    .map_err(|e| Error::bind(&self.address, e))?;
                socket
                    .bind(&addr.into())
                    .map_err(|e| Error::bind(&self.address, e))?;
                let std_socket: std::net::UdpSocket = socket.into();
                Ok(BoundSocket::Udp(mio::net::UdpSocket::from_std(std_socket)))
            }
            Transport::Unix => {
                let path = Path::new(&self.address);
                // A previous run may have left the socket file behind.
                let _ = std::fs::remove_file(path);
                let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
                    .map_err(|e| Error::bind(&self.address, e))?;
                socket
                    .set_nonblocking(true)
                    .map_err(|e| Error::bind(&self.address, e))?;
                let addr = socket2::SockAddr::unix(path).map_err(|e| Error::bind(&self.address, e))?;
                socket
                    .bind(&addr)
                    .map_err(|e| Error::bind(&self.address, e))?;
                socket
                    .listen(self.context.backlog)
                    .map_err(|e| Error::bind(&self.address, e))?;
                let std_listener: std::os::unix::net::UnixListener = socket.into();
                Ok(BoundSocket::Unix(mio::net::UnixListener::from_std(
                    std_listener,
                )))
            }
        }
    }

    fn parse_socket_addr(&self) -> Result<SocketAddr> {
        self.address
            .parse()
            .map_err(|e| Error::bind(&self.address, format!("invalid address: {e}")))
    }

    /// Registers the accept source on the worker's event loop.
    pub fn resume_accept(&mut self, event_loop: &mut EventLoop) -> Result<Token> {
        let token = match self.socket.as_mut() {
            Some(BoundSocket::Tcp(listener)) => event_loop.register(listener, Interest::READABLE)?,
            Some(BoundSocket::Udp(socket)) => event_loop.register(socket, Interest::READABLE)?,
            Some(BoundSocket::Unix(listener)) => {
                event_loop.register(listener, Interest::READABLE)?
            }
            None => {
                return Err(Error::bind(&self.address, "listener is not bound"));
            }
        };
        self.accepting = true;
        Ok(token)
    }

    /// Removes the accept source from the event loop. A drained listener
    /// stops seeing new connections while existing ones run on.
    pub fn pause_accept(&mut self, event_loop: &mut EventLoop) -> Result<()> {
        if !self.accepting {
            return Ok(());
        }
        match self.socket.as_mut() {
            Some(BoundSocket::Tcp(listener)) => event_loop.deregister(listener)?,
            Some(BoundSocket::Udp(socket)) => event_loop.deregister(socket)?,
            Some(BoundSocket::Unix(listener)) => event_loop.deregister(listener)?,
            None => {}
        }
        self.accepting = false;
        Ok(())
    }

    /// Accepts one pending connection. `Ok(None)` means the queue was empty
    /// (the thundering-herd loss case under `reuse_port`): return silently.
    pub fn accept(&mut self) -> io::Result<Option<(Stream, String)>> {
        match self.socket.as_mut() {
            Some(BoundSocket::Tcp(listener)) => match listener.accept() {
                Ok((stream, peer)) => Ok(Some((Stream::Tcp(stream), peer.to_string()))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            },
            Some(BoundSocket::Unix(listener)) => match listener.accept() {
                Ok((stream, _peer)) => Ok(Some((Stream::Unix(stream), self.address.clone()))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            },
            Some(BoundSocket::Udp(_)) | None => Ok(None),
        }
    }

    /// Receives one datagram. `Ok(None)` when the socket is drained or the
    /// listener is not UDP.
    pub fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<Option<(SocketAddr, usize)>> {
        match self.socket.as_mut() {
            Some(BoundSocket::Udp(socket)) => match socket.recv_from(buf) {
                Ok((len, peer)) => Ok(Some((peer, len))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            },
            _ => Ok(None),
        }
    }

    /// Replies to a datagram peer.
    pub fn send_datagram(&mut self, peer: SocketAddr, data: &[u8]) -> io::Result<usize> {
        match self.socket.as_mut() {
            Some(BoundSocket::Udp(socket)) => socket.send_to(data, peer),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a datagram listener",
            )),
        }
    }

    /// Closes the listening socket. Idempotent. For unix sockets the path
    /// is removed as well.
    pub fn teardown(&mut self) {
        if self.socket.take().is_some() {
            self.accepting = false;
            if self.transport == Transport::Unix {
                let _ = std::fs::remove_file(&self.address);
            }
            debug!(name = %self.name, address = %self.address, "listener torn down");
        }
    }
}

/// Post-fork hygiene: a worker claims one listener and releases the
/// inherited fds of every other, so only the assigned worker accepts on
/// each socket.
pub fn drop_competing_state(listeners: &mut [Listener], claimed_index: usize) {
    for (index, listener) in listeners.iter_mut().enumerate() {
        if index != claimed_index {
            listener.teardown();
        }
    }
}
