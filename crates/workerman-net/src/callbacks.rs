//! Application callbacks invoked by the worker.
//!
//! Callbacks are configured on a listener before `start` and reach each
//! worker through fork inheritance. The worker invokes them from its event
//! loop; they must not block.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::connection::Connection;
use crate::listener::Listener;

/// Invoked when a connection is accepted.
pub type ConnectCallback = Arc<dyn Fn(&mut Connection) + Send + Sync>;

/// Invoked with the raw bytes drained from a stream connection.
pub type MessageCallback = Arc<dyn Fn(&mut Connection, &[u8]) + Send + Sync>;

/// Invoked when a connection closes.
pub type CloseCallback = Arc<dyn Fn(&mut Connection) + Send + Sync>;

/// Invoked with one received datagram.
pub type DatagramCallback = Arc<dyn for<'a> Fn(Datagram<'a>) + Send + Sync>;

/// One received datagram with a reply handle. Datagrams do not enter the
/// worker's connection table.
pub struct Datagram<'a> {
    listener: &'a mut Listener,
    peer: SocketAddr,
    data: &'a [u8],
}

impl<'a> Datagram<'a> {
    pub fn new(listener: &'a mut Listener, peer: SocketAddr, data: &'a [u8]) -> Self {
        Self {
            listener,
            peer,
            data,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Replies to the sending peer.
    pub fn reply(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.listener.send_datagram(self.peer, data)
    }
}

/// The callback set carried by a listener.
#[derive(Default, Clone)]
pub struct ServerCallbacks {
    pub on_connect: Option<ConnectCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_close: Option<CloseCallback>,
    pub on_datagram: Option<DatagramCallback>,
}

impl ServerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(mut self, callback: impl Fn(&mut Connection) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn on_message(
        mut self,
        callback: impl Fn(&mut Connection, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl Fn(&mut Connection) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    pub fn on_datagram(
        mut self,
        callback: impl for<'a> Fn(Datagram<'a>) + Send + Sync + 'static,
    ) -> Self {
        self.on_datagram = Some(Arc::new(callback));
        self
    }
}
