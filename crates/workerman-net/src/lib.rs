//! # Workerman Net
//!
//! Listening sockets and accepted connections. A [`Listener`] owns one
//! listening address: it binds in the master (default) or per worker under
//! `SO_REUSEPORT`, and exposes opaque transport and protocol tags. The
//! protocol layer itself is an external collaborator; this crate only moves
//! bytes and invokes the application callbacks.

pub mod callbacks;
pub mod connection;
pub mod listener;

pub use callbacks::{Datagram, ServerCallbacks};
pub use connection::{Connection, ConnectionEvent};
pub use listener::{drop_competing_state, Listener, Protocol, SocketContext, Transport};
