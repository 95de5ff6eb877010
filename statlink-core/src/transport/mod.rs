//! Transport capability used by the connection channel
//!
//! The channel only needs to open a connection, exchange frames and close it.
//! Framing, TLS and the WebSocket handshake live behind [`Connector`] and
//! [`Transport`], so the reconnect logic can be driven by [`MockConnector`]
//! in tests and by [`WsConnector`] in production.

use std::future::Future;

use url::Url;

use crate::error::Result;

mod mock;
mod ws;

pub use mock::{ConnectAttempt, MockConnector, MockPeer};
pub use ws::{WsConnector, WsTransport};

/// One frame on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// An open, bidirectional connection
pub trait Transport: Send + 'static {
    /// Write one frame
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<()>> + Send;

    /// Read the next frame. `None` once the peer has gone away.
    ///
    /// Transports whose protocol stack answers pings on its own do not
    /// return `Frame::Ping`; the channel answers the pings it does see.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Frame>>> + Send;

    /// Close the connection and release its resources
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports to the monitoring server
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a connection to `endpoint`, authenticating with
    /// `Authorization: Bearer <credential>`
    fn connect(
        &self,
        endpoint: &Url,
        credential: &str,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Value of the `Authorization` header for a credential
pub fn bearer(credential: &str) -> String {
    format!("Bearer {}", credential)
}
