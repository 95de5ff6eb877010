//! In-memory transport for exercising the channel without a server
//!
//! A [`MockConnector`] accepts connections by default and can be told to
//! refuse the next few attempts. Every accepted connection produces a
//! [`MockPeer`], the server side of that connection.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use super::{bearer, Connector, Frame, Transport};
use crate::error::{Error, Result};

/// Record of one call to [`Connector::connect`]
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub at: Instant,
    pub endpoint: Url,
    pub authorization: String,
}

#[derive(Default)]
struct State {
    refusals: usize,
    send_delay: Duration,
    attempts: Vec<ConnectAttempt>,
}

/// Scriptable [`Connector`]
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<State>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(State::default())),
            peers_tx,
            peers_rx: Arc::new(tokio::sync::Mutex::new(peers_rx)),
        }
    }

    /// Refuse the next `count` connection attempts with `ConnectionRefused`
    pub fn refuse_next(&self, count: usize) {
        self.lock().refusals += count;
    }

    /// Make every send on connections opened from now on take `delay`
    /// before the frame reaches the peer
    pub fn delay_sends(&self, delay: Duration) {
        self.lock().send_delay = delay;
    }

    /// Every connection attempt so far, accepted or not
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.lock().attempts.clone()
    }

    /// Wait for the next accepted connection
    pub async fn accepted(&self) -> MockPeer {
        let mut peers = self.peers_rx.lock().await;
        match peers.recv().await {
            Some(peer) => peer,
            // `self` holds a sender, so the queue never closes.
            None => std::future::pending().await,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A test that panicked while holding the lock already failed.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, endpoint: &Url, credential: &str) -> Result<MockTransport> {
        let (refuse, send_delay) = {
            let mut state = self.lock();
            state.attempts.push(ConnectAttempt {
                at: Instant::now(),
                endpoint: endpoint.clone(),
                authorization: bearer(credential),
            });
            let refuse = state.refusals > 0;
            if refuse {
                state.refusals -= 1;
            }
            (refuse, state.send_delay)
        };

        if refuse {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        };
        self.peers_tx.send(peer).map_err(|_| Error::Closed)?;

        Ok(MockTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
            send_delay,
            closed: false,
        })
    }
}

/// Client side of a mock connection
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<(Instant, Frame)>,
    send_delay: Duration,
    closed: bool,
}

impl Transport for MockTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        self.outbound
            .send((Instant::now(), frame))
            .map_err(|_| Error::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.inbound.close();
        Ok(())
    }
}

/// Server side of a mock connection
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Frame>>,
    outbound: mpsc::UnboundedReceiver<(Instant, Frame)>,
}

impl MockPeer {
    /// Deliver a frame to the client. Returns false once the client closed.
    pub fn push(&self, frame: Frame) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Deliver a text frame to the client
    pub fn push_text(&self, text: &str) -> bool {
        self.push(Frame::Text(text.to_string()))
    }

    /// Next frame written by the client, with the time it was written.
    /// `None` once the client side has been closed and drained.
    pub async fn next_frame(&mut self) -> Option<(Instant, Frame)> {
        self.outbound.recv().await
    }

    /// Next text frame written by the client, skipping control frames
    pub async fn next_text(&mut self) -> Option<(Instant, String)> {
        loop {
            match self.next_frame().await? {
                (at, Frame::Text(text)) => return Some((at, text)),
                _ => continue,
            }
        }
    }

    /// Frame already written by the client, if any
    pub fn try_next_frame(&mut self) -> Option<(Instant, Frame)> {
        self.outbound.try_recv().ok()
    }

    /// Drop the connection from the server side
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }
}
