//! Connection channel to the monitoring server
//!
//! A [`Channel`] owns one logical connection. Once [`Channel::connect`] is
//! called a background task keeps it alive:
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Open
//! Open --close & !terminated--> Disconnected --backoff--> Connecting
//! Open/Connecting --close & terminated--> Disconnected (task exits)
//! ```
//!
//! Every successful open resets the reconnect counter; every close bumps it
//! (capped at [`MAX_ATTEMPTS`](crate::retry::MAX_ATTEMPTS)) and waits
//! [`reconnect_delay`] before the next attempt. Lifecycle changes reach the
//! owner as [`ChannelEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{Error, Result};
use crate::retry::{reconnect_delay, RetryCounter};
use crate::transport::{Connector, Frame, Transport};

/// Lifecycle of the current transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Notification from the channel to its owner
#[derive(Debug)]
pub enum ChannelEvent {
    /// A transport opened
    Open,
    /// A text frame arrived
    Message(String),
    /// A transport closed, or a connection attempt ended without opening
    Closed,
    /// Transport failure. Refused connections carry the reconnect counter,
    /// see [`Error::connection_attempts`].
    Error(Error),
}

enum Command {
    Send {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Handle to a self-healing connection
pub struct Channel<C: Connector> {
    endpoint: Url,
    credential: String,
    connector: Arc<C>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Receiver<ConnectionState>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    terminated: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl<C: Connector> Channel<C> {
    /// Create a disconnected channel and the receiver for its events
    pub fn new(
        endpoint: Url,
        credential: impl Into<String>,
        connector: C,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(ConnectionState::Disconnected);
        let channel = Self {
            endpoint,
            credential: credential.into(),
            connector: Arc::new(connector),
            events,
            state,
            commands: None,
            terminated: Arc::new(AtomicBool::new(false)),
            task: None,
        };
        (channel, events_rx)
    }

    /// Start connecting. No-op while the channel is already running.
    pub fn connect(&mut self) {
        if self.is_running() {
            return;
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        // A fresh flag per run, so a stale task can never be revived.
        let terminated = Arc::new(AtomicBool::new(false));

        let task = ChannelTask {
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
            connector: Arc::clone(&self.connector),
            events: self.events.clone(),
            state: state_tx,
            commands: commands_rx,
            terminated: Arc::clone(&terminated),
            retry: RetryCounter::new(),
        };

        tracing::debug!(endpoint = %self.endpoint, "Starting monitoring channel");
        self.task = Some(tokio::spawn(task.run()));
        self.commands = Some(commands_tx);
        self.state = state_rx;
        self.terminated = terminated;
    }

    /// Whether the background task is alive (connecting, open or backing off)
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// True iff the current transport is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Send a text frame on the open transport.
    ///
    /// Callers are expected to check [`is_connected`](Self::is_connected)
    /// first; sending on a closed channel returns [`Error::NotConnected`].
    pub async fn notify(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let commands = self.commands.as_ref().ok_or(Error::Closed)?;

        let (ack, ack_rx) = oneshot::channel();
        commands
            .send(Command::Send { text, ack })
            .map_err(|_| Error::Closed)?;
        ack_rx.await.map_err(|_| Error::Closed)?
    }

    /// Close the current transport.
    ///
    /// With `terminate` set the channel stops for good: a pending reconnect is
    /// cancelled and this waits for the background task to exit. Without it
    /// the transport is dropped and the reconnect state machine takes over.
    pub async fn close(&mut self, terminate: bool) {
        if terminate {
            self.terminated.store(true, Ordering::SeqCst);
        }
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Close);
        }
        if !terminate {
            return;
        }

        self.commands = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Monitoring channel task failed");
            }
        }
    }
}

impl<C: Connector> Drop for Channel<C> {
    fn drop(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// State owned by the background task
struct ChannelTask<C: Connector> {
    endpoint: Url,
    credential: String,
    connector: Arc<C>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    terminated: Arc<AtomicBool>,
    retry: RetryCounter,
}

impl<C: Connector> ChannelTask<C> {
    async fn run(mut self) {
        while !self.is_terminated() {
            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                result = self.connector.connect(&self.endpoint, &self.credential) => Some(result),
                () = wait_for_close(&mut self.commands) => None,
            };

            match attempt {
                Some(Ok(transport)) => {
                    self.retry.reset();
                    self.set_state(ConnectionState::Open);
                    tracing::debug!(endpoint = %self.endpoint, "Monitoring channel open");
                    self.emit(ChannelEvent::Open);
                    self.serve(transport).await;
                }
                Some(Err(e)) => {
                    let error = e.with_connection_attempts(self.retry.get());
                    self.emit(ChannelEvent::Error(error));
                }
                None => tracing::debug!("Connection attempt abandoned"),
            }

            self.set_state(ConnectionState::Disconnected);
            self.emit(ChannelEvent::Closed);

            if self.is_terminated() {
                break;
            }

            self.retry.increment();
            let delay = reconnect_delay(self.retry.get());
            tracing::debug!(
                attempts = self.retry.get(),
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            self.backoff(delay).await;
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::debug!(endpoint = %self.endpoint, "Monitoring channel terminated");
    }

    /// Pump frames until the transport closes or a close is requested
    async fn serve(&mut self, mut transport: C::Transport) {
        loop {
            tokio::select! {
                frame = transport.recv() => match frame {
                    Some(Ok(Frame::Text(text))) => self.emit(ChannelEvent::Message(text)),
                    Some(Ok(Frame::Ping(data))) => {
                        if let Err(e) = transport.send(Frame::Pong(data)).await {
                            self.emit(ChannelEvent::Error(e));
                            break;
                        }
                    }
                    Some(Ok(Frame::Pong(_))) => tracing::trace!("Pong received"),
                    Some(Ok(Frame::Close)) | None => break,
                    Some(Err(e)) => {
                        self.emit(ChannelEvent::Error(e));
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send { text, ack }) => {
                        let result = transport.send(Frame::Text(text)).await;
                        let failed = result.is_err();
                        let _ = ack.send(result);
                        if failed {
                            break;
                        }
                    }
                    Some(Command::Close) | None => {
                        self.set_state(ConnectionState::Closing);
                        break;
                    }
                },
            }
        }

        // The handle is stale now; release it whatever state it is in.
        if let Err(e) = transport.close().await {
            tracing::debug!(error = %e, "Error while closing transport");
        }
    }

    /// Sleep before the next reconnect. Only a terminating close cuts it short.
    async fn backoff(&mut self, delay: std::time::Duration) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return,
                () = wait_for_close(&mut self.commands) => {
                    if self.is_terminated() {
                        return;
                    }
                }
            }
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ChannelEvent) {
        // Owner may have gone away; nothing to notify then.
        let _ = self.events.send(event);
    }
}

/// Resolve on the next close request. Sends arriving meanwhile are refused.
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Send { ack, .. }) => {
                let _ = ack.send(Err(Error::NotConnected));
            }
            Some(Command::Close) => return,
            // Handle dropped: nobody can close us anymore, keep backing off.
            None => std::future::pending::<()>().await,
        }
    }
}
