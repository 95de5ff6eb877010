//! Adaptive statistics reporting over a [`Channel`]
//!
//! [`MonitoringService`] pulls statistics from the host on a timer and sends
//! them to the monitoring server as `LOG` envelopes. Each tick ends in a
//! [`TickOutcome`]; anything but [`TickOutcome::Sent`] bumps a failure
//! counter that stretches the next delay (see [`report_delay`]), and the first
//! successful send restores the configured interval.
//!
//! On every connection open the service sends one `SETTINGS` envelope
//! advertising `2 * interval` as the server-side staleness timeout. Inbound
//! `RESULT` envelopes are handed to the host as [`ServiceEvent::Result`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use statlink_core::{MonitoringService, ServiceConfig};
//!
//! # async fn run() -> statlink_core::Result<()> {
//! let config = ServiceConfig::new("ws://localhost:9001", "exampleToken")?;
//! let mut service = MonitoringService::new(config, || {
//!     Some(serde_json::json!({ "requestsCount": 10 }))
//! });
//! service.connect();
//! // ...
//! service.terminate().await;
//! # Ok(())
//! # }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{Channel, ChannelEvent};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::message::{Envelope, Inbound, MessageType};
use crate::retry::{report_delay, RetryCounter};
use crate::transport::{Connector, WsConnector};

/// Upper bound on the delay before the first tick after `connect()`
pub const INITIAL_TICK_DELAY: Duration = Duration::from_millis(100);

/// Host callback producing the statistics to report.
///
/// `Ok(None)` (or a JSON `null`) means there is nothing to report this tick.
pub trait StatsSource: Send + 'static {
    fn collect(&mut self) -> Result<Option<Value>>;
}

impl<F> StatsSource for F
where
    F: FnMut() -> Option<Value> + Send + 'static,
{
    fn collect(&mut self) -> Result<Option<Value>> {
        Ok(self())
    }
}

/// Notification from the service to its host
#[derive(Debug)]
pub enum ServiceEvent {
    /// Connection to the monitoring server opened
    Opened,
    /// Connection closed (or a connection attempt failed)
    Closed,
    /// The server sent a `RESULT` envelope
    Result(Value),
    /// Transport or protocol error
    Error(Error),
}

/// Result of one reporting tick
#[derive(Debug)]
pub enum TickOutcome {
    /// A `LOG` envelope was handed to the transport
    Sent,
    /// Nothing sent: channel not open, service stopping, or no data
    Skipped,
    /// Collecting, encoding or sending failed
    Failed(Error),
}

/// Update `retry` for a tick outcome and return the delay before the next tick
pub fn next_report_delay(
    outcome: &TickOutcome,
    retry: &mut RetryCounter,
    interval: Duration,
) -> Duration {
    match outcome {
        TickOutcome::Sent => retry.reset(),
        TickOutcome::Skipped | TickOutcome::Failed(_) => retry.increment(),
    }
    report_delay(retry.get(), interval)
}

enum Command {
    Send(Envelope),
    Terminate,
}

struct Running<C: Connector> {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<Scheduler<C>>,
}

/// Streams host statistics to a monitoring server
pub struct MonitoringService<C: Connector = WsConnector> {
    config: ServiceConfig,
    idle: Option<Scheduler<C>>,
    running: Option<Running<C>>,
    active: Arc<AtomicBool>,
    events: Option<mpsc::UnboundedReceiver<ServiceEvent>>,
}

impl MonitoringService<WsConnector> {
    /// Create a service reporting over WebSocket
    pub fn new(config: ServiceConfig, stats: impl StatsSource) -> Self {
        Self::with_connector(config, stats, WsConnector::new())
    }
}

impl<C: Connector> MonitoringService<C> {
    /// Create a service reporting over a custom transport
    pub fn with_connector(config: ServiceConfig, stats: impl StatsSource, connector: C) -> Self {
        let (channel, channel_events) = Channel::new(
            config.endpoint().clone(),
            config.credential(),
            connector,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(false));

        let scheduler = Scheduler {
            channel,
            channel_events,
            stats: Box::new(stats),
            interval: config.interval(),
            verbose: config.verbose(),
            retry: RetryCounter::new(),
            active: Arc::clone(&active),
            events: events_tx,
            connected: false,
        };

        Self {
            config,
            idle: Some(scheduler),
            running: None,
            active,
            events: Some(events_rx),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Take the host event stream. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServiceEvent>> {
        self.events.take()
    }

    /// Whether reporting is running (between `connect()` and `terminate()`)
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Connect the channel and start reporting. No-op while already running.
    pub fn connect(&mut self) {
        if self.running.is_some() {
            return;
        }
        let Some(scheduler) = self.idle.take() else {
            tracing::error!("Monitoring service cannot restart after a scheduler failure");
            return;
        };

        let (commands, commands_rx) = mpsc::unbounded_channel();
        self.active.store(true, Ordering::SeqCst);
        let task = tokio::spawn(scheduler.run(commands_rx));
        self.running = Some(Running { commands, task });
    }

    /// Send an envelope on the open connection.
    ///
    /// Silently dropped unless the service is running and the channel is
    /// open, so stray sends after `terminate()` are inert.
    pub fn send(&self, kind: MessageType, data: Value) {
        if !self.is_active() {
            return;
        }
        if let Some(running) = &self.running {
            let _ = running.commands.send(Command::Send(Envelope::new(kind, data)));
        }
    }

    /// Stop reporting and close the channel for good.
    ///
    /// Once this returns no tick or reconnect is scheduled, including one that
    /// was in flight when it was called. `connect()` may be called again.
    pub async fn terminate(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.commands.send(Command::Terminate);
        match running.task.await {
            Ok(scheduler) => self.idle = Some(scheduler),
            Err(e) => tracing::error!(error = %e, "Monitoring scheduler task failed"),
        }
    }
}

impl<C: Connector> Drop for MonitoringService<C> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(running) = &self.running {
            let _ = running.commands.send(Command::Terminate);
        }
    }
}

/// Reporting state owned by the background task
struct Scheduler<C: Connector> {
    channel: Channel<C>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    stats: Box<dyn StatsSource>,
    interval: Duration,
    verbose: bool,
    retry: RetryCounter,
    active: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ServiceEvent>,
    connected: bool,
}

impl<C: Connector> Scheduler<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Self {
        self.channel.connect();
        self.retry.reset();

        let next_tick = tokio::time::sleep(INITIAL_TICK_DELAY.min(self.interval));
        tokio::pin!(next_tick);

        loop {
            // Channel events first: an Open must be handled, and its SETTINGS
            // sent, before any tick or host send can use the new connection.
            tokio::select! {
                biased;

                Some(event) = self.channel_events.recv() => self.on_channel_event(event).await,
                command = commands.recv() => match command {
                    Some(Command::Send(envelope)) => {
                        if let Err(e) = self.send(envelope).await {
                            self.report_failure(&e);
                        }
                    }
                    Some(Command::Terminate) | None => break,
                },
                () = &mut next_tick => {
                    let outcome = self.tick().await;
                    if let TickOutcome::Failed(e) = &outcome {
                        self.report_failure(e);
                    }
                    let delay = next_report_delay(&outcome, &mut self.retry, self.interval);
                    if !self.is_active() {
                        break;
                    }
                    tracing::trace!(
                        attempts = self.retry.get(),
                        delay_ms = delay.as_millis() as u64,
                        "Next statistics tick scheduled"
                    );
                    next_tick.as_mut().reset(Instant::now() + delay);
                }
            }
        }

        self.active.store(false, Ordering::SeqCst);
        self.channel.close(true).await;
        while let Ok(event) = self.channel_events.try_recv() {
            self.on_channel_event(event).await;
        }
        self.connected = false;
        self
    }

    /// One reporting pass
    async fn tick(&mut self) -> TickOutcome {
        if !self.is_active() || !self.is_open() {
            return TickOutcome::Skipped;
        }

        let source = &mut self.stats;
        let collected = catch_unwind(AssertUnwindSafe(|| source.collect()))
            .unwrap_or_else(|_| Err(Error::Stats("statistics source panicked".to_string())));

        match collected {
            Ok(Some(stats)) if !stats.is_null() => match self.transmit(Envelope::log(stats)).await {
                Ok(()) => TickOutcome::Sent,
                Err(e) => TickOutcome::Failed(e),
            },
            Ok(_) => TickOutcome::Skipped,
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Guarded send: a no-op unless active and connected
    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        if !self.is_active() || !self.is_open() {
            tracing::trace!(kind = envelope.kind.as_str(), "Dropping envelope, not connected");
            return Ok(());
        }
        self.transmit(envelope).await
    }

    async fn transmit(&mut self, envelope: Envelope) -> Result<()> {
        let text = envelope.encode()?;
        self.channel.notify(text).await
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                self.connected = true;
                tracing::info!("Monitoring server connection opened");
                self.emit(ServiceEvent::Opened);

                let settings = Envelope::settings(self.interval);
                if let Err(e) = self.send(settings).await {
                    tracing::warn!(error = %e, "Failed to send settings to monitoring server");
                }
            }
            ChannelEvent::Message(text) => {
                if let Err(e) = self.on_message(&text) {
                    self.on_error(e);
                }
            }
            ChannelEvent::Closed => {
                if self.connected {
                    tracing::info!("Monitoring server connection closed");
                } else {
                    tracing::debug!("Monitoring server connection attempt ended");
                }
                self.connected = false;
                self.emit(ServiceEvent::Closed);
            }
            ChannelEvent::Error(e) => self.on_error(e),
        }
    }

    fn on_message(&mut self, text: &str) -> Result<()> {
        match Inbound::decode(text)? {
            Inbound::Result(data) => {
                tracing::info!("Monitoring server sent result");
                self.emit(ServiceEvent::Result(data));
            }
            Inbound::Unrecognized { kind, data } => {
                tracing::info!(kind = %kind, data = %data, "Unknown message type");
            }
        }
        Ok(())
    }

    fn on_error(&mut self, error: Error) {
        match error.connection_attempts() {
            Some(0) => tracing::warn!(error = %error, "Monitoring server refused connection"),
            Some(attempts) => {
                tracing::debug!(attempts, "Monitoring server still refusing connections")
            }
            None => tracing::warn!(error = %error, "Error on monitoring server connection"),
        }
        self.emit(ServiceEvent::Error(error));
    }

    fn report_failure(&self, error: &Error) {
        if self.verbose {
            tracing::warn!(error = %error, "Error on statistics sending");
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Open as far as the scheduler has seen: the channel reports an open
    /// transport and its `Open` event (and handshake) has been handled.
    fn is_open(&self) -> bool {
        self.connected && self.channel.is_connected()
    }

    fn emit(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }
}
