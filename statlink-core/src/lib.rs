//! # statlink-core
//!
//! Core library for statlink - a resilient statistics reporter for
//! monitoring servers.
//!
//! This library provides:
//! - A self-healing WebSocket [`Channel`] with exponential reconnect backoff
//! - An adaptive [`MonitoringService`] that streams host statistics and slows
//!   down while the link is struggling
//! - Wire envelopes, configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Two components, stacked:
//! - **Channel:** owns one transport at a time, reconnects after every
//!   unexpected close, reports lifecycle changes as [`ChannelEvent`]s
//! - **Service:** ticks on a timer, pulls statistics from a [`StatsSource`],
//!   sends `LOG` envelopes, performs the `SETTINGS` handshake on every open
//!   and forwards `RESULT` envelopes to the host as [`ServiceEvent`]s
//!
//! ## Example
//!
//! ```rust,no_run
//! use statlink_core::{MonitoringService, ServiceConfig, ServiceEvent};
//! use std::time::Duration;
//!
//! # async fn run() -> statlink_core::Result<()> {
//! let config = ServiceConfig::new("ws://localhost:9001", "exampleToken")?
//!     .with_interval(Duration::from_secs(5))?;
//!
//! let mut service = MonitoringService::new(config, || {
//!     Some(serde_json::json!({ "requestsCount": 10, "loginsCount": 5 }))
//! });
//! let mut events = service.take_events().expect("events taken once");
//! service.connect();
//!
//! while let Some(event) = events.recv().await {
//!     if let ServiceEvent::Result(data) = event {
//!         println!("result: {data}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use channel::{Channel, ChannelEvent, ConnectionState};
pub use config::{Config, ServiceConfig};
pub use error::{Error, Result};
pub use message::{Envelope, ErrorType, Inbound, MessageType};
pub use retry::RetryCounter;
pub use service::{MonitoringService, ServiceEvent, StatsSource, TickOutcome};
pub use transport::{Connector, Frame, Transport, WsConnector};

// Public modules
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod retry;
pub mod service;
pub mod transport;
