//! Error types for statlink-core

use thiserror::Error;

/// Main error type for the statlink-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol or handshake error
    #[error("websocket error: {0}")]
    WebSocket(#[source] tokio_tungstenite::tungstenite::Error),

    /// The monitoring server refused the connection.
    ///
    /// `attempts` is the channel's reconnect counter when the refusal was
    /// observed: 0 for the first refusal of an outage, > 0 for repeats.
    #[error("connection refused (reconnect attempts: {attempts})")]
    ConnectionRefused {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// A frame was sent while the channel was not open
    #[error("channel is not connected")]
    NotConnected,

    /// The channel task has stopped
    #[error("channel closed")]
    Closed,

    /// Statistics source failed to produce a payload
    #[error("statistics source error: {0}")]
    Stats(String),
}

impl Error {
    /// Whether this error reports a refused TCP connection.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Error::ConnectionRefused { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }

    /// Attach the current reconnect counter to a refused connection.
    ///
    /// Other errors are returned untouched.
    pub fn with_connection_attempts(self, attempts: u32) -> Self {
        match self {
            Error::Io(source) if source.kind() == std::io::ErrorKind::ConnectionRefused => {
                Error::ConnectionRefused { attempts, source }
            }
            Error::ConnectionRefused { source, .. } => Error::ConnectionRefused { attempts, source },
            other => other,
        }
    }

    /// Reconnect counter carried by a refused connection, if any.
    pub fn connection_attempts(&self) -> Option<u32> {
        match self {
            Error::ConnectionRefused { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

// I/O failures keep their own variant so refusals can be recognized.
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        match error {
            tokio_tungstenite::tungstenite::Error::Io(e) => Error::Io(e),
            other => Error::WebSocket(other),
        }
    }
}

/// Result type alias for statlink-core
pub type Result<T> = std::result::Result<T, Error>;
