//! WebSocket transport built on tokio-tungstenite

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{bearer, Connector, Frame, Transport};
use crate::error::{Error, Result};

/// Connects to the monitoring server over ws:// or wss://
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, endpoint: &Url, credential: &str) -> Result<WsTransport> {
        let mut request = endpoint.as_str().into_client_request()?;

        let auth_value = HeaderValue::from_str(&bearer(credential))
            .map_err(|e| Error::Config(format!("invalid credential: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, auth_value);

        let (stream, response) = connect_async(request).await?;
        tracing::debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "WebSocket handshake complete"
        );

        Ok(WsTransport { stream })
    }
}

/// An open WebSocket connection
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        };
        self.stream.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => Frame::Text(text),
                // tungstenite queues the pong itself and flushes it on the
                // next read or write.
                Ok(Message::Ping(_)) => {
                    tracing::trace!("Ping received, pong queued by tungstenite");
                    continue;
                }
                Ok(Message::Pong(data)) => Frame::Pong(data),
                Ok(Message::Close(_)) => Frame::Close,
                Ok(Message::Binary(data)) => {
                    tracing::debug!(len = data.len(), "Ignoring binary frame");
                    continue;
                }
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e.into())),
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            // Already gone, nothing left to release
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
