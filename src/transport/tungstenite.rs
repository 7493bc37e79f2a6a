//! Production WebSocket transport backed by `tokio-tungstenite`.

use super::{CloseInfo, Transport, TransportEvent, TransportFactory};
use crate::channel::ChannelSpec;
use crate::error::{LiveLinkError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Dials `ws://`/`wss://` endpoints, passing the bearer token as a query
/// parameter the way the backend expects.
#[derive(Debug, Default)]
pub struct WsTransportFactory;

impl WsTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn connect(
        &self,
        channel: &ChannelSpec,
        token: Option<&str>,
    ) -> Result<Box<dyn Transport>> {
        let base = channel.resolve_url();
        let url = match token {
            Some(token) if base.contains('?') => format!("{}&token={}", base, token),
            Some(token) => format!("{}?token={}", base, token),
            None => base,
        };

        log::debug!("[livelink] Dialing {} for channel '{}'", url, channel.channel_id);
        let (stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| LiveLinkError::Transport(format!("connection failed: {}", e)))?;

        Ok(Box::new(WsTransport { stream }))
    }
}

/// One live WebSocket connection.
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: &str) -> Result<()> {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| LiveLinkError::Transport(format!("send failed: {}", e)))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Frame(text.to_string());
                },
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return TransportEvent::Frame(text),
                    Err(_) => {
                        log::warn!("[livelink] Dropping non-UTF-8 binary frame");
                    },
                },
                Some(Ok(Message::Ping(payload))) => {
                    // Protocol-level keepalive from the server; answer and
                    // keep reading. Our own liveness probes are JSON text
                    // frames, not these.
                    let _ = self.stream.send(Message::Pong(payload)).await;
                },
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {},
                Some(Ok(Message::Close(frame))) => {
                    return TransportEvent::Closed(frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    }));
                },
                Some(Err(e)) => {
                    log::debug!("[livelink] WebSocket error: {}", e);
                    return TransportEvent::Closed(None);
                },
                None => {
                    return TransportEvent::Closed(None);
                },
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
