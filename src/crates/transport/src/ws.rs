//! Framed-JSON socket client
//!
//! Bidirectional transport for components that advertise the
//! WebSocket-class shape. Text frames carry JSON; `{type:"ping"}` probes
//! are answered with `{type:"pong"}` transparently so callers only ever
//! see data frames.

use crate::envelope::Frame;
use crate::{Result, TransportError};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// A connected framed-JSON socket
pub struct FramedSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: String,
}

impl FramedSocket {
    /// Connect to a framed-socket endpoint (`ws://host:port/path`)
    pub async fn connect(url: &str) -> Result<Self> {
        let (inner, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Unavailable(format!("Connect to {} failed: {}", url, e)))?;
        debug!(url, "Framed socket connected");
        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    /// Send a frame
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        self.inner
            .send(Message::Text(frame.to_text()))
            .await
            .map_err(|e| TransportError::ConnectionReset(format!("Send on {} failed: {}", self.url, e)))
    }

    /// Receive the next data frame
    ///
    /// Pings are answered inline; pongs are dropped. `None` means the peer
    /// closed the socket cleanly.
    pub async fn next_data(&mut self) -> Result<Option<Frame>> {
        loop {
            let message = match self.inner.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return Err(TransportError::ConnectionReset(format!(
                        "Receive on {} failed: {}",
                        self.url, e
                    )))
                }
                None => return Ok(None),
            };

            match message {
                Message::Text(text) => match Frame::from_text(&text)? {
                    Frame::Ping => self.send(Frame::Pong).await?,
                    Frame::Pong => continue,
                    data @ Frame::Data { .. } => return Ok(Some(data)),
                },
                Message::Ping(payload) => {
                    self.inner
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| TransportError::ConnectionReset(e.to_string()))?;
                }
                Message::Pong(_) => continue,
                Message::Close(_) => return Ok(None),
                Message::Binary(_) | Message::Frame(_) => {
                    return Err(TransportError::Protocol(
                        "Binary frames are not part of the framed-JSON shape".to_string(),
                    ))
                }
            }
        }
    }

    /// Close the socket
    pub async fn close(mut self) -> Result<()> {
        self.inner
            .close(None)
            .await
            .map_err(|e| TransportError::ConnectionReset(e.to_string()))
    }
}
