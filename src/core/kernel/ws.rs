use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::instrument;

type TungsteniteStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

/// Outbound half of a dialled connection
#[async_trait]
pub trait WsWriter: Send + 'static {
    async fn send(&mut self, message: Message) -> Result<(), ExchangeError>;

    async fn close(&mut self) -> Result<(), ExchangeError>;
}

/// Inbound half of a dialled connection
#[async_trait]
pub trait WsReader: Send + 'static {
    /// Next frame, `None` once the peer has gone away
    async fn next_frame(&mut self) -> Option<Result<Message, ExchangeError>>;
}

/// The raw transport a session dials.
///
/// Pure plumbing: no codec, no subscriptions, no reconnects.
#[async_trait]
pub trait WsTransport: Send + Sync + 'static {
    type Writer: WsWriter;
    type Reader: WsReader;

    async fn dial(&self) -> Result<(Self::Writer, Self::Reader), ExchangeError>;

    /// Where this transport connects, for diagnostics
    fn endpoint(&self) -> &str;
}

/// Tungstenite-based transport
#[derive(Debug, Clone)]
pub struct TungsteniteWs {
    url: String,
    config: WsConfig,
}

impl TungsteniteWs {
    pub fn new(url: String) -> Self {
        Self {
            url,
            config: WsConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }
}

pub struct TungsteniteWriter {
    sink: SplitSink<TungsteniteStream, Message>,
}

pub struct TungsteniteReader {
    stream: SplitStream<TungsteniteStream>,
}

#[async_trait]
impl WsTransport for TungsteniteWs {
    type Writer = TungsteniteWriter;
    type Reader = TungsteniteReader;

    #[instrument(skip(self), fields(url = %self.url))]
    async fn dial(&self) -> Result<(Self::Writer, Self::Reader), ExchangeError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (sink, stream) = ws_stream.split();
        Ok((TungsteniteWriter { sink }, TungsteniteReader { stream }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WsWriter for TungsteniteWriter {
    async fn send(&mut self, message: Message) -> Result<(), ExchangeError> {
        self.sink.send(message).await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to send WebSocket message: {}", e))
        })
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Failed to close WebSocket: {}", e)))
    }
}

#[async_trait]
impl WsReader for TungsteniteReader {
    async fn next_frame(&mut self) -> Option<Result<Message, ExchangeError>> {
        self.stream.next().await.map(|frame| {
            frame.map_err(|e| ExchangeError::NetworkError(format!("WebSocket error: {}", e)))
        })
    }
}
