//! Transport connection abstraction
//!
//! The session core only needs a duplex frame connection: connect, send,
//! receive, close. [`Connector`] produces a [`Connection`] split into a
//! writing half and a reading half so the reader and writer actors can own
//! one each. [`TungsteniteConnector`] is the production implementation.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

/// Frame exchanged with the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// Text message (JSON data or `ping`/`pong`)
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// Protocol ping
    Ping(Vec<u8>),
    /// Protocol pong
    Pong(Vec<u8>),
}

impl WsMessage {
    /// Convenience constructor for text frames
    pub fn text(text: impl Into<String>) -> Self {
        WsMessage::Text(text.into())
    }
}

impl From<WsMessage> for Message {
    fn from(msg: WsMessage) -> Self {
        match msg {
            WsMessage::Text(text) => Message::Text(text),
            WsMessage::Binary(data) => Message::Binary(data),
            WsMessage::Ping(data) => Message::Ping(data),
            WsMessage::Pong(data) => Message::Pong(data),
        }
    }
}

/// Connection-level failure
///
/// A graceful close and an abrupt failure are distinct values so the
/// supervisor can log and report them differently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Peer closed the connection with a close frame or ended the stream
    #[error("connection closed by peer (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// Connection refused, reset, TLS or protocol failure
    #[error("connection failed: {0}")]
    Failed(String),

    /// No inbound frame within the idle timeout
    #[error("no frames received for {0:?}")]
    IdleTimeout(Duration),

    /// URL could not be used to open a connection
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Whether the peer ended the connection deliberately
    pub fn is_graceful(&self) -> bool {
        matches!(self, TransportError::Closed { .. })
    }
}

impl From<WsError> for TransportError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed {
                code: None,
                reason: "connection closed".to_string(),
            },
            WsError::Io(io_err) => TransportError::Failed(format!("IO error: {io_err}")),
            WsError::Tls(tls_err) => TransportError::Failed(format!("TLS error: {tls_err}")),
            WsError::Protocol(p) => TransportError::Failed(format!("Protocol error: {p}")),
            WsError::Url(u) => TransportError::InvalidUrl(u.to_string()),
            WsError::Http(resp) => {
                TransportError::Failed(format!("HTTP error: status {}", resp.status()))
            }
            WsError::HttpFormat(e) => TransportError::Failed(format!("HTTP format error: {e}")),
            e => TransportError::Failed(format!("WebSocket error: {e}")),
        }
    }
}

/// Writing half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame
    async fn send(&mut self, msg: WsMessage) -> Result<(), TransportError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reading half of a connection
#[async_trait]
pub trait FrameStream: Send {
    /// Wait for the next frame
    ///
    /// Must be cancel safe: dropping the future before it resolves must not
    /// lose a frame. A close frame or end of stream is reported as
    /// [`TransportError::Closed`].
    async fn receive(&mut self) -> Result<WsMessage, TransportError>;
}

/// One open connection, split for the reader and writer actors
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to a URL
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

// ============================================================================
// tokio-tungstenite implementation
// ============================================================================

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws_stream, _response) = connect_async(url).await?;
        let (sink, stream) = ws_stream.split();

        Ok(Connection {
            sink: Box::new(TungsteniteSink { sink }),
            stream: Box::new(TungsteniteStream { stream }),
        })
    }
}

struct TungsteniteSink {
    sink: WsSink,
}

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send(&mut self, msg: WsMessage) -> Result<(), TransportError> {
        self.sink.send(msg.into()).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}

struct TungsteniteStream {
    stream: WsStream,
}

#[async_trait]
impl FrameStream for TungsteniteStream {
    async fn receive(&mut self) -> Result<WsMessage, TransportError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(TransportError::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    })
                }
            };

            return match msg {
                Message::Text(text) => Ok(WsMessage::Text(text)),
                Message::Binary(data) => Ok(WsMessage::Binary(data)),
                Message::Ping(data) => Ok(WsMessage::Ping(data)),
                Message::Pong(data) => Ok(WsMessage::Pong(data)),
                Message::Close(frame) => Err(TransportError::Closed {
                    code: frame.as_ref().map(|f| u16::from(f.code)),
                    reason: frame
                        .map(|f| f.reason.into_owned())
                        .unwrap_or_default(),
                }),
                Message::Frame(_) => continue,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_message_into_tungstenite() {
        assert_eq!(
            Message::from(WsMessage::text("ping")),
            Message::Text("ping".to_string())
        );
        assert_eq!(
            Message::from(WsMessage::Binary(vec![1, 2, 3])),
            Message::Binary(vec![1, 2, 3])
        );
        assert_eq!(
            Message::from(WsMessage::Pong(vec![4])),
            Message::Pong(vec![4])
        );
    }

    #[test]
    fn test_transport_error_graceful() {
        let closed = TransportError::Closed {
            code: Some(1000),
            reason: "bye".to_string(),
        };
        assert!(closed.is_graceful());
        assert!(!TransportError::Failed("reset".to_string()).is_graceful());
        assert!(!TransportError::IdleTimeout(Duration::from_secs(30)).is_graceful());
    }

    #[test]
    fn test_transport_error_from_ws_error() {
        let err: TransportError = WsError::ConnectionClosed.into();
        assert!(err.is_graceful());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: TransportError = WsError::Io(io).into();
        assert!(matches!(err, TransportError::Failed(ref msg) if msg.contains("IO error")));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Closed {
            code: Some(4004),
            reason: "No data received in 30s.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connection closed by peer (code Some(4004)): No data received in 30s."
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 on localhost is not expected to accept WebSocket upgrades
        let result = TungsteniteConnector.connect("ws://127.0.0.1:9/ws").await;
        assert!(matches!(result, Err(TransportError::Failed(_))));
    }

    #[test]
    fn test_ws_message_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<WsMessage>();
        assert_sync::<WsMessage>();
        assert_send::<TransportError>();
        assert_sync::<TransportError>();
    }
}
