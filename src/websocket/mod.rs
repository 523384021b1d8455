//! WebSocket streaming session for OKX real-time channels
//!
//! [`WsClient`] keeps one logical streaming session alive across any number
//! of physical connections. It tracks which channels the caller wants in a
//! [`SubscriptionRegistry`], replays them on every reconnect, keeps the
//! connection alive with text `ping`/`pong`, and hands data frames to a
//! callback untouched.
//!
//! # Example
//!
//! ```ignore
//! use okx_sdk::websocket::{SubscriptionKey, WsClient};
//! use okx_sdk::Network;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! let root = CancellationToken::new();
//! let mut client = WsClient::public(Network::Live);
//! client.start(
//!     &root,
//!     |frame| println!("{}", String::from_utf8_lossy(&frame)),
//!     |err| eprintln!("{err}"),
//! )?;
//!
//! client
//!     .subscribe_and_wait(SubscriptionKey::trades("BTC-USDT"), Duration::from_secs(5))
//!     .await?;
//!
//! // ...
//! client.close().await?;
//! ```

mod client;
mod config;
mod dispatch;
mod message;
mod registry;
mod session;
mod subscription;
mod transport;
mod waiters;

#[cfg(test)]
mod mock;

pub use client::WsClient;
pub use config::{ReconnectConfig, SessionConfig};
pub use dispatch::{ControlCallback, DataCallback, ErrorCallback};
pub use message::{classify, ControlKind, InboundFrame, TEXT_PING, TEXT_PONG};
pub use registry::{SubscriptionEntry, SubscriptionRegistry, SubscriptionStatus};
pub use session::SessionState;
pub use subscription::{SubscriptionKey, SubscriptionOp, SubscriptionRequest};
pub use transport::{
    Connection, Connector, FrameSink, FrameStream, TransportError, TungsteniteConnector,
    WsMessage,
};
