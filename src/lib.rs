//! OKX Rust SDK
//!
//! Streaming access to the OKX v5 WebSocket API:
//! - Subscription keys for public, business and private channels
//! - A session that survives disconnects and replays its subscriptions
//! - Acknowledged subscribe with deadline and cancellation

pub mod error;
pub mod types;
pub mod websocket;

pub use error::{Error, Result};
pub use types::*;
pub use websocket::{SessionConfig, SessionState, SubscriptionKey, WsClient};
