//! Error types for the OKX SDK

use thiserror::Error;

use crate::websocket::{SubscriptionKey, TransportError};

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the OKX SDK
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid parameter error
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Connection-level failure (refused, reset, idle timeout)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server rejected a subscribe or unsubscribe request for one key
    #[error("Subscription to {key} rejected: {code} - {msg}")]
    Subscribe {
        key: SubscriptionKey,
        code: String,
        msg: String,
    },

    /// Server error reply that could not be attributed to a request
    #[error("API error: {code} - {msg}")]
    Api { code: String, msg: String },

    /// No acknowledgement arrived before the deadline
    #[error("Timed out waiting for {0} to be acknowledged")]
    Timeout(SubscriptionKey),

    /// The wait or the session was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The key was unsubscribed while a caller was waiting on it
    #[error("Subscription {0} was removed while waiting")]
    Unsubscribed(SubscriptionKey),

    /// The session has been closed and cannot be used any more
    #[error("Session closed")]
    SessionClosed,

    /// The reconnect budget ran out
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// `start` was called twice
    #[error("Session already started")]
    AlreadyStarted,
}

impl Error {
    /// Whether this error ends the session for good
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::SessionClosed | Error::RetriesExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_parameter() {
        let err = Error::InvalidParameter("channel must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid parameter: channel must not be empty"
        );
    }

    #[test]
    fn test_error_display_subscribe() {
        let err = Error::Subscribe {
            key: SubscriptionKey::trades("BTC-USDT"),
            code: "60018".to_string(),
            msg: "Wrong URL or channel".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Subscription to trades:BTC-USDT rejected: 60018 - Wrong URL or channel"
        );
    }

    #[test]
    fn test_error_display_api() {
        let err = Error::Api {
            code: "60012".to_string(),
            msg: "Invalid request".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 60012 - Invalid request");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout(SubscriptionKey::tickers("ETH-USDT"));
        assert_eq!(
            err.to_string(),
            "Timed out waiting for tickers:ETH-USDT to be acknowledged"
        );
    }

    #[test]
    fn test_error_display_retries_exhausted() {
        let err = Error::RetriesExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "Gave up reconnecting after 5 attempts");
    }

    #[test]
    fn test_error_from_transport() {
        let err: Error = TransportError::Failed("connection reset".to_string()).into();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().starts_with("Transport error:"));
    }

    #[test]
    fn test_error_display_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.to_string().starts_with("JSON error:"));
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::SessionClosed.is_fatal());
        assert!(Error::RetriesExhausted { attempts: 1 }.is_fatal());
        assert!(!Error::Cancelled.is_fatal());
        assert!(!Error::Timeout(SubscriptionKey::trades("BTC-USDT")).is_fatal());
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(Error::Cancelled)
        }

        assert_eq!(returns_ok().unwrap(), 42);
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
