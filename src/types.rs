//! Shared types for the OKX API
//!
//! Network and endpoint selection plus the small enums that appear inside
//! subscription arguments.

use serde::{Deserialize, Serialize};

// ============================================================================
// Endpoints
// ============================================================================

/// Live public WebSocket URL
pub const LIVE_PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
/// Live private WebSocket URL
pub const LIVE_PRIVATE_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/private";
/// Live business WebSocket URL
pub const LIVE_BUSINESS_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/business";

/// Demo trading public WebSocket URL
pub const DEMO_PUBLIC_WS_URL: &str = "wss://wspap.okx.com:8443/ws/v5/public";
/// Demo trading private WebSocket URL
pub const DEMO_PRIVATE_WS_URL: &str = "wss://wspap.okx.com:8443/ws/v5/private";
/// Demo trading business WebSocket URL
pub const DEMO_BUSINESS_WS_URL: &str = "wss://wspap.okx.com:8443/ws/v5/business";

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Production trading
    #[default]
    Live,
    /// Demo (paper) trading
    Demo,
}

/// Which of the three streaming endpoints to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsEndpoint {
    /// Public market data
    #[default]
    Public,
    /// Account, order and position channels (requires login)
    Private,
    /// Candles, spread trading and other business channels
    Business,
}

impl Network {
    /// Get the WebSocket URL for an endpoint on this network
    pub fn ws_url(&self, endpoint: WsEndpoint) -> &'static str {
        match (self, endpoint) {
            (Network::Live, WsEndpoint::Public) => LIVE_PUBLIC_WS_URL,
            (Network::Live, WsEndpoint::Private) => LIVE_PRIVATE_WS_URL,
            (Network::Live, WsEndpoint::Business) => LIVE_BUSINESS_WS_URL,
            (Network::Demo, WsEndpoint::Public) => DEMO_PUBLIC_WS_URL,
            (Network::Demo, WsEndpoint::Private) => DEMO_PRIVATE_WS_URL,
            (Network::Demo, WsEndpoint::Business) => DEMO_BUSINESS_WS_URL,
        }
    }
}

// ============================================================================
// Subscription Argument Enums
// ============================================================================

/// Instrument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstType {
    Spot,
    Margin,
    Swap,
    Futures,
    Option,
    /// All instrument types (private channels only)
    Any,
}

impl InstType {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            InstType::Spot => "SPOT",
            InstType::Margin => "MARGIN",
            InstType::Swap => "SWAP",
            InstType::Futures => "FUTURES",
            InstType::Option => "OPTION",
            InstType::Any => "ANY",
        }
    }
}

/// Candlestick bar size
///
/// The candle channel name is `candle` followed by the bar, e.g. `candle1H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1H")]
    OneHour,
    #[serde(rename = "2H")]
    TwoHours,
    #[serde(rename = "4H")]
    FourHours,
    #[serde(rename = "6H")]
    SixHours,
    #[serde(rename = "12H")]
    TwelveHours,
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "3D")]
    ThreeDays,
    #[serde(rename = "1W")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl CandleInterval {
    /// Bar string as used by the API
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::ThreeMinutes => "3m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::ThirtyMinutes => "30m",
            CandleInterval::OneHour => "1H",
            CandleInterval::TwoHours => "2H",
            CandleInterval::FourHours => "4H",
            CandleInterval::SixHours => "6H",
            CandleInterval::TwelveHours => "12H",
            CandleInterval::OneDay => "1D",
            CandleInterval::ThreeDays => "3D",
            CandleInterval::OneWeek => "1W",
            CandleInterval::OneMonth => "1M",
        }
    }

    /// Channel name for this bar size
    pub fn channel(&self) -> String {
        format!("candle{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_urls() {
        assert_eq!(Network::Live.ws_url(WsEndpoint::Public), LIVE_PUBLIC_WS_URL);
        assert_eq!(
            Network::Live.ws_url(WsEndpoint::Business),
            LIVE_BUSINESS_WS_URL
        );
        assert_eq!(Network::Demo.ws_url(WsEndpoint::Private), DEMO_PRIVATE_WS_URL);
    }

    #[test]
    fn test_network_default_is_live() {
        assert_eq!(Network::default(), Network::Live);
        assert_eq!(WsEndpoint::default(), WsEndpoint::Public);
    }

    #[test]
    fn test_inst_type_serialization() {
        assert_eq!(serde_json::to_string(&InstType::Swap).unwrap(), "\"SWAP\"");
        let parsed: InstType = serde_json::from_str("\"OPTION\"").unwrap();
        assert_eq!(parsed, InstType::Option);
        assert_eq!(InstType::Futures.as_str(), "FUTURES");
    }

    #[test]
    fn test_candle_interval_channel() {
        assert_eq!(CandleInterval::OneHour.channel(), "candle1H");
        assert_eq!(CandleInterval::FifteenMinutes.channel(), "candle15m");
        assert_eq!(
            serde_json::to_string(&CandleInterval::OneDay).unwrap(),
            "\"1D\""
        );
    }
}
