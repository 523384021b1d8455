//! Subscription keys and wire requests for the OKX WebSocket
//!
//! A [`SubscriptionKey`] names one stream: a channel plus whatever
//! discriminators the server needs to tell instances of that channel apart.
//! It serializes directly to the `arg` object used in requests and echoed in
//! acknowledgements.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::types::{CandleInterval, InstType};

// ============================================================================
// Subscription Key
// ============================================================================

/// Identifies one logical stream
///
/// Two keys with identical fields are the same subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKey {
    /// Channel name, e.g. `trades`, `books5`, `candle1H`
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_type: Option<InstType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uly: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ccy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprd_id: Option<String>,
}

impl SubscriptionKey {
    /// Create a key for a channel with no discriminators
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            inst_type: None,
            inst_family: None,
            inst_id: None,
            uly: None,
            ccy: None,
            sprd_id: None,
        }
    }

    /// Create a key for a channel scoped to one instrument
    pub fn for_instrument(channel: impl Into<String>, inst_id: impl Into<String>) -> Self {
        Self::new(channel).with_inst_id(inst_id)
    }

    pub fn with_inst_id(mut self, inst_id: impl Into<String>) -> Self {
        self.inst_id = Some(inst_id.into());
        self
    }

    pub fn with_inst_type(mut self, inst_type: InstType) -> Self {
        self.inst_type = Some(inst_type);
        self
    }

    pub fn with_inst_family(mut self, inst_family: impl Into<String>) -> Self {
        self.inst_family = Some(inst_family.into());
        self
    }

    pub fn with_uly(mut self, uly: impl Into<String>) -> Self {
        self.uly = Some(uly.into());
        self
    }

    pub fn with_ccy(mut self, ccy: impl Into<String>) -> Self {
        self.ccy = Some(ccy.into());
        self
    }

    pub fn with_sprd_id(mut self, sprd_id: impl Into<String>) -> Self {
        self.sprd_id = Some(sprd_id.into());
        self
    }

    // ========== Public Market Data ==========

    /// Trade stream for an instrument
    pub fn trades(inst_id: impl Into<String>) -> Self {
        Self::for_instrument("trades", inst_id)
    }

    /// Ticker stream for an instrument
    pub fn tickers(inst_id: impl Into<String>) -> Self {
        Self::for_instrument("tickers", inst_id)
    }

    /// Order book stream (`books`, `books5`, `bbo-tbt`, `books50-l2-tbt`, ...)
    pub fn books(depth_channel: impl Into<String>, inst_id: impl Into<String>) -> Self {
        Self::for_instrument(depth_channel, inst_id)
    }

    /// Best bid/offer, tick by tick
    pub fn bbo_tbt(inst_id: impl Into<String>) -> Self {
        Self::for_instrument("bbo-tbt", inst_id)
    }

    /// Candlestick stream (business endpoint)
    pub fn candle(interval: CandleInterval, inst_id: impl Into<String>) -> Self {
        Self::for_instrument(interval.channel(), inst_id)
    }

    /// Mark price stream
    pub fn mark_price(inst_id: impl Into<String>) -> Self {
        Self::for_instrument("mark-price", inst_id)
    }

    /// Funding rate stream (swaps)
    pub fn funding_rate(inst_id: impl Into<String>) -> Self {
        Self::for_instrument("funding-rate", inst_id)
    }

    /// Open interest stream
    pub fn open_interest(inst_id: impl Into<String>) -> Self {
        Self::for_instrument("open-interest", inst_id)
    }

    /// Instrument definition updates for an instrument type
    pub fn instruments(inst_type: InstType) -> Self {
        Self::new("instruments").with_inst_type(inst_type)
    }

    /// Option trades for an instrument family, e.g. `BTC-USD`
    pub fn option_trades(inst_family: impl Into<String>) -> Self {
        Self::new("option-trades")
            .with_inst_type(InstType::Option)
            .with_inst_family(inst_family)
    }

    /// Option summary for an instrument family
    pub fn opt_summary(inst_family: impl Into<String>) -> Self {
        Self::new("opt-summary").with_inst_family(inst_family)
    }

    /// Spread public trades (business endpoint)
    pub fn sprd_public_trades(sprd_id: impl Into<String>) -> Self {
        Self::new("sprd-public-trades").with_sprd_id(sprd_id)
    }

    /// System status broadcasts
    pub fn status() -> Self {
        Self::new("status")
    }

    // ========== Private Account Data ==========

    /// Account balance updates, optionally for one currency
    pub fn account(ccy: Option<&str>) -> Self {
        let key = Self::new("account");
        match ccy {
            Some(ccy) => key.with_ccy(ccy),
            None => key,
        }
    }

    /// Position updates for an instrument type
    pub fn positions(inst_type: InstType) -> Self {
        Self::new("positions").with_inst_type(inst_type)
    }

    /// Order updates for an instrument type
    pub fn orders(inst_type: InstType) -> Self {
        Self::new("orders").with_inst_type(inst_type)
    }

    /// Check if this key names a channel that requires login
    pub fn is_private(&self) -> bool {
        matches!(
            self.channel.as_str(),
            "account" | "positions" | "balance_and_position" | "orders" | "orders-algo"
                | "algo-advance" | "liquidation-warning" | "account-greeks" | "sprd-orders"
                | "sprd-trades"
        )
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channel)?;
        if let Some(inst_id) = &self.inst_id {
            write!(f, ":{inst_id}")?;
        }
        for extra in [&self.inst_family, &self.uly, &self.ccy, &self.sprd_id]
            .into_iter()
            .flatten()
        {
            write!(f, ":{extra}")?;
        }
        if let Some(inst_type) = self.inst_type {
            write!(f, ":{}", inst_type.as_str())?;
        }
        Ok(())
    }
}

/// Parses the compact `channel[:instId]` form, e.g. `trades:BTC-USDT`
impl FromStr for SubscriptionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel, inst_id) = match s.split_once(':') {
            Some((channel, inst_id)) => (channel.trim(), Some(inst_id.trim())),
            None => (s.trim(), None),
        };
        if channel.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "subscription key '{s}' has no channel"
            )));
        }
        match inst_id {
            Some("") => Err(Error::InvalidParameter(format!(
                "subscription key '{s}' has an empty instrument id"
            ))),
            Some(inst_id) => Ok(Self::for_instrument(channel, inst_id)),
            None => Ok(Self::new(channel)),
        }
    }
}

// ============================================================================
// Wire Requests
// ============================================================================

/// Operation named in a subscription request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionOp {
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for SubscriptionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionOp::Subscribe => write!(f, "subscribe"),
            SubscriptionOp::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

/// Subscribe/unsubscribe request frame
///
/// `{"id":"7","op":"subscribe","args":[{"channel":"trades","instId":"BTC-USDT"}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Client-chosen id echoed in the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub op: SubscriptionOp,
    pub args: Vec<SubscriptionKey>,
}

impl SubscriptionRequest {
    /// Create a subscribe request for one key
    pub fn subscribe(id: impl Into<String>, key: SubscriptionKey) -> Self {
        Self {
            id: Some(id.into()),
            op: SubscriptionOp::Subscribe,
            args: vec![key],
        }
    }

    /// Create an unsubscribe request for one key
    pub fn unsubscribe(id: impl Into<String>, key: SubscriptionKey) -> Self {
        Self {
            id: Some(id.into()),
            op: SubscriptionOp::Unsubscribe,
            args: vec![key],
        }
    }

    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
