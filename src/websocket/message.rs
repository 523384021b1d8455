//! Inbound frame classification
//!
//! Every text or binary frame is sorted into keep-alive, subscription
//! control, broadcast control, or data. Data frames are never re-encoded;
//! the original bytes travel on to the dispatch callback.

use serde::Deserialize;

use super::subscription::{SubscriptionKey, SubscriptionOp};

/// Text keep-alive sent by the client
pub const TEXT_PING: &str = "ping";
/// Text keep-alive reply from the server
pub const TEXT_PONG: &str = "pong";

/// Kinds of control broadcast that go to typed observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// Pushes on the `status` channel (system maintenance)
    Status,
    /// `notice` events, e.g. upcoming disconnect for a service upgrade
    Notice,
    /// `channel-conn-count` and `channel-conn-count-error` events
    ChannelConnCount,
    /// `login` replies
    Login,
}

/// Classification of one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text `ping` from the server
    Ping,
    /// Text `pong` from the server
    Pong,
    /// Subscribe or unsubscribe confirmed
    Ack {
        op: SubscriptionOp,
        id: Option<String>,
        key: Option<SubscriptionKey>,
    },
    /// Request rejected
    Error {
        id: Option<String>,
        code: String,
        msg: String,
    },
    /// Broadcast for a typed observer
    Control(ControlKind),
    /// Everything else
    Data,
}

/// The few fields needed to route a frame; everything else is skipped
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    arg: Option<Arg>,
}

#[derive(Debug, Deserialize)]
struct Arg {
    channel: String,
}

/// Classify a raw frame payload
pub fn classify(payload: &[u8]) -> InboundFrame {
    match payload {
        b"ping" => return InboundFrame::Ping,
        b"pong" => return InboundFrame::Pong,
        _ => {}
    }

    // Cheap pre-check so binary and plain-text data skip the JSON parser
    if payload.first() != Some(&b'{') {
        return InboundFrame::Data;
    }

    let envelope: Envelope = match serde_json::from_slice(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::trace!("Forwarding unparseable frame as data: {e}");
            return InboundFrame::Data;
        }
    };

    match envelope.event.as_deref() {
        Some("subscribe") => ack(SubscriptionOp::Subscribe, envelope.id, payload),
        Some("unsubscribe") => ack(SubscriptionOp::Unsubscribe, envelope.id, payload),
        Some("error") => InboundFrame::Error {
            id: envelope.id,
            code: envelope.code.unwrap_or_default(),
            msg: envelope.msg.unwrap_or_default(),
        },
        Some("notice") => InboundFrame::Control(ControlKind::Notice),
        Some("channel-conn-count") | Some("channel-conn-count-error") => {
            InboundFrame::Control(ControlKind::ChannelConnCount)
        }
        Some("login") => InboundFrame::Control(ControlKind::Login),
        Some(other) => {
            tracing::debug!("Forwarding frame with unknown event '{other}' as data");
            InboundFrame::Data
        }
        None => match envelope.arg {
            Some(arg) if arg.channel == "status" => InboundFrame::Control(ControlKind::Status),
            _ => InboundFrame::Data,
        },
    }
}

/// Acks echo the full argument; decode it as a key for correlation
fn ack(op: SubscriptionOp, id: Option<String>, payload: &[u8]) -> InboundFrame {
    #[derive(Deserialize)]
    struct AckFrame {
        #[serde(default)]
        arg: Option<SubscriptionKey>,
    }

    let key = serde_json::from_slice::<AckFrame>(payload)
        .ok()
        .and_then(|frame| frame.arg);
    InboundFrame::Ack { op, id, key }
}
