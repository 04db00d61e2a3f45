//! Pusher protocol 7 frames.
//!
//! Every frame is a JSON object `{"event": .., "channel": .., "data": ..}`.
//! Servers encode `data` as a JSON string holding another JSON document;
//! some Pusher-compatible servers send the object inline, so both are
//! accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u8 = 7;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const ERROR: &str = "pusher:error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

/// Raw frame as it travels on the socket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// `data` as the string handed to event handlers.
    pub fn data_string(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// `data` decoded one level further when it is an embedded JSON string.
    fn data_value(&self) -> Value {
        match &self.data {
            Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub socket_id: String,
    /// Seconds of silence after which the client should ping.
    pub activity_timeout: u64,
}

/// How the client should react to a `pusher:error` or close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// 4000-4099: do not reconnect.
    Fatal,
    /// 4100-4199: reconnect after the usual delay.
    ReconnectWithDelay,
    /// 4200-4299: reconnect immediately.
    ReconnectNow,
}

impl ErrorAction {
    pub fn from_code(code: Option<u64>) -> Self {
        match code {
            Some(4000..=4099) => ErrorAction::Fatal,
            Some(4200..=4299) => ErrorAction::ReconnectNow,
            _ => ErrorAction::ReconnectWithDelay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: Option<u64>,
    pub message: String,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Connected(ConnectionInfo),
    Error(ServerError),
    Ping,
    Pong,
    SubscriptionSucceeded { channel: String },
    ChannelEvent { channel: String, event: String, data: String },
    Other { event: String },
}

const DEFAULT_ACTIVITY_TIMEOUT: u64 = 120;

impl From<Frame> for Inbound {
    fn from(frame: Frame) -> Self {
        match frame.event.as_str() {
            CONNECTION_ESTABLISHED => {
                let data = frame.data_value();
                Inbound::Connected(ConnectionInfo {
                    socket_id: data
                        .get("socket_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    activity_timeout: data
                        .get("activity_timeout")
                        .and_then(Value::as_u64)
                        .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT),
                })
            }
            ERROR => {
                let data = frame.data_value();
                Inbound::Error(ServerError {
                    code: data.get("code").and_then(Value::as_u64),
                    message: data
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            PING => Inbound::Ping,
            PONG => Inbound::Pong,
            SUBSCRIPTION_SUCCEEDED => Inbound::SubscriptionSucceeded {
                channel: frame.channel.unwrap_or_default(),
            },
            _ => {
                let data = frame.data_string();
                match frame.channel {
                    Some(channel) if !frame.event.starts_with("pusher") => Inbound::ChannelEvent {
                        channel,
                        event: frame.event,
                        data,
                    },
                    _ => Inbound::Other { event: frame.event },
                }
            }
        }
    }
}

fn outbound(event: &str, data: Value) -> String {
    serde_json::json!({ "event": event, "data": data }).to_string()
}

pub fn subscribe_frame(channel: &str) -> String {
    outbound(SUBSCRIBE, serde_json::json!({ "channel": channel }))
}

pub fn ping_frame() -> String {
    outbound(PING, serde_json::json!({}))
}

pub fn pong_frame() -> String {
    outbound(PONG, serde_json::json!({}))
}

/// Socket URL for an application key. `endpoint` replaces the
/// `wss://ws-<cluster>.pusher.com` part.
pub fn socket_url(key: &str, cluster: &str, endpoint: Option<&str>) -> String {
    let base = match endpoint {
        Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
        None => format!("wss://ws-{}.pusher.com", cluster),
    };
    format!(
        "{}/app/{}?protocol={}&client=firmware-ci&version={}",
        base,
        key,
        PROTOCOL_VERSION,
        env!("CARGO_PKG_VERSION")
    )
}
