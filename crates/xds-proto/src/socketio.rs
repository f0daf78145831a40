//! Socket.IO framing of the event channel.
//!
//! The agent serves events over Engine.IO (protocol 3) on a WebSocket
//! transport. Each text frame is one [`EnginePacket`]; `message` packets carry
//! a [`SocketPacket`], and Socket.IO `event` packets carry the
//! `[name, payload]` pair that becomes an [`EventEnvelope`].
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":60000}   open
//! 40                                                      connect "/"
//! 42["exec:output",{"cmdID":"..","stdout":".."}]          event
//! 2 / 3                                                   ping / pong
//! 41                                                      disconnect
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventEnvelope;
use crate::ProtoError;

/// Engine.IO protocol revision spoken by the agent.
pub const ENGINE_IO_VERSION: u8 = 3;

/// Mount point of the Socket.IO endpoint on the agent.
pub const SOCKET_IO_PATH: &str = "/socket.io/";

/// Default namespace.
pub const ROOT_NAMESPACE: &str = "/";

const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 60_000;

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id (unrelated to the REST session id).
    pub sid: String,
    /// Transports the server would upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between heartbeats.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Milliseconds without traffic after which the peer is gone.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

const fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

const fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

/// One Engine.IO text packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session opened.
    Open(OpenHandshake),
    /// Session closed by the sender.
    Close,
    /// Heartbeat request, with optional probe data.
    Ping(String),
    /// Heartbeat answer.
    Pong(String),
    /// Socket.IO payload.
    Message(SocketPacket),
    /// Transport upgrade.
    Upgrade,
    /// No operation.
    Noop,
}

impl EnginePacket {
    /// Parses one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Decoding`] for an empty frame, an unknown packet
    /// type or a malformed payload.
    pub fn parse(frame: &str) -> Result<Self, ProtoError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ProtoError::Decoding("empty engine.io packet".into()))?;
        let body = chars.as_str();

        Ok(match kind {
            '0' => Self::Open(serde_json::from_str(body)?),
            '1' => Self::Close,
            '2' => Self::Ping(body.to_string()),
            '3' => Self::Pong(body.to_string()),
            '4' => Self::Message(SocketPacket::parse(body)?),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            other => {
                return Err(ProtoError::Decoding(format!(
                    "unknown engine.io packet type {other:?}"
                )))
            }
        })
    }

    /// Encodes the packet as one text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => format!(
                "0{}",
                serde_json::to_string(handshake).unwrap_or_default()
            ),
            Self::Close => "1".into(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(packet) => format!("4{}", packet.encode()),
            Self::Upgrade => "5".into(),
            Self::Noop => "6".into(),
        }
    }
}

/// One Socket.IO packet, carried in an Engine.IO `message`.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace joined.
    Connect(String),
    /// Namespace left.
    Disconnect(String),
    /// Named event with its arguments.
    Event {
        /// Namespace the event belongs to.
        namespace: String,
        /// Event name.
        name: String,
        /// Arguments after the name.
        args: Vec<Value>,
    },
    /// Acknowledgement of an event sent by the peer.
    Ack(String),
    /// Namespace-level error.
    Error(String),
    /// Binary event or ack. Never used by the agent.
    Binary,
}

impl SocketPacket {
    /// Parses the body of an Engine.IO `message`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Decoding`] for an unknown packet type or an event
    /// whose payload is not `[name, ...]`.
    pub fn parse(body: &str) -> Result<Self, ProtoError> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ProtoError::Decoding("empty socket.io packet".into()))?;
        if matches!(kind, '5' | '6') {
            return Ok(Self::Binary);
        }

        let (namespace, rest) = split_namespace(chars.as_str());
        // Acknowledgement id, unused: the client never acks.
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

        Ok(match kind {
            '0' => Self::Connect(namespace),
            '1' => Self::Disconnect(namespace),
            '2' => {
                let mut args: Vec<Value> = serde_json::from_str(rest)?;
                if args.is_empty() {
                    return Err(ProtoError::Decoding("event without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ProtoError::Decoding(format!(
                            "event name must be a string, got {other}"
                        )))
                    }
                };
                Self::Event {
                    namespace,
                    name,
                    args,
                }
            }
            '3' => Self::Ack(namespace),
            '4' => Self::Error(match serde_json::from_str::<Value>(rest) {
                Ok(Value::String(message)) => message,
                Ok(other) => other.to_string(),
                Err(_) => rest.to_string(),
            }),
            other => {
                return Err(ProtoError::Decoding(format!(
                    "unknown socket.io packet type {other:?}"
                )))
            }
        })
    }

    /// Encodes the packet body (without the Engine.IO `4` prefix).
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Connect(namespace) => format!("0{}", bare_namespace(namespace)),
            Self::Disconnect(namespace) => format!("1{}", bare_namespace(namespace)),
            Self::Event {
                namespace,
                name,
                args,
            } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                format!("2{}{}", namespace_prefix(namespace), Value::Array(items))
            }
            Self::Ack(namespace) => format!("3{}[]", namespace_prefix(namespace)),
            Self::Error(message) => format!("4{}", Value::String(message.clone())),
            Self::Binary => "5".into(),
        }
    }

    /// Event envelope for an `event` packet, `None` for any other packet.
    ///
    /// `event:*` notices arrive as full `{type, time, data}` envelopes, command
    /// notices as bare payloads.
    #[must_use]
    pub fn into_envelope(self) -> Option<EventEnvelope> {
        let Self::Event { name, args, .. } = self else {
            return None;
        };
        let data = args.into_iter().next().unwrap_or(Value::Null);

        let wrapped = data.get("type").and_then(Value::as_str) == Some(name.as_str())
            && data.get("data").is_some();
        if wrapped {
            if let Ok(envelope) = EventEnvelope::deserialize(&data) {
                return Some(envelope);
            }
        }

        let time = data
            .get("timestamp")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let mut envelope = EventEnvelope::new(name, data);
        if let Some(time) = time {
            envelope.time = time;
        }
        Some(envelope)
    }
}

/// Text frame carrying event `name` with `data`, as the agent emits it.
#[must_use]
pub fn event_frame(name: &str, data: Value) -> String {
    EnginePacket::Message(SocketPacket::Event {
        namespace: ROOT_NAMESPACE.into(),
        name: name.into(),
        args: vec![data],
    })
    .encode()
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (ROOT_NAMESPACE.into(), rest);
    }
    match rest.split_once(',') {
        Some((namespace, tail)) => (namespace.to_string(), tail),
        None => (rest.to_string(), ""),
    }
}

fn bare_namespace(namespace: &str) -> &str {
    if namespace == ROOT_NAMESPACE {
        ""
    } else {
        namespace
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == ROOT_NAMESPACE {
        String::new()
    } else {
        format!("{namespace},")
    }
}
