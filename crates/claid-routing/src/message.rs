use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::RoutingError;
use crate::queue::SharedQueue;

/// Queue of messages shared between a router and the component draining it.
pub type MessageQueue = Arc<SharedQueue<Message>>;

/// Create an empty, open message queue.
pub fn message_queue() -> MessageQueue {
    Arc::new(SharedQueue::new())
}

/// Data carried by a message. The routing layer only ever looks at
/// [`type_tag`](Payload::type_tag); the contents are opaque to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Application-defined record, identified by its type name.
    Blob { type_name: String, data: Vec<u8> },
}

impl Payload {
    /// Type discriminator compared when channels agree on a payload type.
    pub fn type_tag(&self) -> &str {
        match self {
            Payload::Empty => "empty",
            Payload::Text(_) => "text",
            Payload::Number(_) => "number",
            Payload::Bool(_) => "bool",
            Payload::Bytes(_) => "bytes",
            Payload::Blob { type_name, .. } => type_name,
        }
    }
}

/// Administrative events injected by the transport and configuration layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    RemoteClientConnected,
    RemoteClientDisconnected,
    ConnectedToServer,
    DisconnectedFromServer,
    ReloadConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: ControlKind,
    /// Host the event is about (e.g. the client that connected).
    pub host: String,
    pub user_token: String,
}

/// Either application data or a control event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    Data(Payload),
    Control(ControlMessage),
}

/// The unit moved by the routing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier (UUID v4), used in log lines.
    pub id: String,
    /// Channel name as seen by the addressed Module.
    pub channel: String,
    pub source_host: String,
    pub source_module: String,
    pub target_host: String,
    pub target_module: String,
    /// Empty = every connected user of `target_host`.
    pub target_user_token: String,
    /// Creation timestamp (Unix milliseconds).
    pub timestamp: u64,
    pub body: Body,
}

impl Message {
    pub fn is_control(&self) -> bool {
        matches!(self.body, Body::Control(_))
    }

    pub fn control(&self) -> Option<&ControlMessage> {
        match &self.body {
            Body::Control(control) => Some(control),
            Body::Data(_) => None,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.body {
            Body::Data(payload) => Some(payload),
            Body::Control(_) => None,
        }
    }

    /// Type discriminator of the body; `"control"` for control messages.
    pub fn payload_tag(&self) -> &str {
        match &self.body {
            Body::Data(payload) => payload.type_tag(),
            Body::Control(_) => "control",
        }
    }

    pub fn source_address(&self) -> Address {
        Address::new(&self.source_host, &self.source_module)
    }

    pub fn target_address(&self) -> Address {
        Address::new(&self.target_host, &self.target_module)
    }

    /// Whether the message should reach every connected user of its target host.
    pub fn is_broadcast_to_users(&self) -> bool {
        self.target_user_token.is_empty()
    }
}

/// Builder for [`Message`]s.
///
/// ```rust
/// use claid_routing::{MessageBuilder, Payload};
///
/// let msg = MessageBuilder::new("temperature")
///     .source("phone:Sensor".parse().unwrap())
///     .target("server:Logger".parse().unwrap())
///     .payload(Payload::Number(21.5))
///     .build();
/// assert_eq!(msg.target_host, "server");
/// ```
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    channel: String,
    source: Address,
    target: Address,
    target_user_token: String,
    body: Body,
}

impl MessageBuilder {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            source: Address::default(),
            target: Address::default(),
            target_user_token: String::new(),
            body: Body::Data(Payload::Empty),
        }
    }

    pub fn source(mut self, source: Address) -> Self {
        self.source = source;
        self
    }

    pub fn target(mut self, target: Address) -> Self {
        self.target = target;
        self
    }

    /// Address a single user of the target host instead of all of them.
    pub fn user_token(mut self, token: impl Into<String>) -> Self {
        self.target_user_token = token.into();
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.body = Body::Data(payload);
        self
    }

    pub fn control(mut self, control: ControlMessage) -> Self {
        self.body = Body::Control(control);
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            channel: self.channel,
            source_host: self.source.host,
            source_module: self.source.module,
            target_host: self.target.host,
            target_module: self.target.module,
            target_user_token: self.target_user_token,
            timestamp: now_ms(),
            body: self.body,
        }
    }
}

// ── Addressing ─────────────────────────────────────────────────────────

/// A `host:module` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub host: String,
    pub module: String,
}

impl Address {
    pub fn new(host: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            module: module.into(),
        }
    }
}

impl FromStr for Address {
    type Err = RoutingError;

    /// Split on exactly one `:`; any other number of colons is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(module), None) => Ok(Self::new(host, module)),
            _ => Err(RoutingError::InvalidAddress {
                address: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.module)
    }
}

/// Current time in Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
