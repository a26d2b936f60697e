use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery attempts after which a failing message is dropped.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable per-user identifier, usually the phone number the user writes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SenderKey(pub String);

impl SenderKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Choice,
    Intent,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Choice => "choice",
            Self::Intent => "intent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "choice" => Some(Self::Choice),
            "intent" => Some(Self::Intent),
            _ => None,
        }
    }
}

/// Structured result of the external intent-resolution step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentEvent {
    pub kind: String,
    #[serde(default)]
    pub slots: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Text { body: String },
    Choice { option_id: String },
    Intent(IntentEvent),
}

impl MessagePayload {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn choice(option_id: impl Into<String>) -> Self {
        Self::Choice { option_id: option_id.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Choice { .. } => MessageKind::Choice,
            Self::Intent(_) => MessageKind::Intent,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub sender_key: SenderKey,
    pub payload: MessagePayload,
    pub kind: MessageKind,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl QueuedMessage {
    pub fn new(sender_key: SenderKey, payload: MessagePayload) -> Self {
        Self::received_at(sender_key, payload, Utc::now())
    }

    pub fn received_at(
        sender_key: SenderKey,
        payload: MessagePayload,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        let kind = payload.kind();
        Self { id: MessageId::generate(), sender_key, payload, kind, enqueued_at, attempts: 0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued { attempts: u32 },
    Dropped { attempts: u32 },
}

impl NackOutcome {
    /// Applies the attempt cap to a message that just failed `attempts_so_far` times.
    pub fn after_failure(attempts_so_far: u32, max_attempts: u32) -> Self {
        let attempts = attempts_so_far.saturating_add(1);
        if attempts < max_attempts {
            Self::Requeued { attempts }
        } else {
            Self::Dropped { attempts }
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub inflight: u64,
}
