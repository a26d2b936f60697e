use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::action::{CategoryKey, LocationRef, PendingActionId, TagNumber};
use crate::domain::message::{MessageId, SenderKey};
use crate::domain::session::FarmId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryPosition {
    pub farm_id: FarmId,
    pub location: LocationRef,
    pub category: CategoryKey,
    pub quantity: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
    /// Present on the farm and counted in its location's aggregate.
    Registered,
    Sold,
    Dead,
    InTransfer,
}

impl TagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Sold => "sold",
            Self::Dead => "dead",
            Self::InTransfer => "in_transfer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "registered" => Some(Self::Registered),
            "sold" => Some(Self::Sold),
            "dead" => Some(Self::Dead),
            "in_transfer" => Some(Self::InTransfer),
            _ => None,
        }
    }

    /// States from which a tag may be registered again (bought back, returned).
    pub fn allows_reregistration(&self) -> bool {
        matches!(self, Self::Sold | Self::InTransfer)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivestockTag {
    pub farm_id: FarmId,
    pub tag: TagNumber,
    pub category: CategoryKey,
    pub location: LocationRef,
    pub state: TagState,
    pub updated_at: DateTime<Utc>,
}

/// Signed change to one inventory position. Negative deltas are guarded by `quantity >= -delta`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDelta {
    pub location: LocationRef,
    pub category: CategoryKey,
    pub delta: i64,
}

impl PositionDelta {
    pub fn increment(location: LocationRef, category: CategoryKey, quantity: i64) -> Self {
        Self { location, category, delta: quantity }
    }

    pub fn decrement(location: LocationRef, category: CategoryKey, quantity: i64) -> Self {
        Self { location, category, delta: -quantity }
    }

    pub fn is_decrement(&self) -> bool {
        self.delta < 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagChange {
    /// Creates the tag, or revives one whose state allows re-registration.
    Register { tag: TagNumber, category: CategoryKey, location: LocationRef },
    /// Moves a registered tag, guarded on its current state, category and location.
    Transition {
        tag: TagNumber,
        category: CategoryKey,
        from_location: LocationRef,
        to_location: LocationRef,
        to_state: TagState,
    },
}

impl TagChange {
    pub fn tag(&self) -> &TagNumber {
        match self {
            Self::Register { tag, .. } | Self::Transition { tag, .. } => tag,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    StockMovement,
    LivestockTag,
    AgronomicEvent,
    Rainfall,
}

impl LedgerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StockMovement => "stock_movement",
            Self::LivestockTag => "livestock_tag",
            Self::AgronomicEvent => "agronomic_event",
            Self::Rainfall => "rainfall",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stock_movement" => Some(Self::StockMovement),
            "livestock_tag" => Some(Self::LivestockTag),
            "agronomic_event" => Some(Self::AgronomicEvent),
            "rainfall" => Some(Self::Rainfall),
            _ => None,
        }
    }
}

impl From<crate::domain::action::ActionType> for LedgerEventKind {
    fn from(value: crate::domain::action::ActionType) -> Self {
        use crate::domain::action::ActionType;
        match value {
            ActionType::StockMovement => Self::StockMovement,
            ActionType::LivestockTag => Self::LivestockTag,
            ActionType::AgronomicEvent => Self::AgronomicEvent,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEventId(pub String);

/// Ledger contents before the store assigns an id and timestamp.
///
/// Staged actions are keyed by their pending action, direct actions by the queued
/// message that carried them. Either key can be applied once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerDraft {
    pub sender_key: SenderKey,
    pub pending_action_id: Option<PendingActionId>,
    pub source_message_id: Option<MessageId>,
    pub kind: LedgerEventKind,
    pub summary: String,
    pub payload: serde_json::Value,
}

impl LedgerDraft {
    pub fn seal(self, farm_id: FarmId, occurred_at: DateTime<Utc>) -> LedgerEvent {
        let content_hash = content_hash(&farm_id, self.kind, &self.payload);
        LedgerEvent {
            id: LedgerEventId(Uuid::new_v4().to_string()),
            farm_id,
            sender_key: self.sender_key,
            pending_action_id: self.pending_action_id,
            source_message_id: self.source_message_id,
            kind: self.kind,
            summary: self.summary,
            payload: self.payload,
            content_hash,
            occurred_at,
        }
    }
}

/// Immutable trace of an applied action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: LedgerEventId,
    pub farm_id: FarmId,
    pub sender_key: SenderKey,
    pub pending_action_id: Option<PendingActionId>,
    pub source_message_id: Option<MessageId>,
    pub kind: LedgerEventKind,
    pub summary: String,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEvent {
    pub fn verify_hash(&self) -> bool {
        content_hash(&self.farm_id, self.kind, &self.payload) == self.content_hash
    }
}

fn content_hash(farm_id: &FarmId, kind: LedgerEventKind, payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(farm_id.0.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(payload.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Everything one confirmed action changes, applied as a single unit.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationPlan {
    pub farm_id: FarmId,
    pub deltas: Vec<PositionDelta>,
    pub tag_changes: Vec<TagChange>,
    pub ledger: LedgerDraft,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_event_hash_detects_payload_tampering() {
        let draft = LedgerDraft {
            sender_key: SenderKey::new("+5491100000003"),
            pending_action_id: None,
            source_message_id: Some(MessageId("msg-1".to_string())),
            kind: LedgerEventKind::Rainfall,
            summary: "rainfall 12 mm".to_string(),
            payload: serde_json::json!({ "millimeters": "12" }),
        };

        let mut event = draft.seal(FarmId("farm-1".to_string()), Utc::now());
        assert!(event.verify_hash());

        event.payload = serde_json::json!({ "millimeters": "120" });
        assert!(!event.verify_hash());
    }

    #[test]
    fn only_sold_and_in_transfer_tags_can_come_back() {
        assert!(TagState::Sold.allows_reregistration());
        assert!(TagState::InTransfer.allows_reregistration());
        assert!(!TagState::Dead.allows_reregistration());
        assert!(!TagState::Registered.allows_reregistration());
    }
}
