use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::message::SenderKey;
use crate::domain::session::FarmId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationRef(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryKey(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagNumber(pub String);

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TagNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action families that must be staged and confirmed before they touch shared data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    StockMovement,
    LivestockTag,
    AgronomicEvent,
}

impl ActionType {
    pub const ALL: [ActionType; 3] =
        [ActionType::StockMovement, ActionType::LivestockTag, ActionType::AgronomicEvent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StockMovement => "stock_movement",
            Self::LivestockTag => "livestock_tag",
            Self::AgronomicEvent => "agronomic_event",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stock_movement" => Some(Self::StockMovement),
            "livestock_tag" => Some(Self::LivestockTag),
            "agronomic_event" => Some(Self::AgronomicEvent),
            _ => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovementKind {
    Receive,
    Consume,
    Transfer { to_location: LocationRef, to_category: Option<CategoryKey> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub kind: MovementKind,
    pub location: LocationRef,
    pub category: CategoryKey,
    pub quantity: i64,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "to", content = "id", rename_all = "snake_case")]
pub enum TransferDestination {
    Location(LocationRef),
    Farm(FarmId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TagActionKind {
    InitialStock,
    Birth,
    Purchase,
    Sale,
    Death,
    Transfer { destination: TransferDestination },
}

impl TagActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::InitialStock => "initial stock",
            Self::Birth => "birth",
            Self::Purchase => "purchase",
            Self::Sale => "sale",
            Self::Death => "death",
            Self::Transfer { .. } => "transfer",
        }
    }

    /// Whether the action brings new animals onto the farm.
    pub fn registers_tags(&self) -> bool {
        matches!(self, Self::InitialStock | Self::Birth | Self::Purchase)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivestockTagAction {
    pub kind: TagActionKind,
    pub category: CategoryKey,
    pub location: LocationRef,
    pub tags: Vec<TagNumber>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgronomicKind {
    Sowing,
    Fertilization,
    Spraying,
    Harvest,
}

impl AgronomicKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sowing => "sowing",
            Self::Fertilization => "fertilization",
            Self::Spraying => "spraying",
            Self::Harvest => "harvest",
        }
    }

    /// Harvests add to stock; every other event draws supplies from it.
    pub fn produces_stock(&self) -> bool {
        matches!(self, Self::Harvest)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub location: LocationRef,
    pub category: CategoryKey,
    pub quantity: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgronomicEvent {
    pub kind: AgronomicKind,
    pub plot: LocationRef,
    pub stock: Option<StockLine>,
    pub note: Option<String>,
}

/// A parameterized action awaiting confirm/cancel. One variant per action family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagedAction {
    StockMovement(StockMovement),
    LivestockTag(LivestockTagAction),
    AgronomicEvent(AgronomicEvent),
}

impl StagedAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::StockMovement(_) => ActionType::StockMovement,
            Self::LivestockTag(_) => ActionType::LivestockTag,
            Self::AgronomicEvent(_) => ActionType::AgronomicEvent,
        }
    }

    /// One-line human summary used in confirmation prompts and ledger events.
    pub fn summary(&self) -> String {
        match self {
            Self::StockMovement(movement) => match &movement.kind {
                MovementKind::Receive => format!(
                    "receive {} {} at {}",
                    movement.quantity, movement.category, movement.location
                ),
                MovementKind::Consume => format!(
                    "consume {} {} from {}",
                    movement.quantity, movement.category, movement.location
                ),
                MovementKind::Transfer { to_location, to_category } => format!(
                    "transfer {} {} from {} to {} ({})",
                    movement.quantity,
                    movement.category,
                    movement.location,
                    to_location,
                    to_category.as_ref().unwrap_or(&movement.category)
                ),
            },
            Self::LivestockTag(action) => {
                let destination = match &action.kind {
                    TagActionKind::Transfer { destination: TransferDestination::Location(to) } => {
                        format!(" to {to}")
                    }
                    TagActionKind::Transfer { destination: TransferDestination::Farm(farm) } => {
                        format!(" to farm {}", farm.0)
                    }
                    _ => String::new(),
                };
                format!(
                    "{} of {} {} at {}{} (tags: {})",
                    action.kind.label(),
                    action.tags.len(),
                    action.category,
                    action.location,
                    destination,
                    action.tags.iter().map(|tag| tag.0.as_str()).collect::<Vec<_>>().join(", ")
                )
            }
            Self::AgronomicEvent(event) => {
                let stock = event
                    .stock
                    .as_ref()
                    .map(|line| {
                        let verb = if event.kind.produces_stock() { "into" } else { "using" };
                        format!(" {verb} {} {} at {}", line.quantity, line.category, line.location)
                    })
                    .unwrap_or_default();
                format!("{} on {}{}", event.kind.label(), event.plot, stock)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingActionId(pub String);

impl PendingActionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// The single staged action slot of a sender.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: PendingActionId,
    pub sender_key: SenderKey,
    pub action: StagedAction,
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(sender_key: SenderKey, action: StagedAction) -> Self {
        Self { id: PendingActionId::generate(), sender_key, action, created_at: Utc::now() }
    }

    pub fn action_type(&self) -> ActionType {
        self.action.action_type()
    }
}
