pub mod audit;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod intents;
pub mod planning;

pub use commands::Command;
pub use domain::action::{ActionType, PendingAction, PendingActionId, StagedAction};
pub use domain::inventory::{InventoryPosition, LedgerEvent, MutationPlan, TagState};
pub use domain::message::{MessagePayload, NackOutcome, QueuedMessage, SenderKey};
pub use domain::session::{FarmId, Invitation, InvitationKind, Session, SessionState};
pub use errors::{ApplicationError, DomainError, InterfaceError, ValidationError};
pub use flows::ConversationFlow;
