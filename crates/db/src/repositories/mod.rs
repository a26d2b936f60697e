use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use farmhand_core::domain::action::{CategoryKey, LocationRef, PendingAction, TagNumber};
use farmhand_core::domain::inventory::{
    InventoryPosition, LedgerEvent, LedgerEventId, LivestockTag, MutationPlan,
};
use farmhand_core::domain::message::{
    MessageId, NackOutcome, QueueDepth, QueuedMessage, SenderKey,
};
use farmhand_core::domain::metrics::DailyMetrics;
use farmhand_core::domain::session::{FarmId, Invitation, Session};
use farmhand_core::errors::ValidationError;

mod decode;
pub mod inventory;
pub mod memory;
pub mod metrics;
pub mod pending_action;
pub mod queue;
pub mod session;

pub use inventory::SqlInventoryStore;
pub use memory::{
    InMemoryInventoryStore, InMemoryMessageQueue, InMemoryMetricsSink,
    InMemoryPendingActionRepository, InMemorySessionRepository,
};
pub use metrics::SqlMetricsSink;
pub use pending_action::SqlPendingActionRepository;
pub use queue::SqlMessageQueue;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl RepositoryError {
    pub(crate) fn from_write(error: sqlx::Error, conflict: impl FnOnce() -> String) -> Self {
        if let sqlx::Error::Database(database) = &error {
            if database.is_unique_violation() {
                return Self::Conflict(conflict());
            }
        }
        Self::Database(error)
    }
}

/// A stale in-flight message and what the reclaim did with it.
#[derive(Clone, Debug, PartialEq)]
pub struct ReclaimedMessage {
    pub message: QueuedMessage,
    pub outcome: NackOutcome,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn push(&self, message: QueuedMessage) -> Result<(), RepositoryError>;

    /// Moves the head of the pending lane to in-flight.
    async fn pop_to_inflight(&self) -> Result<Option<QueuedMessage>, RepositoryError>;

    async fn ack(&self, id: &MessageId) -> Result<(), RepositoryError>;

    /// Records a failed attempt. Below the cap the message goes back to the pending
    /// tail; at the cap it is dropped and exactly one error is counted.
    async fn nack(&self, id: &MessageId) -> Result<NackOutcome, RepositoryError>;

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<ReclaimedMessage>, RepositoryError>;

    async fn depth(&self) -> Result<QueueDepth, RepositoryError>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_processed(
        &self,
        at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Result<(), RepositoryError>;

    async fn record_retry(&self, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn record_error(&self, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn daily(&self, day: NaiveDate) -> Result<DailyMetrics, RepositoryError>;

    async fn last_message_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, sender_key: &SenderKey) -> Result<Option<Session>, RepositoryError>;

    /// Creates the session from the sender's open invitation and consumes it, atomically.
    /// `None` when the sender has no open invitation.
    async fn start_from_invitation(
        &self,
        sender_key: &SenderKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError>;

    /// Upsert. Fails with [`RepositoryError::Conflict`] when the email belongs to another session.
    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn email_taken(
        &self,
        email: &str,
        except: &SenderKey,
    ) -> Result<bool, RepositoryError>;

    async fn list_ready(&self, farm_id: Option<&FarmId>) -> Result<Vec<Session>, RepositoryError>;
}

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    /// Replaces any earlier invitation for the same sender.
    async fn invite(&self, invitation: Invitation) -> Result<(), RepositoryError>;

    async fn find_open(&self, sender_key: &SenderKey)
        -> Result<Option<Invitation>, RepositoryError>;
}

#[async_trait]
pub trait PendingActionRepository: Send + Sync {
    /// Last write wins. Returns the action that was replaced, if any.
    async fn stage(&self, pending: PendingAction)
        -> Result<Option<PendingAction>, RepositoryError>;

    async fn peek(&self, sender_key: &SenderKey) -> Result<Option<PendingAction>, RepositoryError>;

    async fn clear(&self, sender_key: &SenderKey) -> Result<bool, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    Applied(LedgerEvent),
    /// The pending action was applied by an earlier attempt; nothing changed now.
    AlreadyApplied(LedgerEventId),
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for ApplyError {
    fn from(value: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(value))
    }
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Applies every delta, tag change and the ledger event of `plan` in one unit.
    /// A failed guard leaves all rows untouched.
    async fn apply(&self, plan: &MutationPlan) -> Result<ApplyOutcome, ApplyError>;

    async fn quantity(
        &self,
        farm_id: &FarmId,
        location: &LocationRef,
        category: &CategoryKey,
    ) -> Result<i64, RepositoryError>;

    async fn positions(
        &self,
        farm_id: &FarmId,
        location: Option<&LocationRef>,
    ) -> Result<Vec<InventoryPosition>, RepositoryError>;

    async fn tag(
        &self,
        farm_id: &FarmId,
        tag: &TagNumber,
    ) -> Result<Option<LivestockTag>, RepositoryError>;

    async fn ledger(&self, farm_id: &FarmId) -> Result<Vec<LedgerEvent>, RepositoryError>;
}
