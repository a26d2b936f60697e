use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use tokio::sync::RwLock;

use farmhand_core::domain::action::{CategoryKey, LocationRef, PendingAction, TagNumber};
use farmhand_core::domain::inventory::{
    InventoryPosition, LedgerEvent, LivestockTag, MutationPlan, PositionDelta, TagChange,
    TagState,
};
use farmhand_core::domain::message::{
    MessageId, NackOutcome, QueueDepth, QueuedMessage, SenderKey, MAX_DELIVERY_ATTEMPTS,
};
use farmhand_core::domain::metrics::{day_key, day_key_for, DailyMetrics};
use farmhand_core::domain::session::{FarmId, Invitation, Session, SessionState};
use farmhand_core::errors::ValidationError;

use super::{
    ApplyError, ApplyOutcome, InventoryStore, InvitationRepository, MessageQueue, MetricsSink,
    PendingActionRepository, ReclaimedMessage, RepositoryError, SessionRepository,
};

#[derive(Default)]
pub struct InMemoryMetricsSink {
    days: RwLock<HashMap<String, DailyMetrics>>,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
}

impl InMemoryMetricsSink {
    async fn bump(&self, at: DateTime<Utc>, update: impl FnOnce(&mut DailyMetrics)) {
        let mut days = self.days.write().await;
        let entry =
            days.entry(day_key_for(at)).or_insert_with(|| DailyMetrics::empty(at.date_naive()));
        update(entry);
    }
}

#[async_trait::async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn record_processed(
        &self,
        at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Result<(), RepositoryError> {
        self.bump(at, |day| {
            day.processed += 1;
            day.total_processing_time_ms = day.total_processing_time_ms.saturating_add(elapsed_ms);
        })
        .await;
        let mut last = self.last_message_at.write().await;
        if last.map_or(true, |current| at > current) {
            *last = Some(at);
        }
        Ok(())
    }

    async fn record_retry(&self, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.bump(at, |day| day.retried += 1).await;
        Ok(())
    }

    async fn record_error(&self, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.bump(at, |day| day.errors += 1).await;
        Ok(())
    }

    async fn daily(&self, day: NaiveDate) -> Result<DailyMetrics, RepositoryError> {
        let days = self.days.read().await;
        Ok(days.get(&day_key(day)).cloned().unwrap_or_else(|| DailyMetrics::empty(day)))
    }

    async fn last_message_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(*self.last_message_at.read().await)
    }
}

#[derive(Default)]
struct QueueLanes {
    pending: VecDeque<QueuedMessage>,
    inflight: Vec<(QueuedMessage, DateTime<Utc>)>,
}

/// Queue twin that counts drops on the metrics sink it was built with.
pub struct InMemoryMessageQueue {
    lanes: RwLock<QueueLanes>,
    metrics: Arc<InMemoryMetricsSink>,
    max_attempts: u32,
}

impl InMemoryMessageQueue {
    pub fn new(metrics: Arc<InMemoryMetricsSink>) -> Self {
        Self { lanes: RwLock::default(), metrics, max_attempts: MAX_DELIVERY_ATTEMPTS }
    }

    pub fn metrics(&self) -> Arc<InMemoryMetricsSink> {
        Arc::clone(&self.metrics)
    }

    async fn fail(&self, lanes: &mut QueueLanes, mut message: QueuedMessage) -> NackOutcome {
        let outcome = NackOutcome::after_failure(message.attempts, self.max_attempts);
        match outcome {
            NackOutcome::Requeued { attempts } => {
                message.attempts = attempts;
                lanes.pending.push_back(message);
            }
            NackOutcome::Dropped { .. } => {
                self.metrics.bump(Utc::now(), |day| day.errors += 1).await;
            }
        }
        outcome
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryMetricsSink::default()))
    }
}

#[async_trait::async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn push(&self, message: QueuedMessage) -> Result<(), RepositoryError> {
        let mut lanes = self.lanes.write().await;
        let known = lanes.pending.iter().any(|queued| queued.id == message.id)
            || lanes.inflight.iter().any(|(queued, _)| queued.id == message.id);
        if known {
            return Err(RepositoryError::Conflict(format!("message {} is already queued", message.id)));
        }
        lanes.pending.push_back(message);
        Ok(())
    }

    async fn pop_to_inflight(&self) -> Result<Option<QueuedMessage>, RepositoryError> {
        let mut lanes = self.lanes.write().await;
        let Some(message) = lanes.pending.pop_front() else {
            return Ok(None);
        };
        lanes.inflight.push((message.clone(), Utc::now()));
        Ok(Some(message))
    }

    async fn ack(&self, id: &MessageId) -> Result<(), RepositoryError> {
        let mut lanes = self.lanes.write().await;
        lanes.inflight.retain(|(message, _)| &message.id != id);
        Ok(())
    }

    async fn nack(&self, id: &MessageId) -> Result<NackOutcome, RepositoryError> {
        let mut lanes = self.lanes.write().await;
        let position = lanes
            .inflight
            .iter()
            .position(|(message, _)| &message.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("in-flight message {id}")))?;
        let (message, _) = lanes.inflight.remove(position);
        Ok(self.fail(&mut lanes, message).await)
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<ReclaimedMessage>, RepositoryError> {
        let mut lanes = self.lanes.write().await;
        let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(&mut lanes.inflight)
            .into_iter()
            .partition(|(_, claimed_at)| *claimed_at < claimed_before);
        lanes.inflight = fresh;

        let mut reclaimed = Vec::with_capacity(stale.len());
        for (message, _) in stale {
            let outcome = self.fail(&mut lanes, message.clone()).await;
            reclaimed.push(ReclaimedMessage { message, outcome });
        }
        Ok(reclaimed)
    }

    async fn depth(&self) -> Result<QueueDepth, RepositoryError> {
        let lanes = self.lanes.read().await;
        Ok(QueueDepth {
            pending: lanes.pending.len() as u64,
            inflight: lanes.inflight.len() as u64,
        })
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
    invitations: RwLock<HashMap<String, Invitation>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find(&self, sender_key: &SenderKey) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(sender_key.as_str()).cloned())
    }

    async fn start_from_invitation(
        &self,
        sender_key: &SenderKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let mut invitations = self.invitations.write().await;
        let mut sessions = self.sessions.write().await;

        let Some(invitation) =
            invitations.get_mut(sender_key.as_str()).filter(|invitation| invitation.is_open())
        else {
            return Ok(None);
        };
        if sessions.contains_key(sender_key.as_str()) {
            return Err(RepositoryError::Conflict(format!("session {sender_key} already exists")));
        }

        let session = Session::from_invitation(invitation, now);
        invitation.consumed_at = Some(now);
        sessions.insert(sender_key.as_str().to_string(), session.clone());
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(email) = session.email.as_deref() {
            let taken = sessions.values().any(|other| {
                other.sender_key != session.sender_key && other.email.as_deref() == Some(email)
            });
            if taken {
                return Err(RepositoryError::Conflict(format!("email {email} is already registered")));
            }
        }
        sessions.insert(session.sender_key.as_str().to_string(), session.clone());
        Ok(())
    }

    async fn email_taken(
        &self,
        email: &str,
        except: &SenderKey,
    ) -> Result<bool, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .any(|session| &session.sender_key != except && session.email.as_deref() == Some(email)))
    }

    async fn list_ready(&self, farm_id: Option<&FarmId>) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut ready: Vec<Session> = sessions
            .values()
            .filter(|session| session.state == SessionState::Ready)
            .filter(|session| farm_id.map_or(true, |farm_id| &session.farm_id == farm_id))
            .cloned()
            .collect();
        ready.sort_by(|left, right| left.sender_key.0.cmp(&right.sender_key.0));
        Ok(ready)
    }
}

#[async_trait::async_trait]
impl InvitationRepository for InMemorySessionRepository {
    async fn invite(&self, invitation: Invitation) -> Result<(), RepositoryError> {
        let mut invitations = self.invitations.write().await;
        invitations.insert(invitation.sender_key.as_str().to_string(), invitation);
        Ok(())
    }

    async fn find_open(
        &self,
        sender_key: &SenderKey,
    ) -> Result<Option<Invitation>, RepositoryError> {
        let invitations = self.invitations.read().await;
        Ok(invitations.get(sender_key.as_str()).filter(|invitation| invitation.is_open()).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPendingActionRepository {
    slots: RwLock<HashMap<String, PendingAction>>,
}

#[async_trait::async_trait]
impl PendingActionRepository for InMemoryPendingActionRepository {
    async fn stage(
        &self,
        pending: PendingAction,
    ) -> Result<Option<PendingAction>, RepositoryError> {
        let mut slots = self.slots.write().await;
        Ok(slots.insert(pending.sender_key.as_str().to_string(), pending))
    }

    async fn peek(&self, sender_key: &SenderKey) -> Result<Option<PendingAction>, RepositoryError> {
        let slots = self.slots.read().await;
        Ok(slots.get(sender_key.as_str()).cloned())
    }

    async fn clear(&self, sender_key: &SenderKey) -> Result<bool, RepositoryError> {
        let mut slots = self.slots.write().await;
        Ok(slots.remove(sender_key.as_str()).is_some())
    }
}

type PositionKey = (FarmId, LocationRef, CategoryKey);

#[derive(Clone, Default)]
struct InventoryState {
    positions: BTreeMap<PositionKey, i64>,
    tags: HashMap<(FarmId, TagNumber), LivestockTag>,
    ledger: Vec<LedgerEvent>,
}

impl InventoryState {
    fn apply_tag_change(
        &mut self,
        farm_id: &FarmId,
        change: &TagChange,
        at: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let key = (farm_id.clone(), change.tag().clone());
        match change {
            TagChange::Register { tag, category, location } => {
                if let Some(existing) = self.tags.get(&key) {
                    if !existing.state.allows_reregistration() {
                        return Err(ValidationError::TagAlreadyRegistered {
                            tag: tag.clone(),
                            state: existing.state,
                        });
                    }
                }
                self.tags.insert(
                    key,
                    LivestockTag {
                        farm_id: farm_id.clone(),
                        tag: tag.clone(),
                        category: category.clone(),
                        location: location.clone(),
                        state: TagState::Registered,
                        updated_at: at,
                    },
                );
            }
            TagChange::Transition { tag, category, from_location, to_location, to_state } => {
                let Some(existing) = self.tags.get_mut(&key) else {
                    return Err(ValidationError::UnknownTag { tag: tag.clone() });
                };
                if existing.state != TagState::Registered
                    || &existing.location != from_location
                    || &existing.category != category
                {
                    return Err(ValidationError::TagUnavailable {
                        tag: tag.clone(),
                        state: existing.state,
                        location: existing.location.clone(),
                    });
                }
                existing.state = *to_state;
                existing.location = to_location.clone();
                existing.updated_at = at;
            }
        }
        Ok(())
    }

    fn apply_delta(&mut self, farm_id: &FarmId, delta: &PositionDelta) -> Result<(), ValidationError> {
        let key = (farm_id.clone(), delta.location.clone(), delta.category.clone());
        let quantity = self.positions.entry(key).or_insert(0);
        if delta.is_decrement() && *quantity < -delta.delta {
            return Err(ValidationError::InsufficientStock {
                location: delta.location.clone(),
                category: delta.category.clone(),
                requested: -delta.delta,
                available: *quantity,
            });
        }
        *quantity += delta.delta;
        Ok(())
    }
}

/// Applies a plan to a copy of the state and swaps it in only when every guard passes.
#[derive(Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<InventoryState>,
}

#[async_trait::async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn apply(&self, plan: &MutationPlan) -> Result<ApplyOutcome, ApplyError> {
        let mut state = self.state.write().await;

        let draft = &plan.ledger;
        let applied = state.ledger.iter().find(|event| match &draft.pending_action_id {
            Some(pending_action_id) => event.pending_action_id.as_ref() == Some(pending_action_id),
            None => {
                draft.source_message_id.is_some()
                    && event.source_message_id == draft.source_message_id
            }
        });
        if let Some(event) = applied {
            return Ok(ApplyOutcome::AlreadyApplied(event.id.clone()));
        }

        let now = Utc::now().trunc_subsecs(6);
        let mut next = state.clone();
        for change in &plan.tag_changes {
            next.apply_tag_change(&plan.farm_id, change, now)?;
        }
        for delta in &plan.deltas {
            next.apply_delta(&plan.farm_id, delta)?;
        }

        let event = plan.ledger.clone().seal(plan.farm_id.clone(), now);
        next.ledger.push(event.clone());
        *state = next;
        Ok(ApplyOutcome::Applied(event))
    }

    async fn quantity(
        &self,
        farm_id: &FarmId,
        location: &LocationRef,
        category: &CategoryKey,
    ) -> Result<i64, RepositoryError> {
        let state = self.state.read().await;
        let key = (farm_id.clone(), location.clone(), category.clone());
        Ok(state.positions.get(&key).copied().unwrap_or(0))
    }

    async fn positions(
        &self,
        farm_id: &FarmId,
        location: Option<&LocationRef>,
    ) -> Result<Vec<InventoryPosition>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .iter()
            .filter(|((farm, loc, _), quantity)| {
                farm == farm_id && **quantity > 0 && location.map_or(true, |wanted| loc == wanted)
            })
            .map(|((farm, loc, category), quantity)| InventoryPosition {
                farm_id: farm.clone(),
                location: loc.clone(),
                category: category.clone(),
                quantity: *quantity,
            })
            .collect())
    }

    async fn tag(
        &self,
        farm_id: &FarmId,
        tag: &TagNumber,
    ) -> Result<Option<LivestockTag>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.tags.get(&(farm_id.clone(), tag.clone())).cloned())
    }

    async fn ledger(&self, farm_id: &FarmId) -> Result<Vec<LedgerEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.ledger.iter().filter(|event| &event.farm_id == farm_id).cloned().collect())
    }
}
