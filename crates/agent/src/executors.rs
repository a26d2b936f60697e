use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use farmhand_core::domain::action::{ActionType, PendingAction, StagedAction};
use farmhand_core::domain::message::SenderKey;
use farmhand_core::domain::session::FarmId;
use farmhand_core::errors::{DomainError, ValidationError};
use farmhand_core::planning::plan_pending_action;
use farmhand_db::repositories::{ApplyError, ApplyOutcome, InventoryStore, RepositoryError};

/// Who is confirming, on which farm, and the message that carried the confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
    pub farm_id: FarmId,
    pub sender_key: SenderKey,
    pub correlation_id: String,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Rejected(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("executor for {expected} received a {actual} action")]
    WrongFamily { expected: ActionType, actual: ActionType },
    #[error("no executor registered for {0}")]
    Unregistered(ActionType),
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl From<ApplyError> for ExecutionError {
    fn from(value: ApplyError) -> Self {
        match value {
            ApplyError::Rejected(error) => Self::Rejected(error),
            ApplyError::Repository(error) => Self::Repository(error),
        }
    }
}

impl From<DomainError> for ExecutionError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(error) => Self::Rejected(error),
            DomainError::InvariantViolation(detail) => Self::Invariant(detail),
        }
    }
}

/// Validates and applies one family of confirmed actions.
#[async_trait]
pub trait DomainExecutor: Send + Sync {
    fn family(&self) -> ActionType;

    async fn apply(
        &self,
        context: &ExecutionContext,
        pending: &PendingAction,
    ) -> Result<ApplyOutcome, ExecutionError>;
}

async fn plan_and_apply(
    store: &dyn InventoryStore,
    context: &ExecutionContext,
    pending: &PendingAction,
) -> Result<ApplyOutcome, ExecutionError> {
    let plan = plan_pending_action(&context.farm_id, pending)?;
    let outcome = store.apply(&plan).await?;
    match &outcome {
        ApplyOutcome::Applied(event) => tracing::info!(
            event_name = "execution.action_applied",
            correlation_id = %context.correlation_id,
            sender_key = %context.sender_key,
            farm_id = %context.farm_id.0,
            action_type = %pending.action_type(),
            ledger_event_id = %event.id.0,
            "confirmed action applied"
        ),
        ApplyOutcome::AlreadyApplied(event_id) => tracing::info!(
            event_name = "execution.action_replayed",
            correlation_id = %context.correlation_id,
            sender_key = %context.sender_key,
            action_type = %pending.action_type(),
            ledger_event_id = %event_id.0,
            "confirmed action was already applied"
        ),
    }
    Ok(outcome)
}

fn wrong_family(expected: ActionType, pending: &PendingAction) -> ExecutionError {
    ExecutionError::WrongFamily { expected, actual: pending.action_type() }
}

pub struct StockMovementExecutor {
    store: Arc<dyn InventoryStore>,
}

impl StockMovementExecutor {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DomainExecutor for StockMovementExecutor {
    fn family(&self) -> ActionType {
        ActionType::StockMovement
    }

    async fn apply(
        &self,
        context: &ExecutionContext,
        pending: &PendingAction,
    ) -> Result<ApplyOutcome, ExecutionError> {
        let StagedAction::StockMovement(_) = &pending.action else {
            return Err(wrong_family(self.family(), pending));
        };
        plan_and_apply(self.store.as_ref(), context, pending).await
    }
}

pub struct LivestockTagExecutor {
    store: Arc<dyn InventoryStore>,
}

impl LivestockTagExecutor {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DomainExecutor for LivestockTagExecutor {
    fn family(&self) -> ActionType {
        ActionType::LivestockTag
    }

    async fn apply(
        &self,
        context: &ExecutionContext,
        pending: &PendingAction,
    ) -> Result<ApplyOutcome, ExecutionError> {
        let StagedAction::LivestockTag(action) = &pending.action else {
            return Err(wrong_family(self.family(), pending));
        };
        if action.tags.iter().any(|tag| tag.0.trim().is_empty()) {
            return Err(ValidationError::malformed("tag numbers cannot be blank").into());
        }
        plan_and_apply(self.store.as_ref(), context, pending).await
    }
}

pub struct AgronomicEventExecutor {
    store: Arc<dyn InventoryStore>,
}

impl AgronomicEventExecutor {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DomainExecutor for AgronomicEventExecutor {
    fn family(&self) -> ActionType {
        ActionType::AgronomicEvent
    }

    async fn apply(
        &self,
        context: &ExecutionContext,
        pending: &PendingAction,
    ) -> Result<ApplyOutcome, ExecutionError> {
        let StagedAction::AgronomicEvent(event) = &pending.action else {
            return Err(wrong_family(self.family(), pending));
        };
        if event.plot.0.trim().is_empty() {
            return Err(ValidationError::malformed("the event needs a plot").into());
        }
        plan_and_apply(self.store.as_ref(), context, pending).await
    }
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionType, Arc<dyn DomainExecutor>>,
}

impl ExecutorRegistry {
    /// One executor per action family, all writing through `store`.
    pub fn with_defaults(store: Arc<dyn InventoryStore>) -> Self {
        let mut registry = Self::default();
        registry.register(StockMovementExecutor::new(Arc::clone(&store)));
        registry.register(LivestockTagExecutor::new(Arc::clone(&store)));
        registry.register(AgronomicEventExecutor::new(store));
        registry
    }

    pub fn register<E>(&mut self, executor: E)
    where
        E: DomainExecutor + 'static,
    {
        self.executors.insert(executor.family(), Arc::new(executor));
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub async fn dispatch(
        &self,
        context: &ExecutionContext,
        pending: &PendingAction,
    ) -> Result<ApplyOutcome, ExecutionError> {
        let family = pending.action_type();
        let executor =
            self.executors.get(&family).ok_or(ExecutionError::Unregistered(family))?;
        executor.apply(context, pending).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use farmhand_core::domain::action::{
        ActionType, AgronomicEvent, AgronomicKind, CategoryKey, LivestockTagAction, LocationRef,
        MovementKind, PendingAction, StagedAction, StockLine, StockMovement, TagActionKind,
        TagNumber,
    };
    use farmhand_core::domain::message::SenderKey;
    use farmhand_core::domain::session::FarmId;
    use farmhand_core::errors::ValidationError;
    use farmhand_db::repositories::{ApplyOutcome, InMemoryInventoryStore, InventoryStore};

    use super::{
        DomainExecutor, ExecutionContext, ExecutionError, ExecutorRegistry, StockMovementExecutor,
    };

    fn context() -> ExecutionContext {
        ExecutionContext {
            farm_id: FarmId("farm-1".to_string()),
            sender_key: SenderKey::new("+5491100000001"),
            correlation_id: "msg-1".to_string(),
        }
    }

    fn pending(action: StagedAction) -> PendingAction {
        PendingAction::new(SenderKey::new("+5491100000001"), action)
    }

    fn loc(value: &str) -> LocationRef {
        LocationRef(value.to_string())
    }

    fn cat(value: &str) -> CategoryKey {
        CategoryKey(value.to_string())
    }

    #[tokio::test]
    async fn registry_routes_each_family_to_its_executor() {
        let store = Arc::new(InMemoryInventoryStore::default());
        let registry = ExecutorRegistry::with_defaults(store.clone());
        assert_eq!(registry.len(), ActionType::ALL.len());

        let birth = pending(StagedAction::LivestockTag(LivestockTagAction {
            kind: TagActionKind::Birth,
            category: cat("calf"),
            location: loc("paddock-1"),
            tags: vec![TagNumber("AR-1".to_string()), TagNumber("AR-2".to_string())],
        }));
        let outcome = registry.dispatch(&context(), &birth).await.expect("birth");
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));

        let harvest = pending(StagedAction::AgronomicEvent(AgronomicEvent {
            kind: AgronomicKind::Harvest,
            plot: loc("lot-4"),
            stock: Some(StockLine { location: loc("silo-1"), category: cat("soy-kg"), quantity: 900 }),
            note: None,
        }));
        registry.dispatch(&context(), &harvest).await.expect("harvest");

        let farm = context().farm_id;
        assert_eq!(store.quantity(&farm, &loc("paddock-1"), &cat("calf")).await.expect("q"), 2);
        assert_eq!(store.quantity(&farm, &loc("silo-1"), &cat("soy-kg")).await.expect("q"), 900);
    }

    #[tokio::test]
    async fn consuming_more_than_available_is_a_validation_error() {
        let store = Arc::new(InMemoryInventoryStore::default());
        let registry = ExecutorRegistry::with_defaults(store);
        let spraying = pending(StagedAction::AgronomicEvent(AgronomicEvent {
            kind: AgronomicKind::Spraying,
            plot: loc("lot-4"),
            stock: Some(StockLine {
                location: loc("shed"),
                category: cat("glyphosate-l"),
                quantity: 20,
            }),
            note: None,
        }));

        let error = registry.dispatch(&context(), &spraying).await.expect_err("must fail");
        assert!(matches!(
            error,
            ExecutionError::Rejected(ValidationError::InsufficientStock { available: 0, .. })
        ));
    }

    #[tokio::test]
    async fn executor_refuses_actions_of_another_family() {
        let executor = StockMovementExecutor::new(Arc::new(InMemoryInventoryStore::default()));
        let sowing = pending(StagedAction::AgronomicEvent(AgronomicEvent {
            kind: AgronomicKind::Sowing,
            plot: loc("lot-1"),
            stock: None,
            note: None,
        }));

        let error = executor.apply(&context(), &sowing).await.expect_err("wrong family");
        assert!(matches!(
            error,
            ExecutionError::WrongFamily {
                expected: ActionType::StockMovement,
                actual: ActionType::AgronomicEvent
            }
        ));
    }

    #[tokio::test]
    async fn empty_registry_reports_unregistered_family() {
        let registry = ExecutorRegistry::default();
        let receive = pending(StagedAction::StockMovement(StockMovement {
            kind: MovementKind::Receive,
            location: loc("silo-1"),
            category: cat("corn-kg"),
            quantity: 1,
            note: None,
        }));

        assert!(matches!(
            registry.dispatch(&context(), &receive).await,
            Err(ExecutionError::Unregistered(ActionType::StockMovement))
        ));
    }
}
