//! Per-message turn handling: session lookup, the onboarding flow, command routing and
//! the two-phase confirm protocol. One handled turn sends exactly one reply.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use farmhand_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use farmhand_core::commands::{parse_choice, parse_text, Command};
use farmhand_core::domain::action::{ActionType, PendingAction, StagedAction};
use farmhand_core::domain::message::{MessageId, MessagePayload, QueuedMessage, SenderKey};
use farmhand_core::domain::session::{Session, SessionState};
use farmhand_core::errors::ValidationError;
use farmhand_core::flows::{
    candidate_email, ConversationAction, ConversationContext, ConversationFlow, ConversationInput,
    RepromptReason,
};
use farmhand_core::intents::command_from_intent;
use farmhand_core::planning::plan_rainfall;
use farmhand_db::repositories::{
    ApplyError, ApplyOutcome, InventoryStore, PendingActionRepository, RepositoryError,
    SessionRepository,
};
use rust_decimal::Decimal;

use crate::executors::{ExecutionContext, ExecutionError, ExecutorRegistry};
use crate::notify::{Notifier, NotifyError};
use crate::replies::{self, Reply};

const ACTOR: &str = "worker";

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Worth retrying: storage or delivery hiccup.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("unexpected failure: {0}")]
    Fatal(String),
}

impl ProcessingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<RepositoryError> for ProcessingError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Decode(detail) => Self::Fatal(format!("decode error: {detail}")),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<NotifyError> for ProcessingError {
    fn from(value: NotifyError) -> Self {
        match value {
            NotifyError::Configuration(detail) => Self::Fatal(detail),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<ExecutionError> for ProcessingError {
    fn from(value: ExecutionError) -> Self {
        match value {
            ExecutionError::Repository(error) => error.into(),
            other => Self::Fatal(other.to_string()),
        }
    }
}

/// What one handled message did, for logs and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReport {
    pub message_id: MessageId,
    pub sender_key: SenderKey,
    /// Session state after the turn; `None` for senders without a session.
    pub state: Option<SessionState>,
    pub command: Option<&'static str>,
    pub reply: Reply,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueuedMessage) -> Result<TurnReport, ProcessingError>;
}

struct Routed {
    command: &'static str,
    reply: Reply,
    /// Clear the pending slot once the reply went out.
    clear_pending: bool,
}

impl Routed {
    fn reply(command: &'static str, reply: Reply) -> Self {
        Self { command, reply, clear_pending: false }
    }

    fn consuming(command: &'static str, reply: Reply) -> Self {
        Self { command, reply, clear_pending: true }
    }
}

pub struct ConversationRuntime {
    sessions: Arc<dyn SessionRepository>,
    pending: Arc<dyn PendingActionRepository>,
    inventory: Arc<dyn InventoryStore>,
    executors: ExecutorRegistry,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    flow: ConversationFlow,
}

impl ConversationRuntime {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        pending: Arc<dyn PendingActionRepository>,
        inventory: Arc<dyn InventoryStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            sessions,
            pending,
            executors: ExecutorRegistry::with_defaults(Arc::clone(&inventory)),
            inventory,
            notifier,
            audit: Arc::new(TracingAuditSink),
            flow: ConversationFlow::new(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    async fn deliver(&self, recipient: &SenderKey, reply: &Reply) -> Result<(), NotifyError> {
        match reply {
            Reply::Text(body) => self.notifier.send_text(recipient, body).await,
            Reply::Choice { body, options } => {
                self.notifier.send_choice(recipient, body, options).await
            }
        }
    }

    async fn first_contact(
        &self,
        message: &QueuedMessage,
        audit: &AuditContext,
    ) -> Result<TurnReport, ProcessingError> {
        let sender = &message.sender_key;
        let Some(session) = self.sessions.start_from_invitation(sender, Utc::now()).await? else {
            warn!(
                event_name = "conversation.unregistered_sender",
                correlation_id = %message.id,
                sender_key = %sender,
                "message from sender without session or invitation"
            );
            self.audit.emit(AuditEvent::from_context(
                audit,
                "conversation.unregistered_sender",
                AuditCategory::Conversation,
                AuditOutcome::Rejected,
            ));
            let reply = Reply::text(replies::NOT_REGISTERED);
            self.deliver(sender, &reply).await?;
            return Ok(TurnReport {
                message_id: message.id.clone(),
                sender_key: sender.clone(),
                state: None,
                command: None,
                reply,
            });
        };

        info!(
            event_name = "conversation.session_started",
            correlation_id = %message.id,
            sender_key = %sender,
            farm_id = %session.farm_id.0,
            state = session.state.as_str(),
            "session created from invitation"
        );
        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "conversation.session_started",
                AuditCategory::Conversation,
                AuditOutcome::Success,
            )
            .with_metadata("farm_id", session.farm_id.0.clone())
            .with_metadata("state", session.state.as_str()),
        );

        let reply = replies::onboarding_prompt(session.state);
        self.deliver(sender, &reply).await?;
        Ok(TurnReport {
            message_id: message.id.clone(),
            sender_key: sender.clone(),
            state: Some(session.state),
            command: None,
            reply,
        })
    }

    async fn route(
        &self,
        session: &Session,
        message: &QueuedMessage,
        audit: &AuditContext,
    ) -> Result<Routed, ProcessingError> {
        let parsed = match &message.payload {
            MessagePayload::Text { body } => parse_text(body),
            MessagePayload::Choice { option_id } => Ok(parse_choice(option_id)),
            MessagePayload::Intent(event) => command_from_intent(event),
        };
        let command = match parsed {
            Ok(command) => command,
            Err(error) => {
                return Ok(Routed::reply("invalid", Reply::text(error.user_message())));
            }
        };

        let name = command.name();
        let routed = match command {
            Command::Help => Routed::reply(name, Reply::text(replies::HELP)),
            Command::Status => {
                let pending = self.pending.peek(&session.sender_key).await?;
                Routed::reply(name, replies::status(session, pending.as_ref()))
            }
            Command::Stock { location } => {
                let positions =
                    self.inventory.positions(&session.farm_id, location.as_ref()).await?;
                Routed::reply(name, replies::stock(&positions))
            }
            Command::Confirm { target } => self.confirm(session, message, target, audit).await?,
            Command::Cancel => {
                let cleared = self.pending.clear(&session.sender_key).await?;
                if cleared {
                    self.audit.emit(AuditEvent::from_context(
                        audit,
                        "staging.action_cancelled",
                        AuditCategory::Staging,
                        AuditOutcome::Success,
                    ));
                    Routed::reply(name, Reply::text(replies::CANCELLED))
                } else {
                    Routed::reply(name, Reply::text(replies::NOTHING_PENDING))
                }
            }
            Command::RegisterRainfall { millimeters } => {
                let reply = self.record_rainfall(session, message, millimeters, audit).await?;
                Routed::reply(name, reply)
            }
            Command::Stage { action } => {
                Routed::reply(name, self.stage(session, action, audit).await?)
            }
            Command::Unknown { input } => Routed::reply(name, replies::unknown_command(&input)),
        };
        Ok(routed)
    }

    async fn stage(
        &self,
        session: &Session,
        action: StagedAction,
        audit: &AuditContext,
    ) -> Result<Reply, ProcessingError> {
        let pending = PendingAction::new(session.sender_key.clone(), action);
        let replaced = self.pending.stage(pending.clone()).await?;
        // A retried turn restages the same action; that is not a replacement.
        let replaced = replaced.filter(|previous| previous.action != pending.action);

        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "staging.action_staged",
                AuditCategory::Staging,
                AuditOutcome::Success,
            )
            .with_metadata("action_type", pending.action_type().as_str())
            .with_metadata("pending_action_id", pending.id.0.clone())
            .with_metadata("replaced", replaced.is_some().to_string()),
        );
        Ok(replies::staged(&pending, replaced.as_ref()))
    }

    async fn confirm(
        &self,
        session: &Session,
        message: &QueuedMessage,
        target: Option<ActionType>,
        audit: &AuditContext,
    ) -> Result<Routed, ProcessingError> {
        const NAME: &str = "confirm";
        let Some(pending) = self.pending.peek(&session.sender_key).await? else {
            self.audit.emit(AuditEvent::from_context(
                audit,
                "execution.confirm_without_pending",
                AuditCategory::Execution,
                AuditOutcome::Rejected,
            ));
            return Ok(Routed::reply(NAME, Reply::text(replies::NOTHING_PENDING)));
        };

        if let Some(requested) = target.filter(|requested| *requested != pending.action_type()) {
            let error = ValidationError::ActionTypeMismatch {
                pending: pending.action_type(),
                requested,
            };
            self.emit_rejection(audit, &pending, &error);
            return Ok(Routed::consuming(NAME, Reply::text(error.user_message())));
        }

        let context = ExecutionContext {
            farm_id: session.farm_id.clone(),
            sender_key: session.sender_key.clone(),
            correlation_id: message.id.0.clone(),
        };
        match self.executors.dispatch(&context, &pending).await {
            Ok(ApplyOutcome::Applied(event)) => {
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "execution.action_applied",
                        AuditCategory::Execution,
                        AuditOutcome::Success,
                    )
                    .with_metadata("action_type", pending.action_type().as_str())
                    .with_metadata("pending_action_id", pending.id.0.clone())
                    .with_metadata("ledger_event_id", event.id.0.clone()),
                );
                Ok(Routed::consuming(NAME, replies::applied(&event)))
            }
            Ok(ApplyOutcome::AlreadyApplied(_)) => {
                Ok(Routed::consuming(NAME, Reply::text(replies::ALREADY_APPLIED)))
            }
            Err(ExecutionError::Rejected(error)) => {
                self.emit_rejection(audit, &pending, &error);
                Ok(Routed::consuming(NAME, Reply::text(error.user_message())))
            }
            Err(other) => Err(other.into()),
        }
    }

    fn emit_rejection(
        &self,
        audit: &AuditContext,
        pending: &PendingAction,
        error: &ValidationError,
    ) {
        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "execution.action_rejected",
                AuditCategory::Execution,
                AuditOutcome::Rejected,
            )
            .with_metadata("action_type", pending.action_type().as_str())
            .with_metadata("pending_action_id", pending.id.0.clone())
            .with_metadata("reason", error.to_string()),
        );
    }

    async fn record_rainfall(
        &self,
        session: &Session,
        message: &QueuedMessage,
        millimeters: Decimal,
        audit: &AuditContext,
    ) -> Result<Reply, ProcessingError> {
        let plan = plan_rainfall(&session.farm_id, &session.sender_key, &message.id, millimeters);
        match self.inventory.apply(&plan).await {
            Ok(ApplyOutcome::Applied(event)) => {
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "execution.rainfall_recorded",
                        AuditCategory::Execution,
                        AuditOutcome::Success,
                    )
                    .with_metadata("millimeters", millimeters.to_string())
                    .with_metadata("ledger_event_id", event.id.0.clone()),
                );
                Ok(replies::rainfall_recorded(&event))
            }
            Ok(ApplyOutcome::AlreadyApplied(_)) => Ok(Reply::text(replies::ALREADY_APPLIED)),
            Err(ApplyError::Rejected(error)) => Ok(Reply::text(error.user_message())),
            Err(ApplyError::Repository(error)) => Err(error.into()),
        }
    }
}

#[async_trait]
impl MessageHandler for ConversationRuntime {
    async fn handle(&self, message: &QueuedMessage) -> Result<TurnReport, ProcessingError> {
        let sender = &message.sender_key;
        let audit = AuditContext::new(Some(sender.clone()), message.id.0.clone(), ACTOR);

        let Some(mut session) = self.sessions.find(sender).await? else {
            return self.first_contact(message, &audit).await;
        };

        let input = match &message.payload {
            MessagePayload::Text { body } => ConversationInput::Text(body.clone()),
            MessagePayload::Choice { option_id } => ConversationInput::Choice(option_id.clone()),
            MessagePayload::Intent(_) => ConversationInput::Intent,
        };
        let context = match candidate_email(session.state, &input) {
            Some(email) => ConversationContext {
                email_taken: self.sessions.email_taken(&email, sender).await?,
            },
            None => ConversationContext::default(),
        };
        let outcome =
            self.flow.apply_with_audit(session.state, &input, &context, self.audit.as_ref(), &audit);

        let previous = session.clone();
        session.touch(Utc::now());
        session.state = outcome.to;

        let mut routed = None;
        let mut reply = replies::unknown_state();
        for action in &outcome.actions {
            reply = match action {
                ConversationAction::AcceptDisplayName(name) => {
                    session.display_name = Some(name.clone());
                    replies::onboarding_complete(&session)
                }
                ConversationAction::AcceptEmail(email) => {
                    session.email = Some(email.clone());
                    replies::onboarding_complete(&session)
                }
                ConversationAction::Reprompt(reason) => replies::reprompt(*reason),
                ConversationAction::ReplyHelp => replies::unknown_state(),
                ConversationAction::RouteCommand => {
                    let turn = self.route(&session, message, &audit).await?;
                    let reply = turn.reply.clone();
                    routed = Some(turn);
                    reply
                }
            };
        }

        match self.sessions.save(&session).await {
            Ok(()) => {}
            // Another sender claimed the email between the lookup and the write.
            Err(RepositoryError::Conflict(_)) if session.email != previous.email => {
                session = previous;
                session.touch(Utc::now());
                self.sessions.save(&session).await?;
                reply = replies::reprompt(RepromptReason::EmailTaken);
            }
            Err(error) => return Err(error.into()),
        }

        self.deliver(sender, &reply).await?;

        if routed.as_ref().is_some_and(|turn| turn.clear_pending) {
            self.pending.clear(sender).await?;
        }

        let command = routed.as_ref().map(|turn| turn.command);
        info!(
            event_name = "conversation.turn_handled",
            correlation_id = %message.id,
            sender_key = %sender,
            from = outcome.from.as_str(),
            to = session.state.as_str(),
            command = command.unwrap_or("-"),
            "turn handled"
        );

        Ok(TurnReport {
            message_id: message.id.clone(),
            sender_key: sender.clone(),
            state: Some(session.state),
            command,
            reply,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use farmhand_core::audit::InMemoryAuditSink;
    use farmhand_core::domain::action::{CategoryKey, LocationRef, TagNumber};
    use farmhand_core::domain::inventory::{LedgerEventKind, TagState};
    use farmhand_core::domain::message::{IntentEvent, MessagePayload, QueuedMessage, SenderKey};
    use farmhand_core::domain::session::{FarmId, Invitation, InvitationKind, SessionState};
    use farmhand_db::repositories::{
        InMemoryInventoryStore, InMemoryPendingActionRepository, InMemorySessionRepository,
        InventoryStore, InvitationRepository, PendingActionRepository, SessionRepository,
    };
    use serde_json::json;

    use super::{ConversationRuntime, MessageHandler, ProcessingError};
    use crate::notify::{RecordingNotifier, SentNotification};
    use crate::replies;

    const WORKER: &str = "+5491100000001";
    const OWNER: &str = "+5491100000002";

    struct Harness {
        runtime: ConversationRuntime,
        sessions: Arc<InMemorySessionRepository>,
        pending: Arc<InMemoryPendingActionRepository>,
        inventory: Arc<InMemoryInventoryStore>,
        notifier: RecordingNotifier,
        audit: InMemoryAuditSink,
    }

    impl Harness {
        fn new() -> Self {
            let sessions = Arc::new(InMemorySessionRepository::default());
            let pending = Arc::new(InMemoryPendingActionRepository::default());
            let inventory = Arc::new(InMemoryInventoryStore::default());
            let notifier = RecordingNotifier::default();
            let audit = InMemoryAuditSink::default();
            let runtime = ConversationRuntime::new(
                sessions.clone(),
                pending.clone(),
                inventory.clone(),
                Arc::new(notifier.clone()),
            )
            .with_audit_sink(Arc::new(audit.clone()));
            Self { runtime, sessions, pending, inventory, notifier, audit }
        }

        async fn invite(&self, sender: &str, kind: InvitationKind) {
            self.sessions
                .invite(Invitation::new(SenderKey::new(sender), farm(), kind))
                .await
                .expect("invite");
        }

        /// Invites a member and walks them through onboarding.
        async fn ready_worker(&self) {
            self.invite(WORKER, InvitationKind::Member).await;
            self.text(WORKER, "hola").await;
            self.text(WORKER, "Marta").await;
        }

        async fn send(&self, sender: &str, payload: MessagePayload) -> String {
            let message = QueuedMessage::new(SenderKey::new(sender), payload);
            let report = self.runtime.handle(&message).await.expect("turn should be handled");
            report.reply.body().to_string()
        }

        async fn text(&self, sender: &str, body: &str) -> String {
            self.send(sender, MessagePayload::text(body)).await
        }

        async fn intent(&self, sender: &str, kind: &str, slots: serde_json::Value) -> String {
            let slots: BTreeMap<String, serde_json::Value> =
                serde_json::from_value(slots).expect("slots map");
            self.send(sender, MessagePayload::Intent(IntentEvent { kind: kind.to_string(), slots }))
                .await
        }

        async fn quantity(&self, location: &str, category: &str) -> i64 {
            self.inventory
                .quantity(
                    &farm(),
                    &LocationRef(location.to_string()),
                    &CategoryKey(category.to_string()),
                )
                .await
                .expect("quantity")
        }

        async fn has_pending(&self, sender: &str) -> bool {
            self.pending.peek(&SenderKey::new(sender)).await.expect("peek").is_some()
        }
    }

    fn farm() -> FarmId {
        FarmId("farm-1".to_string())
    }

    fn receive(quantity: i64) -> serde_json::Value {
        json!({
            "movement": "receive",
            "location": "silo-1",
            "category": "corn-kg",
            "quantity": quantity,
        })
    }

    #[tokio::test]
    async fn unknown_sender_gets_the_not_registered_reply() {
        let harness = Harness::new();
        let reply = harness.text(WORKER, "hola").await;

        assert_eq!(reply, replies::NOT_REGISTERED);
        assert!(harness.sessions.find(&SenderKey::new(WORKER)).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn member_onboarding_gates_commands_until_a_name_is_given() {
        let harness = Harness::new();
        harness.invite(WORKER, InvitationKind::Member).await;

        let welcome = harness.text(WORKER, "status").await;
        assert!(welcome.contains("what name"));

        let short = harness.text(WORKER, "Al").await;
        assert!(short.contains("too short"));
        let session =
            harness.sessions.find(&SenderKey::new(WORKER)).await.expect("find").expect("session");
        assert_eq!(session.state, SessionState::OnboardingName);

        let done = harness.text(WORKER, "  Marta ").await;
        assert!(done.contains("Thanks, Marta"));
        let session =
            harness.sessions.find(&SenderKey::new(WORKER)).await.expect("find").expect("session");
        assert_eq!(session.state, SessionState::Ready);
        assert_eq!(session.display_name.as_deref(), Some("Marta"));

        let status = harness.text(WORKER, "status").await;
        assert!(status.contains("Hi Marta"));
    }

    #[tokio::test]
    async fn owner_onboarding_rejects_a_taken_email() {
        let harness = Harness::new();
        harness.invite(OWNER, InvitationKind::Owner).await;
        harness.invite("+5491100000003", InvitationKind::Owner).await;

        harness.text(OWNER, "hi").await;
        assert!(harness.text(OWNER, "not an email").await.contains("does not look like"));
        assert!(harness.text(OWNER, "Owner@Farm.com").await.contains("all set"));

        harness.text("+5491100000003", "hi").await;
        let taken = harness.text("+5491100000003", "owner@farm.com").await;
        assert!(taken.contains("already used"));

        let owner =
            harness.sessions.find(&SenderKey::new(OWNER)).await.expect("find").expect("session");
        assert_eq!(owner.email.as_deref(), Some("owner@farm.com"));
    }

    #[tokio::test]
    async fn staged_action_waits_for_confirmation_then_applies_once() {
        let harness = Harness::new();
        harness.ready_worker().await;

        harness.intent(WORKER, "stock_movement", receive(40)).await;
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 0);
        match harness.notifier.sent_to(&SenderKey::new(WORKER)).last() {
            Some(SentNotification::Choice { options, .. }) => {
                assert_eq!(options[0].id, "confirm:stock_movement");
            }
            other => panic!("expected a confirmation prompt, got {other:?}"),
        }

        let done = harness.send(WORKER, MessagePayload::choice("confirm:stock_movement")).await;
        assert!(done.starts_with("Done: receive 40 corn-kg at silo-1"));
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 40);
        assert!(!harness.has_pending(WORKER).await);

        let again = harness.text(WORKER, "confirm").await;
        assert_eq!(again, replies::NOTHING_PENDING);
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 40);
    }

    #[tokio::test]
    async fn confirm_with_nothing_pending_changes_nothing() {
        let harness = Harness::new();
        harness.ready_worker().await;

        assert_eq!(harness.text(WORKER, "yes").await, replies::NOTHING_PENDING);
        assert!(harness.inventory.ledger(&farm()).await.expect("ledger").is_empty());
        assert!(harness
            .audit
            .events()
            .iter()
            .any(|event| event.event_type == "execution.confirm_without_pending"));
    }

    #[tokio::test]
    async fn staging_again_replaces_the_single_slot() {
        let harness = Harness::new();
        harness.ready_worker().await;

        harness.intent(WORKER, "stock_movement", receive(10)).await;
        let second = harness.intent(WORKER, "stock_movement", receive(25)).await;
        assert!(second.contains("replaces your earlier pending stock movement"));

        harness.text(WORKER, "confirm").await;
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 25);
    }

    #[tokio::test]
    async fn cancel_clears_the_slot_without_touching_stock() {
        let harness = Harness::new();
        harness.ready_worker().await;

        harness.intent(WORKER, "stock_movement", receive(10)).await;
        assert_eq!(harness.text(WORKER, "cancel").await, replies::CANCELLED);
        assert!(!harness.has_pending(WORKER).await);
        assert_eq!(harness.text(WORKER, "cancel").await, replies::NOTHING_PENDING);
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 0);
    }

    #[tokio::test]
    async fn confirming_the_wrong_family_discards_the_slot() {
        let harness = Harness::new();
        harness.ready_worker().await;

        harness.intent(WORKER, "stock_movement", receive(10)).await;
        let reply = harness.send(WORKER, MessagePayload::choice("confirm:livestock_tag")).await;

        assert!(reply.contains("pending action is a stock movement"));
        assert!(!harness.has_pending(WORKER).await);
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 0);
    }

    #[tokio::test]
    async fn insufficient_stock_is_reported_and_the_slot_is_consumed() {
        let harness = Harness::new();
        harness.ready_worker().await;
        harness.intent(WORKER, "stock_movement", receive(5)).await;
        harness.text(WORKER, "confirm").await;

        harness
            .intent(
                WORKER,
                "stock_movement",
                json!({
                    "movement": "transfer",
                    "location": "silo-1",
                    "category": "corn-kg",
                    "to_location": "silo-2",
                    "quantity": 6,
                }),
            )
            .await;
        let reply = harness.text(WORKER, "confirm").await;

        assert!(reply.contains("only 5 are available"));
        assert!(!harness.has_pending(WORKER).await);
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 5);
        assert_eq!(harness.quantity("silo-2", "corn-kg").await, 0);
    }

    #[tokio::test]
    async fn failed_reply_keeps_the_slot_and_the_retry_does_not_apply_twice() {
        let harness = Harness::new();
        harness.ready_worker().await;
        harness.intent(WORKER, "stock_movement", receive(40)).await;

        let confirm = QueuedMessage::new(SenderKey::new(WORKER), MessagePayload::text("confirm"));
        harness.notifier.fail_next(1);
        let error = harness.runtime.handle(&confirm).await.expect_err("delivery fails");
        assert!(matches!(error, ProcessingError::Transient(_)));
        assert!(harness.has_pending(WORKER).await);
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 40);

        let retry = harness.runtime.handle(&confirm).await.expect("retry");
        assert_eq!(retry.reply.body(), replies::ALREADY_APPLIED);
        assert!(!harness.has_pending(WORKER).await);
        assert_eq!(harness.quantity("silo-1", "corn-kg").await, 40);
        assert_eq!(harness.inventory.ledger(&farm()).await.expect("ledger").len(), 1);
    }

    #[tokio::test]
    async fn retried_rainfall_message_is_recorded_once() {
        let harness = Harness::new();
        harness.ready_worker().await;

        let rain = QueuedMessage::new(SenderKey::new(WORKER), MessagePayload::text("rain 12"));
        harness.notifier.fail_next(1);
        let error = harness.runtime.handle(&rain).await.expect_err("delivery fails");
        assert!(matches!(error, ProcessingError::Transient(_)));

        let retry = harness.runtime.handle(&rain).await.expect("retry");
        assert_eq!(retry.reply.body(), replies::ALREADY_APPLIED);

        let ledger = harness.inventory.ledger(&farm()).await.expect("ledger");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].source_message_id.as_ref(), Some(&rain.id));

        let next = harness.text(WORKER, "rain 12").await;
        assert_eq!(next, "Recorded rainfall 12 mm.");
        assert_eq!(harness.inventory.ledger(&farm()).await.expect("ledger").len(), 2);
    }

    #[tokio::test]
    async fn rainfall_is_recorded_without_confirmation() {
        let harness = Harness::new();
        harness.ready_worker().await;

        let reply = harness.text(WORKER, "rain 12,5 mm").await;
        assert_eq!(reply, "Recorded rainfall 12.5 mm.");

        let ledger = harness.inventory.ledger(&farm()).await.expect("ledger");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, LedgerEventKind::Rainfall);
        assert!(!harness.has_pending(WORKER).await);
    }

    #[tokio::test]
    async fn livestock_birth_registers_tags_after_confirmation() {
        let harness = Harness::new();
        harness.ready_worker().await;

        harness
            .intent(
                WORKER,
                "livestock_tag",
                json!({
                    "action": "birth",
                    "location": "paddock-1",
                    "category": "calf",
                    "tags": ["ar-77", "AR-78"],
                }),
            )
            .await;
        harness.text(WORKER, "si").await;

        assert_eq!(harness.quantity("paddock-1", "calf").await, 2);
        let tag = harness
            .inventory
            .tag(&farm(), &TagNumber("AR-77".to_string()))
            .await
            .expect("tag")
            .expect("registered tag");
        assert_eq!(tag.state, TagState::Registered);
    }

    #[tokio::test]
    async fn malformed_intent_gets_a_validation_reply_and_stages_nothing() {
        let harness = Harness::new();
        harness.ready_worker().await;

        let reply = harness
            .intent(WORKER, "stock_movement", json!({ "movement": "receive", "location": "silo-1" }))
            .await;

        assert!(reply.contains("`category` is required"));
        assert!(!harness.has_pending(WORKER).await);
    }

    #[tokio::test]
    async fn stock_lists_positions_and_unknown_text_gets_help() {
        let harness = Harness::new();
        harness.ready_worker().await;
        harness.intent(WORKER, "stock_movement", receive(7)).await;
        harness.text(WORKER, "ok").await;

        let stock = harness.text(WORKER, "stock silo-1").await;
        assert!(stock.contains("- 7 corn-kg at silo-1"));

        let unknown = harness.text(WORKER, "plant trees").await;
        assert!(unknown.starts_with("I did not understand \"plant trees\""));
    }

    #[tokio::test]
    async fn stock_finds_locations_named_with_capitals() {
        let harness = Harness::new();
        harness.ready_worker().await;
        let mut movement = receive(7);
        movement["location"] = json!("Silo-1");
        harness.intent(WORKER, "stock_movement", movement).await;
        harness.text(WORKER, "ok").await;

        let stock = harness.text(WORKER, "Stock Silo-1").await;
        assert!(stock.contains("- 7 corn-kg at Silo-1"), "unexpected reply: {stock}");
    }
}
