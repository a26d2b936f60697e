use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::session::SessionState;
use crate::flows::states::{
    ConversationAction, ConversationContext, ConversationInput, RepromptReason, TurnOutcome,
};

pub const MIN_DISPLAY_NAME_CHARS: usize = 3;

/// Per-sender conversation state machine. Pure: lookups the decision depends on
/// (email uniqueness) arrive through [`ConversationContext`].
#[derive(Clone, Debug, Default)]
pub struct ConversationFlow;

impl ConversationFlow {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(
        &self,
        current: SessionState,
        input: &ConversationInput,
        context: &ConversationContext,
    ) -> TurnOutcome {
        transition(current, input, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: SessionState,
        input: &ConversationInput,
        context: &ConversationContext,
        sink: &S,
        audit: &AuditContext,
    ) -> TurnOutcome
    where
        S: AuditSink + ?Sized,
    {
        let outcome = self.apply(current, input, context);
        let reprompt = outcome.actions.iter().find_map(|action| match action {
            ConversationAction::Reprompt(reason) => Some(*reason),
            _ => None,
        });

        if outcome.changed_state() {
            sink.emit(
                AuditEvent::new(
                    audit.sender_key.clone(),
                    audit.correlation_id.clone(),
                    "conversation.transition_applied",
                    AuditCategory::Conversation,
                    audit.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str()),
            );
        } else if let Some(reason) = reprompt {
            sink.emit(
                AuditEvent::new(
                    audit.sender_key.clone(),
                    audit.correlation_id.clone(),
                    "conversation.onboarding_reprompted",
                    AuditCategory::Conversation,
                    audit.actor.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("state", outcome.from.as_str())
                .with_metadata("reason", format!("{reason:?}")),
            );
        }

        outcome
    }
}

/// The email the flow would accept from this input, before the uniqueness lookup.
pub fn candidate_email(current: SessionState, input: &ConversationInput) -> Option<String> {
    match (current, input) {
        (SessionState::OnboardingEmail, ConversationInput::Text(text)) => {
            let normalized = normalize_email(text);
            is_email_shaped(&normalized).then_some(normalized)
        }
        _ => None,
    }
}

pub fn normalize_email(text: &str) -> String {
    text.trim().to_ascii_lowercase()
}

pub fn is_email_shaped(value: &str) -> bool {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

fn transition(
    current: SessionState,
    input: &ConversationInput,
    context: &ConversationContext,
) -> TurnOutcome {
    use ConversationAction::{AcceptDisplayName, AcceptEmail, Reprompt, ReplyHelp, RouteCommand};
    use SessionState::{OnboardingEmail, OnboardingName, Ready, Unknown};

    let (to, actions) = match (current, input) {
        (OnboardingName, ConversationInput::Text(text)) => {
            let name = text.trim();
            if name.chars().count() >= MIN_DISPLAY_NAME_CHARS {
                (Ready, vec![AcceptDisplayName(name.to_owned())])
            } else {
                (OnboardingName, vec![Reprompt(RepromptReason::NameTooShort)])
            }
        }
        (OnboardingName, _) => (OnboardingName, vec![Reprompt(RepromptReason::ExpectedName)]),
        (OnboardingEmail, ConversationInput::Text(text)) => {
            let email = normalize_email(text);
            if !is_email_shaped(&email) {
                (OnboardingEmail, vec![Reprompt(RepromptReason::InvalidEmail)])
            } else if context.email_taken {
                (OnboardingEmail, vec![Reprompt(RepromptReason::EmailTaken)])
            } else {
                (Ready, vec![AcceptEmail(email)])
            }
        }
        (OnboardingEmail, _) => (OnboardingEmail, vec![Reprompt(RepromptReason::ExpectedEmail)]),
        (Ready, _) => (Ready, vec![RouteCommand]),
        (Unknown, _) => (Unknown, vec![ReplyHelp]),
    };

    TurnOutcome { from: current, to, actions }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::message::SenderKey;
    use crate::domain::session::SessionState;
    use crate::flows::engine::{candidate_email, is_email_shaped, ConversationFlow};
    use crate::flows::states::{
        ConversationAction, ConversationContext, ConversationInput, RepromptReason,
    };

    fn text(value: &str) -> ConversationInput {
        ConversationInput::Text(value.to_owned())
    }

    #[test]
    fn name_of_three_characters_completes_onboarding() {
        let flow = ConversationFlow::new();
        let outcome =
            flow.apply(SessionState::OnboardingName, &text("  Ana  "), &ConversationContext::default());

        assert_eq!(outcome.to, SessionState::Ready);
        assert_eq!(outcome.actions, vec![ConversationAction::AcceptDisplayName("Ana".to_owned())]);
    }

    #[test]
    fn short_name_is_reprompted_without_transition() {
        let flow = ConversationFlow::new();
        let outcome =
            flow.apply(SessionState::OnboardingName, &text("Al"), &ConversationContext::default());

        assert_eq!(outcome.to, SessionState::OnboardingName);
        assert_eq!(
            outcome.actions,
            vec![ConversationAction::Reprompt(RepromptReason::NameTooShort)]
        );
    }

    #[test]
    fn invalid_email_keeps_onboarding_email_state() {
        let flow = ConversationFlow::new();
        for input in ["not-an-email", "a@b", "two words@farm.com", "@farm.com", "x@@farm.com"] {
            let outcome = flow.apply(
                SessionState::OnboardingEmail,
                &text(input),
                &ConversationContext::default(),
            );
            assert_eq!(outcome.to, SessionState::OnboardingEmail, "input {input}");
            assert_eq!(
                outcome.actions,
                vec![ConversationAction::Reprompt(RepromptReason::InvalidEmail)]
            );
        }
    }

    #[test]
    fn taken_email_keeps_onboarding_email_state() {
        let flow = ConversationFlow::new();
        let outcome = flow.apply(
            SessionState::OnboardingEmail,
            &text("owner@farm.com"),
            &ConversationContext { email_taken: true },
        );

        assert_eq!(outcome.to, SessionState::OnboardingEmail);
        assert_eq!(outcome.actions, vec![ConversationAction::Reprompt(RepromptReason::EmailTaken)]);
    }

    #[test]
    fn unique_email_is_normalized_and_completes_onboarding() {
        let flow = ConversationFlow::new();
        let outcome = flow.apply(
            SessionState::OnboardingEmail,
            &text(" Owner@Farm.COM "),
            &ConversationContext::default(),
        );

        assert_eq!(outcome.to, SessionState::Ready);
        assert_eq!(
            outcome.actions,
            vec![ConversationAction::AcceptEmail("owner@farm.com".to_owned())]
        );
    }

    #[test]
    fn ready_routes_and_unknown_replies_with_help() {
        let flow = ConversationFlow::new();
        let ready = flow.apply(SessionState::Ready, &ConversationInput::Intent, &Default::default());
        assert_eq!(ready.actions, vec![ConversationAction::RouteCommand]);

        let unknown = flow.apply(SessionState::Unknown, &text("hola"), &Default::default());
        assert_eq!(unknown.to, SessionState::Unknown);
        assert_eq!(unknown.actions, vec![ConversationAction::ReplyHelp]);
    }

    #[test]
    fn onboarding_ignores_button_replies() {
        let flow = ConversationFlow::new();
        let outcome = flow.apply(
            SessionState::OnboardingEmail,
            &ConversationInput::Choice("cancel".to_owned()),
            &Default::default(),
        );
        assert_eq!(
            outcome.actions,
            vec![ConversationAction::Reprompt(RepromptReason::ExpectedEmail)]
        );
    }

    #[test]
    fn candidate_email_only_applies_during_email_onboarding() {
        assert_eq!(
            candidate_email(SessionState::OnboardingEmail, &text("a@farm.com")),
            Some("a@farm.com".to_owned())
        );
        assert_eq!(candidate_email(SessionState::Ready, &text("a@farm.com")), None);
        assert_eq!(candidate_email(SessionState::OnboardingEmail, &text("nope")), None);
        assert!(is_email_shaped("field.hand+1@estancia.com.ar"));
    }

    #[test]
    fn transitions_and_reprompts_are_audited() {
        let flow = ConversationFlow::new();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(SenderKey::new("+5491100000004")), "msg-1", "worker");

        flow.apply_with_audit(
            SessionState::OnboardingName,
            &text("Al"),
            &ConversationContext::default(),
            &sink,
            &audit,
        );
        flow.apply_with_audit(
            SessionState::OnboardingName,
            &text("Alba"),
            &ConversationContext::default(),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "conversation.onboarding_reprompted");
        assert_eq!(events[1].event_type, "conversation.transition_applied");
        assert_eq!(events[1].metadata.get("to").map(String::as_str), Some("ready"));
    }
}
