use serde::{Deserialize, Serialize};

use crate::domain::session::SessionState;

/// What the sender said, reduced to what the flow needs to decide on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationInput {
    Text(String),
    Choice(String),
    Intent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConversationContext {
    /// Set when the candidate email is already attached to another session.
    pub email_taken: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepromptReason {
    NameTooShort,
    InvalidEmail,
    EmailTaken,
    ExpectedName,
    ExpectedEmail,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationAction {
    AcceptDisplayName(String),
    AcceptEmail(String),
    Reprompt(RepromptReason),
    RouteCommand,
    ReplyHelp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub from: SessionState,
    pub to: SessionState,
    pub actions: Vec<ConversationAction>,
}

impl TurnOutcome {
    pub fn changed_state(&self) -> bool {
        self.from != self.to
    }
}
