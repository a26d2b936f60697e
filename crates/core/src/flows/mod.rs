pub mod engine;
pub mod states;

pub use engine::{candidate_email, is_email_shaped, ConversationFlow};
pub use states::{
    ConversationAction, ConversationContext, ConversationInput, RepromptReason, TurnOutcome,
};
