//! Outbound reply wording. Every handled turn produces exactly one [`Reply`].

use farmhand_core::commands::{confirm_option_id, CANCEL_OPTION_ID};
use farmhand_core::domain::action::{ActionType, PendingAction};
use farmhand_core::domain::inventory::{InventoryPosition, LedgerEvent};
use farmhand_core::domain::session::{Session, SessionState};
use farmhand_core::flows::RepromptReason;

use crate::notify::ChoiceOption;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Choice { body: String, options: [ChoiceOption; 2] },
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Text(body) | Self::Choice { body, .. } => body,
        }
    }
}

pub const HELP: &str = "You can send: \"status\", \"stock [location]\", \"rain <mm>\" to \
record rainfall, or describe a stock movement, livestock event or field task. I will \
ask you to confirm before changing anything. Reply \"confirm\" or \"cancel\" to a pending action.";

pub const NOT_REGISTERED: &str =
    "This number is not registered with any farm. Ask the farm owner to invite you.";

pub const NOTHING_PENDING: &str = "There is nothing waiting for confirmation.";

pub const CANCELLED: &str = "Cancelled. Nothing was changed.";

pub const ALREADY_APPLIED: &str = "That action was already recorded. Nothing else was changed.";

pub const DROPPED_APOLOGY: &str = "Sorry, I could not process your last message after several \
attempts. Please send it again in a few minutes.";

pub fn onboarding_prompt(state: SessionState) -> Reply {
    match state {
        SessionState::OnboardingName => {
            Reply::text("Welcome! Before we start, what name should I use for you?")
        }
        SessionState::OnboardingEmail => Reply::text(
            "Welcome! You are the owner of this farm account. Please send the email address \
             for your account.",
        ),
        SessionState::Ready => Reply::text(HELP),
        SessionState::Unknown => unknown_state(),
    }
}

pub fn reprompt(reason: RepromptReason) -> Reply {
    let body = match reason {
        RepromptReason::NameTooShort => "That name is too short. Please send at least 3 characters.",
        RepromptReason::InvalidEmail => "That does not look like an email address. Please try again.",
        RepromptReason::EmailTaken => {
            "That email is already used by another account. Please send a different one."
        }
        RepromptReason::ExpectedName => "Please reply with your name to finish setting up.",
        RepromptReason::ExpectedEmail => "Please reply with your email address to finish setting up.",
    };
    Reply::text(body)
}

pub fn onboarding_complete(session: &Session) -> Reply {
    let greeting = match session.display_name.as_deref() {
        Some(name) => format!("Thanks, {name}! You are all set."),
        None => "Thanks! You are all set.".to_string(),
    };
    Reply::text(format!("{greeting} {HELP}"))
}

pub fn unknown_state() -> Reply {
    Reply::text(format!("Your account is not fully set up yet. {HELP}"))
}

pub fn unknown_command(input: &str) -> Reply {
    Reply::text(format!("I did not understand \"{}\". {HELP}", input.trim()))
}

/// The two-option confirmation prompt for a freshly staged action.
pub fn staged(pending: &PendingAction, replaced: Option<&PendingAction>) -> Reply {
    let mut body = format!("Please confirm: {}.", pending.action.summary());
    if let Some(previous) = replaced {
        body.push_str(&format!(
            " This replaces your earlier pending {}.",
            family_label(previous.action_type())
        ));
    }
    Reply::Choice {
        body,
        options: [
            ChoiceOption::new(confirm_option_id(pending.action_type()), "Confirm"),
            ChoiceOption::new(CANCEL_OPTION_ID, "Cancel"),
        ],
    }
}

pub fn applied(event: &LedgerEvent) -> Reply {
    Reply::text(format!("Done: {}.", event.summary))
}

pub fn rainfall_recorded(event: &LedgerEvent) -> Reply {
    Reply::text(format!("Recorded {}.", event.summary))
}

pub fn status(session: &Session, pending: Option<&PendingAction>) -> Reply {
    let who = session.display_name.as_deref().or(session.email.as_deref()).unwrap_or("there");
    let pending = match pending {
        Some(pending) => format!("Pending confirmation: {}.", pending.action.summary()),
        None => NOTHING_PENDING.to_string(),
    };
    Reply::text(format!("Hi {who}. Farm: {}. {pending}", session.farm_id.0))
}

pub fn stock(positions: &[InventoryPosition]) -> Reply {
    if positions.is_empty() {
        return Reply::text("No stock on record.");
    }
    let lines = positions
        .iter()
        .map(|position| {
            format!("- {} {} at {}", position.quantity, position.category, position.location)
        })
        .collect::<Vec<_>>()
        .join("\n");
    Reply::text(format!("Current stock:\n{lines}"))
}

fn family_label(action_type: ActionType) -> String {
    action_type.as_str().replace('_', " ")
}
