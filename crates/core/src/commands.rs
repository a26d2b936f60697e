use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionType, LocationRef, StagedAction};
use crate::errors::ValidationError;

/// Option id prefix of the confirm button on staging prompts: `confirm:<action_type>`.
pub const CONFIRM_OPTION_PREFIX: &str = "confirm:";
pub const CANCEL_OPTION_ID: &str = "cancel";

/// What a ready user asked for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Help,
    Status,
    Stock { location: Option<LocationRef> },
    /// `target` is set when the confirmation came from a typed button.
    Confirm { target: Option<ActionType> },
    Cancel,
    RegisterRainfall { millimeters: Decimal },
    Stage { action: StagedAction },
    Unknown { input: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Status => "status",
            Self::Stock { .. } => "stock",
            Self::Confirm { .. } => "confirm",
            Self::Cancel => "cancel",
            Self::RegisterRainfall { .. } => "register_rainfall",
            Self::Stage { .. } => "stage",
            Self::Unknown { .. } => "unknown",
        }
    }
}

pub fn confirm_option_id(action_type: ActionType) -> String {
    format!("{CONFIRM_OPTION_PREFIX}{}", action_type.as_str())
}

/// Parses a free-text command. Rainfall with an unreadable amount is a validation error;
/// anything unrecognized becomes [`Command::Unknown`].
pub fn parse_text(body: &str) -> Result<Command, ValidationError> {
    let trimmed = body.trim();
    // Verbs match case-insensitively; arguments keep the case they were typed in.
    let original: Vec<&str> = trimmed.split_whitespace().collect();
    let lowered = trimmed.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    let command = match words.as_slice() {
        ["help" | "ayuda" | "?"] => Command::Help,
        ["status"] => Command::Status,
        ["stock"] => Command::Stock { location: None },
        ["stock", location] => {
            let location = original.get(1).copied().unwrap_or(*location);
            Command::Stock { location: Some(LocationRef(location.to_owned())) }
        }
        ["confirm" | "yes" | "si" | "sí" | "ok"] => Command::Confirm { target: None },
        ["cancel" | "no"] => Command::Cancel,
        ["register", "rainfall", amount] | ["rain", amount] => {
            Command::RegisterRainfall { millimeters: parse_millimeters(amount)? }
        }
        ["register", "rainfall", amount, "mm"] | ["rain", amount, "mm"] => {
            Command::RegisterRainfall { millimeters: parse_millimeters(amount)? }
        }
        _ => Command::Unknown { input: trimmed.to_owned() },
    };

    Ok(command)
}

pub fn parse_choice(option_id: &str) -> Command {
    let option = option_id.trim().to_ascii_lowercase();
    if option == CANCEL_OPTION_ID {
        return Command::Cancel;
    }
    match option.strip_prefix(CONFIRM_OPTION_PREFIX) {
        Some(family) => match ActionType::parse(family) {
            Some(target) => Command::Confirm { target: Some(target) },
            None => Command::Unknown { input: option_id.to_owned() },
        },
        None if option == "confirm" => Command::Confirm { target: None },
        None => Command::Unknown { input: option_id.to_owned() },
    }
}

pub fn parse_millimeters(raw: &str) -> Result<Decimal, ValidationError> {
    let normalized = raw.trim().trim_end_matches("mm").replace(',', ".");
    let value = Decimal::from_str(&normalized)
        .map_err(|_| ValidationError::malformed(format!("`{raw}` is not a rainfall amount")))?;
    if value <= Decimal::ZERO {
        return Err(ValidationError::malformed("rainfall must be greater than zero"));
    }
    if value > Decimal::from(2_000) {
        return Err(ValidationError::malformed("rainfall above 2000 mm is not plausible"));
    }
    Ok(value.normalize())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::commands::{confirm_option_id, parse_choice, parse_text, Command};
    use crate::domain::action::{ActionType, LocationRef};
    use crate::errors::ValidationError;

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(parse_text("HELP"), Ok(Command::Help));
        assert_eq!(parse_text("  Status "), Ok(Command::Status));
        assert_eq!(parse_text("Yes"), Ok(Command::Confirm { target: None }));
        assert_eq!(parse_text("no"), Ok(Command::Cancel));
    }

    #[test]
    fn stock_accepts_an_optional_location() {
        assert_eq!(parse_text("stock"), Ok(Command::Stock { location: None }));
        assert_eq!(
            parse_text("stock silo-1"),
            Ok(Command::Stock { location: Some(LocationRef("silo-1".to_owned())) })
        );
    }

    #[test]
    fn stock_location_keeps_its_case() {
        assert_eq!(
            parse_text("STOCK Silo-1"),
            Ok(Command::Stock { location: Some(LocationRef("Silo-1".to_owned())) })
        );
    }

    #[test]
    fn rainfall_accepts_decimal_comma_and_unit() {
        assert_eq!(
            parse_text("register rainfall 12,5"),
            Ok(Command::RegisterRainfall { millimeters: Decimal::new(125, 1) })
        );
        assert_eq!(
            parse_text("rain 30 mm"),
            Ok(Command::RegisterRainfall { millimeters: Decimal::from(30) })
        );
        assert_eq!(
            parse_text("rain 18mm"),
            Ok(Command::RegisterRainfall { millimeters: Decimal::from(18) })
        );
    }

    #[test]
    fn rainfall_rejects_non_positive_amounts() {
        assert!(matches!(parse_text("rain 0"), Err(ValidationError::MalformedInput(_))));
        assert!(matches!(parse_text("rain lots"), Err(ValidationError::MalformedInput(_))));
    }

    #[test]
    fn unrecognized_text_is_unknown() {
        assert_eq!(
            parse_text("sell the tractor"),
            Ok(Command::Unknown { input: "sell the tractor".to_owned() })
        );
    }

    #[test]
    fn choice_replies_carry_the_confirmed_family() {
        let option = confirm_option_id(ActionType::LivestockTag);
        assert_eq!(option, "confirm:livestock_tag");
        assert_eq!(
            parse_choice(&option),
            Command::Confirm { target: Some(ActionType::LivestockTag) }
        );
        assert_eq!(parse_choice("cancel"), Command::Cancel);
        assert!(matches!(parse_choice("confirm:tractor"), Command::Unknown { .. }));
    }
}
