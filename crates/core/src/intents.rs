use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::commands::{parse_millimeters, Command};
use crate::domain::action::{
    ActionType, AgronomicEvent, AgronomicKind, CategoryKey, LivestockTagAction, LocationRef,
    MovementKind, StagedAction, StockLine, StockMovement, TagActionKind, TagNumber,
    TransferDestination,
};
use crate::domain::message::IntentEvent;
use crate::domain::session::FarmId;
use crate::errors::ValidationError;

pub const RAINFALL_INTENT: &str = "register_rainfall";

/// Converts a resolved intent into a command. Action families always become
/// [`Command::Stage`]; they never apply directly.
pub fn command_from_intent(event: &IntentEvent) -> Result<Command, ValidationError> {
    let kind = event.kind.trim().to_ascii_lowercase();
    if kind == RAINFALL_INTENT {
        let raw = Slots(&event.slots).required_text("millimeters")?;
        return Ok(Command::RegisterRainfall { millimeters: parse_millimeters(&raw)? });
    }

    let action_type = ActionType::parse(&kind).ok_or_else(|| {
        ValidationError::malformed(format!("`{}` is not an action I can record", event.kind))
    })?;
    let slots = Slots(&event.slots);
    let action = match action_type {
        ActionType::StockMovement => StagedAction::StockMovement(stock_movement(&slots)?),
        ActionType::LivestockTag => StagedAction::LivestockTag(livestock_tag(&slots)?),
        ActionType::AgronomicEvent => StagedAction::AgronomicEvent(agronomic_event(&slots)?),
    };
    Ok(Command::Stage { action })
}

fn stock_movement(slots: &Slots<'_>) -> Result<StockMovement, ValidationError> {
    let location = LocationRef(slots.required_text("location")?);
    let category = CategoryKey(slots.required_text("category")?);
    let quantity = slots.positive_quantity("quantity")?;
    let kind = match slots.required_text("movement")?.to_ascii_lowercase().as_str() {
        "receive" | "in" => MovementKind::Receive,
        "consume" | "out" => MovementKind::Consume,
        "transfer" => {
            let to_location = LocationRef(slots.required_text("to_location")?);
            let to_category = slots.optional_text("to_category").map(CategoryKey);
            let same_position = to_location == location
                && to_category.as_ref().map_or(true, |to| *to == category);
            if same_position {
                return Err(ValidationError::malformed(
                    "a transfer needs a destination different from its source",
                ));
            }
            MovementKind::Transfer { to_location, to_category }
        }
        other => {
            return Err(ValidationError::malformed(format!(
                "`{other}` is not a stock movement (receive, consume or transfer)"
            )))
        }
    };

    Ok(StockMovement { kind, location, category, quantity, note: slots.optional_text("note") })
}

fn livestock_tag(slots: &Slots<'_>) -> Result<LivestockTagAction, ValidationError> {
    let location = LocationRef(slots.required_text("location")?);
    let category = CategoryKey(slots.required_text("category")?);
    let tags = unique_tags(slots.text_list("tags")?)?;

    let kind = match slots.required_text("action")?.to_ascii_lowercase().as_str() {
        "initial_stock" => TagActionKind::InitialStock,
        "birth" => TagActionKind::Birth,
        "purchase" => TagActionKind::Purchase,
        "sale" => TagActionKind::Sale,
        "death" => TagActionKind::Death,
        "transfer" => {
            let to_location = slots.optional_text("to_location");
            let destination = match (to_location, slots.optional_text("to_farm")) {
                (Some(to), None) if to != location.0 => {
                    TransferDestination::Location(LocationRef(to))
                }
                (Some(_), None) => {
                    return Err(ValidationError::malformed(
                        "a transfer needs a destination different from its source",
                    ))
                }
                (None, Some(farm)) => TransferDestination::Farm(FarmId(farm)),
                (Some(_), Some(_)) => {
                    return Err(ValidationError::malformed(
                        "a transfer goes either to a location or to a farm, not both",
                    ))
                }
                (None, None) => {
                    return Err(ValidationError::malformed(
                        "a transfer needs `to_location` or `to_farm`",
                    ))
                }
            };
            TagActionKind::Transfer { destination }
        }
        other => {
            return Err(ValidationError::malformed(format!(
                "`{other}` is not a livestock action"
            )))
        }
    };

    Ok(LivestockTagAction { kind, category, location, tags })
}

fn agronomic_event(slots: &Slots<'_>) -> Result<AgronomicEvent, ValidationError> {
    let kind = match slots.required_text("event")?.to_ascii_lowercase().as_str() {
        "sowing" => AgronomicKind::Sowing,
        "fertilization" => AgronomicKind::Fertilization,
        "spraying" => AgronomicKind::Spraying,
        "harvest" => AgronomicKind::Harvest,
        other => {
            return Err(ValidationError::malformed(format!(
                "`{other}` is not an agronomic event"
            )))
        }
    };
    let plot = LocationRef(slots.required_text("plot")?);

    let stock = match (
        slots.optional_text("stock_location"),
        slots.optional_text("stock_category"),
        slots.get("stock_quantity"),
    ) {
        (None, None, None) => None,
        (Some(location), Some(category), Some(_)) => Some(StockLine {
            location: LocationRef(location),
            category: CategoryKey(category),
            quantity: slots.positive_quantity("stock_quantity")?,
        }),
        _ => {
            return Err(ValidationError::malformed(
                "stock_location, stock_category and stock_quantity go together",
            ))
        }
    };

    Ok(AgronomicEvent { kind, plot, stock, note: slots.optional_text("note") })
}

fn unique_tags(raw: Vec<String>) -> Result<Vec<TagNumber>, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::malformed("at least one tag is required"));
    }
    let mut seen = BTreeSet::new();
    let mut tags = Vec::with_capacity(raw.len());
    for tag in raw {
        let normalized = tag.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(ValidationError::malformed("tags cannot be blank"));
        }
        if !seen.insert(normalized.clone()) {
            return Err(ValidationError::malformed(format!("tag {normalized} is listed twice")));
        }
        tags.push(TagNumber(normalized));
    }
    Ok(tags)
}

struct Slots<'a>(&'a BTreeMap<String, Value>);

impl Slots<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    fn optional_text(&self, key: &str) -> Option<String> {
        let text = match self.get(key)? {
            Value::String(text) => text.trim().to_owned(),
            Value::Number(number) => number.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    fn required_text(&self, key: &str) -> Result<String, ValidationError> {
        self.optional_text(key)
            .ok_or_else(|| ValidationError::malformed(format!("`{key}` is required")))
    }

    fn positive_quantity(&self, key: &str) -> Result<i64, ValidationError> {
        let value = self
            .get(key)
            .ok_or_else(|| ValidationError::malformed(format!("`{key}` is required")))?;
        let quantity = match value {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        }
        .ok_or_else(|| ValidationError::malformed(format!("`{key}` must be a whole number")))?;

        if quantity <= 0 {
            return Err(ValidationError::malformed(format!("`{key}` must be greater than zero")));
        }
        Ok(quantity)
    }

    /// Accepts a JSON array of strings or a comma separated string.
    fn text_list(&self, key: &str) -> Result<Vec<String>, ValidationError> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.clone()),
                    Value::Number(number) => Ok(number.to_string()),
                    _ => Err(ValidationError::malformed(format!("`{key}` must list tag numbers"))),
                })
                .collect(),
            Some(Value::String(text)) => Ok(text.split(',').map(str::to_owned).collect()),
            Some(_) => Err(ValidationError::malformed(format!("`{key}` must list tag numbers"))),
            None => Err(ValidationError::malformed(format!("`{key}` is required"))),
        }
    }
}
