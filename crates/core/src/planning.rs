//! Turns a confirmed action into the set of row changes the inventory store applies
//! in one transaction.

use std::collections::BTreeSet;

use rust_decimal::Decimal;

use crate::domain::action::{
    AgronomicEvent, LivestockTagAction, LocationRef, MovementKind, PendingAction, StagedAction,
    StockMovement, TagActionKind, TransferDestination,
};
use crate::domain::inventory::{
    LedgerDraft, LedgerEventKind, MutationPlan, PositionDelta, TagChange, TagState,
};
use crate::domain::message::{MessageId, SenderKey};
use crate::domain::session::FarmId;
use crate::errors::{DomainError, ValidationError};

pub fn plan_pending_action(
    farm_id: &FarmId,
    pending: &PendingAction,
) -> Result<MutationPlan, DomainError> {
    let (deltas, tag_changes) = match &pending.action {
        StagedAction::StockMovement(movement) => (stock_deltas(movement)?, Vec::new()),
        StagedAction::LivestockTag(action) => tag_plan(action)?,
        StagedAction::AgronomicEvent(event) => (agronomic_deltas(event)?, Vec::new()),
    };

    let payload = serde_json::to_value(&pending.action).map_err(|error| {
        DomainError::InvariantViolation(format!("unserializable action: {error}"))
    })?;

    Ok(MutationPlan {
        farm_id: farm_id.clone(),
        deltas,
        tag_changes,
        ledger: LedgerDraft {
            sender_key: pending.sender_key.clone(),
            pending_action_id: Some(pending.id.clone()),
            source_message_id: None,
            kind: pending.action_type().into(),
            summary: pending.action.summary(),
            payload,
        },
    })
}

/// Rainfall is applied straight from the message, so the message id is its ledger key.
pub fn plan_rainfall(
    farm_id: &FarmId,
    sender_key: &SenderKey,
    source: &MessageId,
    millimeters: Decimal,
) -> MutationPlan {
    MutationPlan {
        farm_id: farm_id.clone(),
        deltas: Vec::new(),
        tag_changes: Vec::new(),
        ledger: LedgerDraft {
            sender_key: sender_key.clone(),
            pending_action_id: None,
            source_message_id: Some(source.clone()),
            kind: LedgerEventKind::Rainfall,
            summary: format!("rainfall {millimeters} mm"),
            payload: serde_json::json!({ "millimeters": millimeters.to_string() }),
        },
    }
}

fn ensure_positive(quantity: i64) -> Result<(), ValidationError> {
    if quantity <= 0 {
        return Err(ValidationError::malformed("quantity must be greater than zero"));
    }
    Ok(())
}

fn stock_deltas(movement: &StockMovement) -> Result<Vec<PositionDelta>, ValidationError> {
    ensure_positive(movement.quantity)?;
    let source = (movement.location.clone(), movement.category.clone());

    let deltas = match &movement.kind {
        MovementKind::Receive => {
            vec![PositionDelta::increment(source.0, source.1, movement.quantity)]
        }
        MovementKind::Consume => {
            vec![PositionDelta::decrement(source.0, source.1, movement.quantity)]
        }
        MovementKind::Transfer { to_location, to_category } => {
            let to_category = to_category.clone().unwrap_or_else(|| movement.category.clone());
            if *to_location == source.0 && to_category == source.1 {
                return Err(ValidationError::malformed(
                    "a transfer needs a destination different from its source",
                ));
            }
            vec![
                PositionDelta::decrement(source.0, source.1, movement.quantity),
                PositionDelta::increment(to_location.clone(), to_category, movement.quantity),
            ]
        }
    };
    Ok(deltas)
}

fn tag_plan(
    action: &LivestockTagAction,
) -> Result<(Vec<PositionDelta>, Vec<TagChange>), ValidationError> {
    if action.tags.is_empty() {
        return Err(ValidationError::malformed("at least one tag is required"));
    }
    let mut seen = BTreeSet::new();
    if let Some(duplicate) = action.tags.iter().find(|tag| !seen.insert(*tag)) {
        return Err(ValidationError::malformed(format!("tag {duplicate} is listed twice")));
    }

    let count = i64::try_from(action.tags.len())
        .map_err(|_| ValidationError::malformed("too many tags in one action"))?;
    let here = || (action.location.clone(), action.category.clone());
    let transition = |to_location: &LocationRef, to_state: TagState| {
        action
            .tags
            .iter()
            .map(|tag| TagChange::Transition {
                tag: tag.clone(),
                category: action.category.clone(),
                from_location: action.location.clone(),
                to_location: to_location.clone(),
                to_state,
            })
            .collect::<Vec<_>>()
    };

    let plan = match &action.kind {
        TagActionKind::InitialStock | TagActionKind::Birth | TagActionKind::Purchase => {
            let (location, category) = here();
            let changes = action
                .tags
                .iter()
                .map(|tag| TagChange::Register {
                    tag: tag.clone(),
                    category: action.category.clone(),
                    location: action.location.clone(),
                })
                .collect();
            (vec![PositionDelta::increment(location, category, count)], changes)
        }
        TagActionKind::Sale | TagActionKind::Death => {
            let to_state = match action.kind {
                TagActionKind::Sale => TagState::Sold,
                _ => TagState::Dead,
            };
            let (location, category) = here();
            (
                vec![PositionDelta::decrement(location, category, count)],
                transition(&action.location, to_state),
            )
        }
        TagActionKind::Transfer { destination: TransferDestination::Location(to) } => {
            if *to == action.location {
                return Err(ValidationError::malformed(
                    "a transfer needs a destination different from its source",
                ));
            }
            let (location, category) = here();
            (
                vec![
                    PositionDelta::decrement(location, category.clone(), count),
                    PositionDelta::increment(to.clone(), category, count),
                ],
                transition(to, TagState::Registered),
            )
        }
        TagActionKind::Transfer { destination: TransferDestination::Farm(_) } => {
            let (location, category) = here();
            (
                vec![PositionDelta::decrement(location, category, count)],
                transition(&action.location, TagState::InTransfer),
            )
        }
    };
    Ok(plan)
}

fn agronomic_deltas(event: &AgronomicEvent) -> Result<Vec<PositionDelta>, ValidationError> {
    let Some(line) = &event.stock else {
        return Ok(Vec::new());
    };
    ensure_positive(line.quantity)?;
    let delta = if event.kind.produces_stock() {
        PositionDelta::increment(line.location.clone(), line.category.clone(), line.quantity)
    } else {
        PositionDelta::decrement(line.location.clone(), line.category.clone(), line.quantity)
    };
    Ok(vec![delta])
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::action::{
        AgronomicEvent, AgronomicKind, CategoryKey, LivestockTagAction, LocationRef, MovementKind,
        PendingAction, StagedAction, StockLine, StockMovement, TagActionKind, TagNumber,
        TransferDestination,
    };
    use crate::domain::inventory::{LedgerEventKind, PositionDelta, TagChange, TagState};
    use crate::domain::message::{MessageId, SenderKey};
    use crate::domain::session::FarmId;
    use crate::errors::{DomainError, ValidationError};
    use crate::planning::{plan_pending_action, plan_rainfall};

    fn farm() -> FarmId {
        FarmId("farm-1".to_owned())
    }

    fn pending(action: StagedAction) -> PendingAction {
        PendingAction::new(SenderKey::new("+5491100000010"), action)
    }

    fn loc(value: &str) -> LocationRef {
        LocationRef(value.to_owned())
    }

    fn cat(value: &str) -> CategoryKey {
        CategoryKey(value.to_owned())
    }

    #[test]
    fn transfer_decrements_source_and_increments_destination() {
        let pending = pending(StagedAction::StockMovement(StockMovement {
            kind: MovementKind::Transfer { to_location: loc("paddock-2"), to_category: None },
            location: loc("paddock-1"),
            category: cat("steers"),
            quantity: 5,
            note: None,
        }));

        let plan = plan_pending_action(&farm(), &pending).expect("plan");
        assert_eq!(
            plan.deltas,
            vec![
                PositionDelta::decrement(loc("paddock-1"), cat("steers"), 5),
                PositionDelta::increment(loc("paddock-2"), cat("steers"), 5),
            ]
        );
        assert_eq!(plan.ledger.kind, LedgerEventKind::StockMovement);
        assert_eq!(plan.ledger.pending_action_id, Some(pending.id.clone()));
    }

    #[test]
    fn sale_moves_tags_to_sold_and_reduces_the_aggregate() {
        let pending = pending(StagedAction::LivestockTag(LivestockTagAction {
            kind: TagActionKind::Sale,
            category: cat("steers"),
            location: loc("paddock-1"),
            tags: vec![TagNumber("AR-1".to_owned()), TagNumber("AR-2".to_owned())],
        }));

        let plan = plan_pending_action(&farm(), &pending).expect("plan");
        assert_eq!(plan.deltas, vec![PositionDelta::decrement(loc("paddock-1"), cat("steers"), 2)]);
        assert!(plan.tag_changes.iter().all(|change| matches!(
            change,
            TagChange::Transition { to_state: TagState::Sold, .. }
        )));
    }

    #[test]
    fn births_register_tags_and_grow_the_aggregate() {
        let pending = pending(StagedAction::LivestockTag(LivestockTagAction {
            kind: TagActionKind::Birth,
            category: cat("calves"),
            location: loc("paddock-4"),
            tags: vec![TagNumber("AR-9".to_owned())],
        }));

        let plan = plan_pending_action(&farm(), &pending).expect("plan");
        assert_eq!(plan.deltas, vec![PositionDelta::increment(loc("paddock-4"), cat("calves"), 1)]);
        assert!(matches!(plan.tag_changes[0], TagChange::Register { .. }));
    }

    #[test]
    fn transfer_to_another_farm_marks_tags_in_transfer() {
        let pending = pending(StagedAction::LivestockTag(LivestockTagAction {
            kind: TagActionKind::Transfer {
                destination: TransferDestination::Farm(FarmId("farm-2".to_owned())),
            },
            category: cat("heifers"),
            location: loc("paddock-3"),
            tags: vec![TagNumber("AR-5".to_owned())],
        }));

        let plan = plan_pending_action(&farm(), &pending).expect("plan");
        assert_eq!(plan.deltas.len(), 1);
        assert!(plan.deltas[0].is_decrement());
        assert!(matches!(
            plan.tag_changes[0],
            TagChange::Transition { to_state: TagState::InTransfer, .. }
        ));
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let pending = pending(StagedAction::LivestockTag(LivestockTagAction {
            kind: TagActionKind::Death,
            category: cat("cows"),
            location: loc("paddock-1"),
            tags: vec![TagNumber("AR-1".to_owned()), TagNumber("AR-1".to_owned())],
        }));

        assert!(matches!(
            plan_pending_action(&farm(), &pending),
            Err(DomainError::Validation(ValidationError::MalformedInput(_)))
        ));
    }

    #[test]
    fn harvest_adds_and_spraying_consumes() {
        let harvest = pending(StagedAction::AgronomicEvent(AgronomicEvent {
            kind: AgronomicKind::Harvest,
            plot: loc("lot-4"),
            stock: Some(StockLine {
                location: loc("silo-1"),
                category: cat("soy-kg"),
                quantity: 900,
            }),
            note: None,
        }));
        let spraying = pending(StagedAction::AgronomicEvent(AgronomicEvent {
            kind: AgronomicKind::Spraying,
            plot: loc("lot-4"),
            stock: Some(StockLine {
                location: loc("shed"),
                category: cat("glyphosate-l"),
                quantity: 40,
            }),
            note: None,
        }));
        let sowing_without_stock = pending(StagedAction::AgronomicEvent(AgronomicEvent {
            kind: AgronomicKind::Sowing,
            plot: loc("lot-5"),
            stock: None,
            note: Some("late sowing".to_owned()),
        }));

        assert_eq!(plan_pending_action(&farm(), &harvest).expect("plan").deltas[0].delta, 900);
        assert_eq!(plan_pending_action(&farm(), &spraying).expect("plan").deltas[0].delta, -40);
        let sowing = plan_pending_action(&farm(), &sowing_without_stock).expect("plan");
        assert!(sowing.deltas.is_empty());
    }

    #[test]
    fn rainfall_plan_only_writes_the_ledger() {
        let source = MessageId("msg-rain-1".to_string());
        let plan =
            plan_rainfall(&farm(), &SenderKey::new("+5491100000010"), &source, Decimal::new(125, 1));
        assert!(plan.deltas.is_empty());
        assert!(plan.tag_changes.is_empty());
        assert_eq!(plan.ledger.kind, LedgerEventKind::Rainfall);
        assert_eq!(plan.ledger.summary, "rainfall 12.5 mm");
        assert_eq!(plan.ledger.pending_action_id, None);
        assert_eq!(plan.ledger.source_message_id, Some(source));
    }
}
