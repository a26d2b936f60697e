use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use farmhand_core::domain::action::{CategoryKey, LocationRef, PendingActionId, TagNumber};
use farmhand_core::domain::inventory::{
    InventoryPosition, LedgerDraft, LedgerEvent, LedgerEventId, LedgerEventKind, LivestockTag,
    MutationPlan, PositionDelta, TagChange, TagState,
};
use farmhand_core::domain::message::{MessageId, SenderKey};
use farmhand_core::domain::session::FarmId;
use farmhand_core::errors::ValidationError;

use super::decode::{parse_json, parse_timestamp, timestamp, to_json};
use super::{ApplyError, ApplyOutcome, InventoryStore, RepositoryError};
use crate::DbPool;

const LEDGER_COLUMNS: &str = "id, farm_id, sender_key, pending_action_id, source_message_id, \
                              kind, summary, payload_json, content_hash, occurred_at";

pub struct SqlInventoryStore {
    pool: DbPool,
}

impl SqlInventoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Event already written for the draft's idempotency key, if it has one.
async fn applied_event_id(
    conn: &mut SqliteConnection,
    draft: &LedgerDraft,
) -> Result<Option<LedgerEventId>, RepositoryError> {
    let query = if let Some(pending_action_id) = &draft.pending_action_id {
        sqlx::query("SELECT id FROM ledger_event WHERE pending_action_id = ?")
            .bind(pending_action_id.0.as_str())
    } else if let Some(source_message_id) = &draft.source_message_id {
        sqlx::query("SELECT id FROM ledger_event WHERE source_message_id = ?")
            .bind(source_message_id.0.as_str())
    } else {
        return Ok(None);
    };

    let id = query
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.try_get::<String, _>("id"))
        .transpose()?;
    Ok(id.map(LedgerEventId))
}

async fn current_quantity(
    conn: &mut SqliteConnection,
    farm_id: &FarmId,
    location: &LocationRef,
    category: &CategoryKey,
) -> Result<i64, RepositoryError> {
    let quantity = sqlx::query(
        "SELECT quantity FROM inventory_position
         WHERE farm_id = ? AND location = ? AND category = ?",
    )
    .bind(&farm_id.0)
    .bind(&location.0)
    .bind(&category.0)
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| row.try_get::<i64, _>("quantity"))
    .transpose()?;
    Ok(quantity.unwrap_or(0))
}

async fn apply_delta(
    conn: &mut SqliteConnection,
    farm_id: &FarmId,
    delta: &PositionDelta,
    at: &str,
) -> Result<(), ApplyError> {
    if !delta.is_decrement() {
        sqlx::query(
            "INSERT INTO inventory_position (farm_id, location, category, quantity, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(farm_id, location, category) DO UPDATE SET
                quantity = quantity + excluded.quantity,
                updated_at = excluded.updated_at",
        )
        .bind(&farm_id.0)
        .bind(&delta.location.0)
        .bind(&delta.category.0)
        .bind(delta.delta)
        .bind(at)
        .execute(&mut *conn)
        .await?;
        return Ok(());
    }

    let requested = -delta.delta;
    let updated = sqlx::query(
        "UPDATE inventory_position
         SET quantity = quantity - ?, updated_at = ?
         WHERE farm_id = ? AND location = ? AND category = ? AND quantity >= ?",
    )
    .bind(requested)
    .bind(at)
    .bind(&farm_id.0)
    .bind(&delta.location.0)
    .bind(&delta.category.0)
    .bind(requested)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        let available = current_quantity(conn, farm_id, &delta.location, &delta.category).await?;
        return Err(ValidationError::InsufficientStock {
            location: delta.location.clone(),
            category: delta.category.clone(),
            requested,
            available,
        }
        .into());
    }
    Ok(())
}

async fn find_tag(
    conn: &mut SqliteConnection,
    farm_id: &FarmId,
    tag: &TagNumber,
) -> Result<Option<LivestockTag>, RepositoryError> {
    let row = sqlx::query(
        "SELECT farm_id, tag, category, location, state, updated_at
         FROM livestock_tag
         WHERE farm_id = ? AND tag = ?",
    )
    .bind(&farm_id.0)
    .bind(&tag.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(tag_from_row).transpose()
}

async fn apply_tag_change(
    conn: &mut SqliteConnection,
    farm_id: &FarmId,
    change: &TagChange,
    at: &str,
) -> Result<(), ApplyError> {
    match change {
        TagChange::Register { tag, category, location } => {
            if let Some(existing) = find_tag(conn, farm_id, tag).await? {
                if !existing.state.allows_reregistration() {
                    return Err(ValidationError::TagAlreadyRegistered {
                        tag: tag.clone(),
                        state: existing.state,
                    }
                    .into());
                }
            }

            sqlx::query(
                "INSERT INTO livestock_tag (farm_id, tag, category, location, state, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(farm_id, tag) DO UPDATE SET
                    category = excluded.category,
                    location = excluded.location,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
            )
            .bind(&farm_id.0)
            .bind(&tag.0)
            .bind(&category.0)
            .bind(&location.0)
            .bind(TagState::Registered.as_str())
            .bind(at)
            .execute(&mut *conn)
            .await?;
        }
        TagChange::Transition { tag, category, from_location, to_location, to_state } => {
            let updated = sqlx::query(
                "UPDATE livestock_tag
                 SET state = ?, location = ?, updated_at = ?
                 WHERE farm_id = ? AND tag = ? AND state = ? AND location = ? AND category = ?",
            )
            .bind(to_state.as_str())
            .bind(&to_location.0)
            .bind(at)
            .bind(&farm_id.0)
            .bind(&tag.0)
            .bind(TagState::Registered.as_str())
            .bind(&from_location.0)
            .bind(&category.0)
            .execute(&mut *conn)
            .await?;

            if updated.rows_affected() == 0 {
                let error = match find_tag(conn, farm_id, tag).await? {
                    None => ValidationError::UnknownTag { tag: tag.clone() },
                    Some(existing) => ValidationError::TagUnavailable {
                        tag: tag.clone(),
                        state: existing.state,
                        location: existing.location,
                    },
                };
                return Err(error.into());
            }
        }
    }
    Ok(())
}

async fn insert_ledger_event(
    conn: &mut SqliteConnection,
    event: &LedgerEvent,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO ledger_event (
            id, farm_id, sender_key, pending_action_id, source_message_id, kind, summary,
            payload_json, content_hash, occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.id.0)
    .bind(&event.farm_id.0)
    .bind(event.sender_key.as_str())
    .bind(event.pending_action_id.as_ref().map(|id| id.0.as_str()))
    .bind(event.source_message_id.as_ref().map(|id| id.0.as_str()))
    .bind(event.kind.as_str())
    .bind(&event.summary)
    .bind(to_json("payload_json", &event.payload)?)
    .bind(&event.content_hash)
    .bind(timestamp(event.occurred_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| {
        RepositoryError::from_write(error, || {
            format!(
                "ledger already holds an event for pending action {:?} or message {:?}",
                event.pending_action_id, event.source_message_id
            )
        })
    })?;
    Ok(())
}

#[async_trait::async_trait]
impl InventoryStore for SqlInventoryStore {
    async fn apply(&self, plan: &MutationPlan) -> Result<ApplyOutcome, ApplyError> {
        // Take the write lock up front: concurrent confirms queue on busy_timeout and each
        // sees the quantity the previous one committed.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        if let Some(existing) = applied_event_id(&mut tx, &plan.ledger).await? {
            return Ok(ApplyOutcome::AlreadyApplied(existing));
        }

        // Stored timestamps keep microseconds; the returned event must match what is read back.
        let now: DateTime<Utc> = Utc::now().trunc_subsecs(6);
        let at = timestamp(now);

        // Tag guards run first so a bad tag reports as such rather than as a stock shortfall.
        for change in &plan.tag_changes {
            apply_tag_change(&mut tx, &plan.farm_id, change, &at).await?;
        }
        for delta in &plan.deltas {
            apply_delta(&mut tx, &plan.farm_id, delta, &at).await?;
        }

        let event = plan.ledger.clone().seal(plan.farm_id.clone(), now);
        match insert_ledger_event(&mut tx, &event).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                drop(tx);
                let mut conn = self.pool.acquire().await?;
                if let Some(existing) = applied_event_id(&mut conn, &plan.ledger).await? {
                    return Ok(ApplyOutcome::AlreadyApplied(existing));
                }
                return Err(RepositoryError::Conflict(format!(
                    "ledger event {} collided with an existing row",
                    event.id.0
                ))
                .into());
            }
            Err(error) => return Err(error.into()),
        }

        tx.commit().await?;
        tracing::debug!(
            event_id = %event.id.0,
            farm_id = %plan.farm_id.0,
            kind = event.kind.as_str(),
            deltas = plan.deltas.len(),
            tag_changes = plan.tag_changes.len(),
            "inventory plan applied"
        );
        Ok(ApplyOutcome::Applied(event))
    }

    async fn quantity(
        &self,
        farm_id: &FarmId,
        location: &LocationRef,
        category: &CategoryKey,
    ) -> Result<i64, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        current_quantity(&mut conn, farm_id, location, category).await
    }

    async fn positions(
        &self,
        farm_id: &FarmId,
        location: Option<&LocationRef>,
    ) -> Result<Vec<InventoryPosition>, RepositoryError> {
        let rows = match location {
            Some(location) => {
                sqlx::query(
                    "SELECT farm_id, location, category, quantity FROM inventory_position
                     WHERE farm_id = ? AND location = ? AND quantity > 0
                     ORDER BY location ASC, category ASC",
                )
                .bind(&farm_id.0)
                .bind(&location.0)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT farm_id, location, category, quantity FROM inventory_position
                     WHERE farm_id = ? AND quantity > 0
                     ORDER BY location ASC, category ASC",
                )
                .bind(&farm_id.0)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|row| {
                Ok(InventoryPosition {
                    farm_id: FarmId(row.try_get("farm_id")?),
                    location: LocationRef(row.try_get("location")?),
                    category: CategoryKey(row.try_get("category")?),
                    quantity: row.try_get("quantity")?,
                })
            })
            .collect()
    }

    async fn tag(
        &self,
        farm_id: &FarmId,
        tag: &TagNumber,
    ) -> Result<Option<LivestockTag>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_tag(&mut conn, farm_id, tag).await
    }

    async fn ledger(&self, farm_id: &FarmId) -> Result<Vec<LedgerEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_event
             WHERE farm_id = ?
             ORDER BY occurred_at ASC, id ASC"
        ))
        .bind(&farm_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ledger_from_row).collect()
    }
}

fn tag_from_row(row: SqliteRow) -> Result<LivestockTag, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = TagState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown tag state `{state_raw}`")))?;

    Ok(LivestockTag {
        farm_id: FarmId(row.try_get("farm_id")?),
        tag: TagNumber(row.try_get("tag")?),
        category: CategoryKey(row.try_get("category")?),
        location: LocationRef(row.try_get("location")?),
        state,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn ledger_from_row(row: SqliteRow) -> Result<LedgerEvent, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = LedgerEventKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown ledger kind `{kind_raw}`")))?;

    Ok(LedgerEvent {
        id: LedgerEventId(row.try_get("id")?),
        farm_id: FarmId(row.try_get("farm_id")?),
        sender_key: SenderKey(row.try_get("sender_key")?),
        pending_action_id: row
            .try_get::<Option<String>, _>("pending_action_id")?
            .map(PendingActionId),
        source_message_id: row.try_get::<Option<String>, _>("source_message_id")?.map(MessageId),
        kind,
        summary: row.try_get("summary")?,
        payload: parse_json("payload_json", &row.try_get::<String, _>("payload_json")?)?,
        content_hash: row.try_get("content_hash")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
