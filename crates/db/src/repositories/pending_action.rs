use sqlx::{sqlite::SqliteRow, Row};

use farmhand_core::domain::action::{ActionType, PendingAction, PendingActionId, StagedAction};
use farmhand_core::domain::message::SenderKey;

use super::decode::{parse_json, parse_timestamp, timestamp, to_json};
use super::{PendingActionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPendingActionRepository {
    pool: DbPool,
}

impl SqlPendingActionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PendingActionRepository for SqlPendingActionRepository {
    async fn stage(
        &self,
        pending: PendingAction,
    ) -> Result<Option<PendingAction>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let replaced = sqlx::query(
            "SELECT id, sender_key, action_type, action_json, created_at
             FROM pending_action
             WHERE sender_key = ?",
        )
        .bind(pending.sender_key.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(pending_from_row)
        .transpose()?;

        sqlx::query(
            "INSERT INTO pending_action (sender_key, id, action_type, action_json, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(sender_key) DO UPDATE SET
                id = excluded.id,
                action_type = excluded.action_type,
                action_json = excluded.action_json,
                created_at = excluded.created_at",
        )
        .bind(pending.sender_key.as_str())
        .bind(&pending.id.0)
        .bind(pending.action_type().as_str())
        .bind(to_json("action_json", &pending.action)?)
        .bind(timestamp(pending.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(replaced)
    }

    async fn peek(&self, sender_key: &SenderKey) -> Result<Option<PendingAction>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, sender_key, action_type, action_json, created_at
             FROM pending_action
             WHERE sender_key = ?",
        )
        .bind(sender_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(pending_from_row).transpose()
    }

    async fn clear(&self, sender_key: &SenderKey) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM pending_action WHERE sender_key = ?")
            .bind(sender_key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn pending_from_row(row: SqliteRow) -> Result<PendingAction, RepositoryError> {
    let action: StagedAction = parse_json("action_json", &row.try_get::<String, _>("action_json")?)?;
    let stored_type = row.try_get::<String, _>("action_type")?;
    if ActionType::parse(&stored_type) != Some(action.action_type()) {
        return Err(RepositoryError::Decode(format!(
            "pending action type `{stored_type}` does not match its payload `{}`",
            action.action_type()
        )));
    }

    Ok(PendingAction {
        id: PendingActionId(row.try_get("id")?),
        sender_key: SenderKey(row.try_get("sender_key")?),
        action,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use farmhand_core::domain::action::{
        AgronomicEvent, AgronomicKind, CategoryKey, LocationRef, MovementKind, PendingAction,
        StagedAction, StockMovement,
    };
    use farmhand_core::domain::message::SenderKey;

    use super::SqlPendingActionRepository;
    use crate::repositories::PendingActionRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn receive(quantity: i64) -> StagedAction {
        StagedAction::StockMovement(StockMovement {
            kind: MovementKind::Receive,
            location: LocationRef("silo-1".to_string()),
            category: CategoryKey("corn-kg".to_string()),
            quantity,
            note: None,
        })
    }

    #[tokio::test]
    async fn staging_twice_keeps_only_the_last_action() {
        let pool = setup_pool().await;
        let repo = SqlPendingActionRepository::new(pool.clone());
        let sender = SenderKey::new("+5491100000001");

        let first = PendingAction::new(sender.clone(), receive(100));
        let second = PendingAction::new(
            sender.clone(),
            StagedAction::AgronomicEvent(AgronomicEvent {
                kind: AgronomicKind::Sowing,
                plot: LocationRef("lot-2".to_string()),
                stock: None,
                note: None,
            }),
        );

        assert_eq!(repo.stage(first.clone()).await.expect("stage first"), None);
        let replaced = repo.stage(second.clone()).await.expect("stage second");
        assert_eq!(replaced.map(|pending| pending.id), Some(first.id));

        let current = repo.peek(&sender).await.expect("peek").expect("pending");
        assert_eq!(current.id, second.id);
        assert_eq!(current.action, second.action);

        pool.close().await;
    }

    #[tokio::test]
    async fn clear_reports_whether_something_was_pending() {
        let pool = setup_pool().await;
        let repo = SqlPendingActionRepository::new(pool.clone());
        let sender = SenderKey::new("+5491100000002");

        assert!(!repo.clear(&sender).await.expect("clear empty"));
        repo.stage(PendingAction::new(sender.clone(), receive(5))).await.expect("stage");
        assert!(repo.clear(&sender).await.expect("clear"));
        assert_eq!(repo.peek(&sender).await.expect("peek"), None);

        pool.close().await;
    }
}
