use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use farmhand_core::domain::message::{
    MessageId, MessageKind, MessagePayload, NackOutcome, QueueDepth, QueuedMessage, SenderKey,
    MAX_DELIVERY_ATTEMPTS,
};

use super::decode::{parse_json, parse_timestamp, parse_u32, parse_u64, timestamp, to_json};
use super::metrics::{bump_counter, Counter};
use super::{MessageQueue, ReclaimedMessage, RepositoryError};
use crate::DbPool;

const LANE_PENDING: &str = "pending";
const LANE_INFLIGHT: &str = "inflight";

pub struct SqlMessageQueue {
    pool: DbPool,
    max_attempts: u32,
}

impl SqlMessageQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, max_attempts: MAX_DELIVERY_ATTEMPTS }
    }
}

async fn insert_pending(
    conn: &mut SqliteConnection,
    message: &QueuedMessage,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO queue_message (id, sender_key, kind, payload_json, lane, attempts, enqueued_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id.0)
    .bind(message.sender_key.as_str())
    .bind(message.kind.as_str())
    .bind(to_json("payload_json", &message.payload)?)
    .bind(LANE_PENDING)
    .bind(i64::from(message.attempts))
    .bind(timestamp(message.enqueued_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| {
        RepositoryError::from_write(error, || format!("message {} is already queued", message.id))
    })?;
    Ok(())
}

/// Deletes the in-flight row, then re-inserts it at the pending tail or counts the drop.
async fn fail_inflight(
    conn: &mut SqliteConnection,
    mut message: QueuedMessage,
    max_attempts: u32,
    at: DateTime<Utc>,
) -> Result<NackOutcome, RepositoryError> {
    sqlx::query("DELETE FROM queue_message WHERE id = ? AND lane = ?")
        .bind(&message.id.0)
        .bind(LANE_INFLIGHT)
        .execute(&mut *conn)
        .await?;

    let outcome = NackOutcome::after_failure(message.attempts, max_attempts);
    match outcome {
        NackOutcome::Requeued { attempts } => {
            message.attempts = attempts;
            insert_pending(conn, &message).await?;
        }
        NackOutcome::Dropped { .. } => bump_counter(conn, at, Counter::Errors).await?,
    }
    Ok(outcome)
}

#[async_trait::async_trait]
impl MessageQueue for SqlMessageQueue {
    async fn push(&self, message: QueuedMessage) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_pending(&mut conn, &message).await
    }

    async fn pop_to_inflight(&self) -> Result<Option<QueuedMessage>, RepositoryError> {
        let row = sqlx::query(
            "UPDATE queue_message
             SET lane = ?, claimed_at = ?
             WHERE seq = (
                SELECT seq FROM queue_message WHERE lane = ? ORDER BY seq ASC LIMIT 1
             )
             RETURNING id, sender_key, kind, payload_json, attempts, enqueued_at",
        )
        .bind(LANE_INFLIGHT)
        .bind(timestamp(Utc::now()))
        .bind(LANE_PENDING)
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }

    async fn ack(&self, id: &MessageId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM queue_message WHERE id = ? AND lane = ?")
            .bind(&id.0)
            .bind(LANE_INFLIGHT)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, id: &MessageId) -> Result<NackOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT id, sender_key, kind, payload_json, attempts, enqueued_at
             FROM queue_message
             WHERE id = ? AND lane = ?",
        )
        .bind(&id.0)
        .bind(LANE_INFLIGHT)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("in-flight message {id}")))?;

        let message = message_from_row(row)?;
        let outcome = fail_inflight(&mut tx, message, self.max_attempts, Utc::now()).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn reclaim_stale(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<ReclaimedMessage>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT id, sender_key, kind, payload_json, attempts, enqueued_at
             FROM queue_message
             WHERE lane = ? AND claimed_at < ?
             ORDER BY seq ASC",
        )
        .bind(LANE_INFLIGHT)
        .bind(timestamp(claimed_before))
        .fetch_all(&mut *tx)
        .await?;

        let now = Utc::now();
        let mut reclaimed = Vec::with_capacity(rows.len());
        for row in rows {
            let message = message_from_row(row)?;
            let outcome = fail_inflight(&mut tx, message.clone(), self.max_attempts, now).await?;
            reclaimed.push(ReclaimedMessage { message, outcome });
        }
        tx.commit().await?;
        Ok(reclaimed)
    }

    async fn depth(&self) -> Result<QueueDepth, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN lane = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN lane = 'inflight' THEN 1 ELSE 0 END), 0) AS inflight
             FROM queue_message",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueDepth {
            pending: parse_u64("pending", row.try_get("pending")?)?,
            inflight: parse_u64("inflight", row.try_get("inflight")?)?,
        })
    }
}

fn message_from_row(row: SqliteRow) -> Result<QueuedMessage, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = MessageKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message kind `{kind_raw}`")))?;
    let payload: MessagePayload =
        parse_json("payload_json", &row.try_get::<String, _>("payload_json")?)?;

    Ok(QueuedMessage {
        id: MessageId(row.try_get("id")?),
        sender_key: SenderKey(row.try_get("sender_key")?),
        payload,
        kind,
        enqueued_at: parse_timestamp("enqueued_at", row.try_get("enqueued_at")?)?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use farmhand_core::domain::message::{
        MessagePayload, NackOutcome, QueueDepth, QueuedMessage, SenderKey,
    };

    use super::SqlMessageQueue;
    use crate::repositories::{MessageQueue, MetricsSink, RepositoryError, SqlMetricsSink};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn text(sender: &str, body: &str) -> QueuedMessage {
        QueuedMessage::new(SenderKey::new(sender), MessagePayload::text(body))
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let pool = setup_pool().await;
        let queue = SqlMessageQueue::new(pool.clone());
        let first = text("+5491100000001", "one");
        let second = text("+5491100000002", "two");
        let third = text("+5491100000001", "three");

        for message in [&first, &second, &third] {
            queue.push(message.clone()).await.expect("push");
        }

        let mut popped = Vec::new();
        while let Some(message) = queue.pop_to_inflight().await.expect("pop") {
            popped.push(message.id.clone());
        }
        assert_eq!(popped, vec![first.id, second.id, third.id]);
        assert_eq!(queue.depth().await.expect("depth"), QueueDepth { pending: 0, inflight: 3 });

        pool.close().await;
    }

    #[tokio::test]
    async fn popped_message_keeps_payload_and_ack_removes_it() {
        let pool = setup_pool().await;
        let queue = SqlMessageQueue::new(pool.clone());
        let message = QueuedMessage::new(
            SenderKey::new("+5491100000001"),
            MessagePayload::choice("confirm:stock_movement"),
        );
        queue.push(message.clone()).await.expect("push");

        let popped = queue.pop_to_inflight().await.expect("pop").expect("message");
        assert_eq!(popped.payload, message.payload);
        assert_eq!(popped.attempts, 0);

        queue.ack(&popped.id).await.expect("ack");
        assert_eq!(queue.depth().await.expect("depth"), QueueDepth::default());
        pool.close().await;
    }

    #[tokio::test]
    async fn nack_requeues_at_tail_until_the_cap_then_counts_one_error() {
        let pool = setup_pool().await;
        let queue = SqlMessageQueue::new(pool.clone());
        let metrics = SqlMetricsSink::new(pool.clone());
        let failing = text("+5491100000001", "boom");
        let other = text("+5491100000002", "fine");
        queue.push(failing.clone()).await.expect("push");
        queue.push(other.clone()).await.expect("push");

        let popped = queue.pop_to_inflight().await.expect("pop").expect("message");
        assert_eq!(popped.id, failing.id);
        assert_eq!(
            queue.nack(&popped.id).await.expect("nack"),
            NackOutcome::Requeued { attempts: 1 }
        );

        let next = queue.pop_to_inflight().await.expect("pop").expect("message");
        assert_eq!(next.id, other.id, "requeued message goes to the tail");
        queue.ack(&next.id).await.expect("ack");

        let retry = queue.pop_to_inflight().await.expect("pop").expect("message");
        assert_eq!(retry.attempts, 1);
        assert_eq!(
            queue.nack(&retry.id).await.expect("nack"),
            NackOutcome::Requeued { attempts: 2 }
        );

        let last = queue.pop_to_inflight().await.expect("pop").expect("message");
        assert_eq!(
            queue.nack(&last.id).await.expect("nack"),
            NackOutcome::Dropped { attempts: 3 }
        );

        assert_eq!(queue.depth().await.expect("depth"), QueueDepth::default());
        let today = metrics.daily(Utc::now().date_naive()).await.expect("daily");
        assert_eq!(today.errors, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn nack_of_unknown_message_is_not_found() {
        let pool = setup_pool().await;
        let queue = SqlMessageQueue::new(pool.clone());
        let message = text("+5491100000001", "never pushed");

        assert!(matches!(queue.nack(&message.id).await, Err(RepositoryError::NotFound(_))));
        pool.close().await;
    }

    #[tokio::test]
    async fn stale_inflight_messages_are_reclaimed() {
        let pool = setup_pool().await;
        let queue = SqlMessageQueue::new(pool.clone());
        let message = text("+5491100000001", "stuck");
        queue.push(message.clone()).await.expect("push");
        queue.pop_to_inflight().await.expect("pop").expect("message");

        let fresh = queue.reclaim_stale(Utc::now() - Duration::minutes(5)).await.expect("reclaim");
        assert!(fresh.is_empty(), "recent claims are left alone");

        let reclaimed =
            queue.reclaim_stale(Utc::now() + Duration::seconds(1)).await.expect("reclaim");
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].message.id, message.id);
        assert_eq!(reclaimed[0].outcome, NackOutcome::Requeued { attempts: 1 });
        assert_eq!(queue.depth().await.expect("depth"), QueueDepth { pending: 1, inflight: 0 });

        pool.close().await;
    }
}
