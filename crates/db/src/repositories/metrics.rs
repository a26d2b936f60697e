use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqliteConnection};

use farmhand_core::domain::metrics::{day_key, day_key_for, DailyMetrics};

use super::decode::{parse_optional_timestamp, parse_u64, timestamp};
use super::{MetricsSink, RepositoryError};
use crate::DbPool;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Counter {
    Errors,
    Retried,
}

pub struct SqlMetricsSink {
    pool: DbPool,
}

impl SqlMetricsSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Increments one counter of the day's row. Shared with the queue so a drop and its
/// error count commit together.
pub(crate) async fn bump_counter(
    conn: &mut SqliteConnection,
    at: DateTime<Utc>,
    counter: Counter,
) -> Result<(), RepositoryError> {
    let statement = match counter {
        Counter::Errors => {
            "INSERT INTO metric_counter (day_key, errors) VALUES (?, 1)
             ON CONFLICT(day_key) DO UPDATE SET errors = errors + 1"
        }
        Counter::Retried => {
            "INSERT INTO metric_counter (day_key, retried) VALUES (?, 1)
             ON CONFLICT(day_key) DO UPDATE SET retried = retried + 1"
        }
    };
    sqlx::query(statement).bind(day_key_for(at)).execute(&mut *conn).await?;
    Ok(())
}

#[async_trait::async_trait]
impl MetricsSink for SqlMetricsSink {
    async fn record_processed(
        &self,
        at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Result<(), RepositoryError> {
        let elapsed = i64::try_from(elapsed_ms).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO metric_counter (day_key, processed, total_processing_time_ms)
             VALUES (?, 1, ?)
             ON CONFLICT(day_key) DO UPDATE SET
                processed = processed + 1,
                total_processing_time_ms = total_processing_time_ms + excluded.total_processing_time_ms",
        )
        .bind(day_key_for(at))
        .bind(elapsed)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO metric_activity (id, last_message_at) VALUES (1, ?)
             ON CONFLICT(id) DO UPDATE SET last_message_at = MAX(last_message_at, excluded.last_message_at)",
        )
        .bind(timestamp(at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_retry(&self, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        bump_counter(&mut conn, at, Counter::Retried).await
    }

    async fn record_error(&self, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        bump_counter(&mut conn, at, Counter::Errors).await
    }

    async fn daily(&self, day: NaiveDate) -> Result<DailyMetrics, RepositoryError> {
        let key = day_key(day);
        let row = sqlx::query(
            "SELECT processed, errors, retried, total_processing_time_ms
             FROM metric_counter
             WHERE day_key = ?",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(DailyMetrics::empty(day));
        };

        Ok(DailyMetrics {
            day_key: key,
            processed: parse_u64("processed", row.try_get("processed")?)?,
            errors: parse_u64("errors", row.try_get("errors")?)?,
            retried: parse_u64("retried", row.try_get("retried")?)?,
            total_processing_time_ms: parse_u64(
                "total_processing_time_ms",
                row.try_get("total_processing_time_ms")?,
            )?,
        })
    }

    async fn last_message_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let value = sqlx::query("SELECT last_message_at FROM metric_activity WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get::<String, _>("last_message_at"))
            .transpose()?;
        parse_optional_timestamp("last_message_at", value)
    }
}
