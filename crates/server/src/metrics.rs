use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use farmhand_core::domain::message::QueueDepth;
use farmhand_core::domain::metrics::DailyMetrics;
use farmhand_db::repositories::{MessageQueue, MetricsSink, RepositoryError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::{repository_failure, ApiError};

#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<dyn MetricsSink>,
    pub queue: Arc<dyn MessageQueue>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MetricsQuery {
    /// `YYYY-MM-DD`; defaults to today (UTC).
    pub day: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub daily: DailyMetrics,
    pub average_processing_ms: Option<u64>,
    pub queue: QueueDepth,
    pub last_message_at: Option<String>,
}

pub fn router(state: MetricsState) -> Router {
    Router::new().route("/metrics", get(metrics)).with_state(state)
}

pub async fn metrics(
    State(state): State<MetricsState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let day = query.day.unwrap_or_else(|| Utc::now().date_naive());
    let unavailable = |error: RepositoryError| repository_failure(error, Uuid::new_v4().to_string());

    let daily = state.metrics.daily(day).await.map_err(unavailable)?;
    let queue = state.queue.depth().await.map_err(unavailable)?;
    let last_message_at = state.metrics.last_message_at().await.map_err(unavailable)?;

    Ok(Json(MetricsResponse {
        average_processing_ms: daily.average_processing_ms(),
        daily,
        queue,
        last_message_at: last_message_at.map(|at| at.to_rfc3339()),
    }))
}
