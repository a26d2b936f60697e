use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use farmhand_core::errors::{ApplicationError, InterfaceError};
use farmhand_db::repositories::RepositoryError;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::Application;
use crate::{health, intake, metrics};

/// Error body returned by every route; never carries internal detail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(
            event_name = "http.request_failed",
            correlation_id = %self.0.correlation_id(),
            status = status.as_u16(),
            error = %self.0,
            "request failed"
        );
        let body = ErrorBody {
            error: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Unreadable rows are a 500; anything else from storage is reported as unavailable.
pub fn repository_failure(error: RepositoryError, correlation_id: impl Into<String>) -> ApiError {
    let application = match error {
        RepositoryError::Decode(detail) => ApplicationError::Internal(detail),
        other => ApplicationError::Persistence(other.to_string()),
    };
    ApiError(application.into_interface(correlation_id))
}

pub fn router(app: &Application) -> Router {
    Router::new()
        .merge(health::router(health::HealthState {
            db_pool: app.db_pool.clone(),
            queue: app.queue.clone(),
        }))
        .merge(intake::router(intake::IntakeState {
            queue: app.queue.clone(),
            audit: app.audit.clone(),
        }))
        .merge(metrics::router(metrics::MetricsState {
            metrics: app.metrics.clone(),
            queue: app.queue.clone(),
        }))
}

/// Serves `router` until `shutdown` is cancelled, then lets in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let address = listener.local_addr()?;
    info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "http endpoint started"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!(event_name = "system.http.stopped", correlation_id = "shutdown", "http endpoint stopped");
    Ok(())
}
