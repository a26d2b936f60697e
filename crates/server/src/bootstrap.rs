use std::sync::Arc;

use farmhand_agent::{NotifyError, QueueWorker};
use farmhand_core::audit::{AuditSink, TracingAuditSink};
use farmhand_core::config::{AppConfig, ConfigError};
use farmhand_db::repositories::{MessageQueue, MetricsSink, SqlMessageQueue, SqlMetricsSink};
use farmhand_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub queue: Arc<dyn MessageQueue>,
    pub metrics: Arc<dyn MetricsSink>,
    pub audit: Arc<dyn AuditSink>,
    pub worker: QueueWorker,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Notifier(#[from] NotifyError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        notifier_kind = ?config.notifier.kind,
        worker_enabled = config.worker.enabled,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let worker = QueueWorker::sql_backed(&db_pool, &config)?;

    Ok(Application {
        queue: Arc::new(SqlMessageQueue::new(db_pool.clone())),
        metrics: Arc::new(SqlMetricsSink::new(db_pool.clone())),
        audit: Arc::new(TracingAuditSink),
        worker,
        config,
        db_pool,
    })
}
