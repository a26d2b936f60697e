use std::time::Duration;

use farmhand_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// In-memory databases live per connection, so they are pinned to a single one.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let max_connections = if is_memory_url(database_url) { 1 } else { max_connections.max(1) };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&normalize_url(database_url))
        .await
}

fn is_memory_url(database_url: &str) -> bool {
    database_url == ":memory:" || database_url.starts_with("sqlite::memory:")
}

/// Adds `mode=rwc` to file URLs so a fresh deployment creates its database file.
fn normalize_url(database_url: &str) -> String {
    if database_url == ":memory:" {
        return "sqlite::memory:".to_string();
    }
    if is_memory_url(database_url) || database_url.contains("mode=") {
        return database_url.to_string();
    }
    if database_url.starts_with("sqlite://") {
        let separator = if database_url.contains('?') { '&' } else { '?' };
        return format!("{database_url}{separator}mode=rwc");
    }
    database_url.to_string()
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, normalize_url};

    #[test]
    fn file_urls_are_opened_in_create_mode() {
        assert_eq!(normalize_url("sqlite://farmhand.db"), "sqlite://farmhand.db?mode=rwc");
        assert_eq!(
            normalize_url("sqlite://farmhand.db?cache=shared"),
            "sqlite://farmhand.db?cache=shared&mode=rwc"
        );
        assert_eq!(normalize_url(":memory:"), "sqlite::memory:");
        assert_eq!(normalize_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn memory_pool_is_pinned_to_one_connection() {
        let pool = connect_with_settings("sqlite::memory:", 8, 5).await.expect("connect");
        assert_eq!(pool.options().get_max_connections(), 1);
        pool.close().await;
    }
}
