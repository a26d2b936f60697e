use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use farmhand_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// Renders the effective configuration, one `key = value (source: ...)` line each.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let line = |key: &str, env_key: &str, value: &str| {
        render_line(
            key,
            value,
            field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref()),
        )
    };

    let api_token = match config.notifier.api_token.as_ref() {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        line("database.url", "FARMHAND_DATABASE_URL", &config.database.url),
        line(
            "database.max_connections",
            "FARMHAND_DATABASE_MAX_CONNECTIONS",
            &config.database.max_connections.to_string(),
        ),
        line(
            "database.timeout_secs",
            "FARMHAND_DATABASE_TIMEOUT_SECS",
            &config.database.timeout_secs.to_string(),
        ),
        line("server.bind_address", "FARMHAND_SERVER_BIND_ADDRESS", &config.server.bind_address),
        line("server.port", "FARMHAND_SERVER_PORT", &config.server.port.to_string()),
        line(
            "server.graceful_shutdown_secs",
            "FARMHAND_SERVER_GRACEFUL_SHUTDOWN_SECS",
            &config.server.graceful_shutdown_secs.to_string(),
        ),
        line("worker.enabled", "FARMHAND_WORKER_ENABLED", &config.worker.enabled.to_string()),
        line(
            "worker.interval_ms",
            "FARMHAND_WORKER_INTERVAL_MS",
            &config.worker.interval_ms.to_string(),
        ),
        line(
            "worker.batch_size",
            "FARMHAND_WORKER_BATCH_SIZE",
            &config.worker.batch_size.to_string(),
        ),
        line(
            "worker.max_concurrency",
            "FARMHAND_WORKER_MAX_CONCURRENCY",
            &config.worker.max_concurrency.to_string(),
        ),
        line(
            "worker.inflight_lease_secs",
            "FARMHAND_WORKER_INFLIGHT_LEASE_SECS",
            &config.worker.inflight_lease_secs.to_string(),
        ),
        line("notifier.kind", "FARMHAND_NOTIFIER_KIND", &format!("{:?}", config.notifier.kind)),
        line(
            "notifier.endpoint",
            "FARMHAND_NOTIFIER_ENDPOINT",
            config.notifier.endpoint.as_deref().unwrap_or("<unset>"),
        ),
        line("notifier.api_token", "FARMHAND_NOTIFIER_API_TOKEN", &api_token),
        line(
            "notifier.timeout_secs",
            "FARMHAND_NOTIFIER_TIMEOUT_SECS",
            &config.notifier.timeout_secs.to_string(),
        ),
        line("logging.level", "FARMHAND_LOGGING_LEVEL", &config.logging.level),
        line("logging.format", "FARMHAND_LOGGING_FORMAT", &format!("{:?}", config.logging.format)),
    ];

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("farmhand.toml"), PathBuf::from("config/farmhand.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters of long tokens so operators can tell them apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    match trimmed.chars().count() {
        0 => "<empty>".to_string(),
        len if len > 8 => format!("{}***", trimmed.chars().take(4).collect::<String>()),
        _ => "<redacted>".to_string(),
    }
}
