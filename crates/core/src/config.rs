use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub batch_size: usize,
    /// Sender groups processed at once; 1 keeps the batch strictly sequential.
    pub max_concurrency: usize,
    pub inflight_lease_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    pub endpoint: Option<String>,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
    pub broadcast_batch_size: usize,
    pub broadcast_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    /// Replies are only written to the log.
    Log,
    Webhook,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub worker_enabled: Option<bool>,
    pub worker_batch_size: Option<usize>,
    pub notifier_kind: Option<NotifierKind>,
    pub notifier_endpoint: Option<String>,
    pub notifier_api_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://farmhand.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            worker: WorkerConfig {
                enabled: true,
                interval_ms: 1_000,
                batch_size: 10,
                max_concurrency: 1,
                inflight_lease_secs: 300,
            },
            notifier: NotifierConfig {
                kind: NotifierKind::Log,
                endpoint: None,
                api_token: None,
                timeout_secs: 10,
                broadcast_batch_size: 20,
                broadcast_delay_ms: 1_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for NotifierKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "webhook" => Ok(Self::Webhook),
            other => Err(ConfigError::Validation(format!(
                "unsupported notifier kind `{other}` (expected log|webhook)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("farmhand.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(worker) = patch.worker {
            if let Some(enabled) = worker.enabled {
                self.worker.enabled = enabled;
            }
            if let Some(interval_ms) = worker.interval_ms {
                self.worker.interval_ms = interval_ms;
            }
            if let Some(batch_size) = worker.batch_size {
                self.worker.batch_size = batch_size;
            }
            if let Some(max_concurrency) = worker.max_concurrency {
                self.worker.max_concurrency = max_concurrency;
            }
            if let Some(inflight_lease_secs) = worker.inflight_lease_secs {
                self.worker.inflight_lease_secs = inflight_lease_secs;
            }
        }

        if let Some(notifier) = patch.notifier {
            if let Some(kind) = notifier.kind {
                self.notifier.kind = kind;
            }
            if let Some(endpoint) = notifier.endpoint {
                self.notifier.endpoint = Some(endpoint);
            }
            if let Some(token) = notifier.api_token {
                self.notifier.api_token = Some(secret_value(token));
            }
            if let Some(timeout_secs) = notifier.timeout_secs {
                self.notifier.timeout_secs = timeout_secs;
            }
            if let Some(batch_size) = notifier.broadcast_batch_size {
                self.notifier.broadcast_batch_size = batch_size;
            }
            if let Some(delay_ms) = notifier.broadcast_delay_ms {
                self.notifier.broadcast_delay_ms = delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FARMHAND_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FARMHAND_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("FARMHAND_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FARMHAND_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("FARMHAND_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FARMHAND_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FARMHAND_SERVER_PORT") {
            self.server.port = parse_env("FARMHAND_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FARMHAND_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("FARMHAND_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FARMHAND_WORKER_ENABLED") {
            self.worker.enabled = parse_env("FARMHAND_WORKER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("FARMHAND_WORKER_INTERVAL_MS") {
            self.worker.interval_ms = parse_env("FARMHAND_WORKER_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("FARMHAND_WORKER_BATCH_SIZE") {
            self.worker.batch_size = parse_env("FARMHAND_WORKER_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("FARMHAND_WORKER_MAX_CONCURRENCY") {
            self.worker.max_concurrency = parse_env("FARMHAND_WORKER_MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = read_env("FARMHAND_WORKER_INFLIGHT_LEASE_SECS") {
            self.worker.inflight_lease_secs =
                parse_env("FARMHAND_WORKER_INFLIGHT_LEASE_SECS", &value)?;
        }

        if let Some(value) = read_env("FARMHAND_NOTIFIER_KIND") {
            self.notifier.kind = value.parse()?;
        }
        if let Some(value) = read_env("FARMHAND_NOTIFIER_ENDPOINT") {
            self.notifier.endpoint = Some(value);
        }
        if let Some(value) = read_env("FARMHAND_NOTIFIER_API_TOKEN") {
            self.notifier.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("FARMHAND_NOTIFIER_TIMEOUT_SECS") {
            self.notifier.timeout_secs = parse_env("FARMHAND_NOTIFIER_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("FARMHAND_LOGGING_LEVEL").or_else(|| read_env("FARMHAND_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FARMHAND_LOGGING_FORMAT").or_else(|| read_env("FARMHAND_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.worker_enabled {
            self.worker.enabled = enabled;
        }
        if let Some(batch_size) = overrides.worker_batch_size {
            self.worker.batch_size = batch_size;
        }
        if let Some(kind) = overrides.notifier_kind {
            self.notifier.kind = kind;
        }
        if let Some(endpoint) = overrides.notifier_endpoint {
            self.notifier.endpoint = Some(endpoint);
        }
        if let Some(token) = overrides.notifier_api_token {
            self.notifier.api_token = Some(secret_value(token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_worker(&self.worker)?;
        validate_notifier(&self.notifier)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("farmhand.toml"), PathBuf::from("config/farmhand.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_worker(worker: &WorkerConfig) -> Result<(), ConfigError> {
    if worker.interval_ms == 0 {
        return Err(ConfigError::Validation(
            "worker.interval_ms must be greater than zero".to_string(),
        ));
    }
    if worker.batch_size == 0 || worker.batch_size > 500 {
        return Err(ConfigError::Validation(
            "worker.batch_size must be in range 1..=500".to_string(),
        ));
    }
    if worker.max_concurrency == 0 {
        return Err(ConfigError::Validation(
            "worker.max_concurrency must be greater than zero".to_string(),
        ));
    }
    if worker.inflight_lease_secs == 0 {
        return Err(ConfigError::Validation(
            "worker.inflight_lease_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifier(notifier: &NotifierConfig) -> Result<(), ConfigError> {
    if notifier.timeout_secs == 0 || notifier.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "notifier.timeout_secs must be in range 1..=120".to_string(),
        ));
    }
    if notifier.broadcast_batch_size == 0 {
        return Err(ConfigError::Validation(
            "notifier.broadcast_batch_size must be greater than zero".to_string(),
        ));
    }

    if notifier.kind == NotifierKind::Webhook {
        let endpoint = notifier.endpoint.as_deref().map(str::trim).unwrap_or_default();
        if endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "notifier.endpoint is required when notifier.kind = webhook".to_string(),
            ));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notifier.endpoint must start with http:// or https://".to_string(),
            ));
        }
        let missing_token = notifier
            .api_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "notifier.api_token is required when notifier.kind = webhook".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    worker: Option<WorkerPatch>,
    notifier: Option<NotifierPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
    batch_size: Option<usize>,
    max_concurrency: Option<usize>,
    inflight_lease_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifierPatch {
    kind: Option<NotifierKind>,
    endpoint: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
    broadcast_batch_size: Option<usize>,
    broadcast_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, NotifierKind};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_use_log_notifier() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.notifier.kind == NotifierKind::Log, "default notifier should log")?;
        ensure(config.worker.batch_size == 10, "default batch size should be 10")?;
        ensure(config.worker.max_concurrency == 1, "default worker should be sequential")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FARMHAND_NOTIFIER_TOKEN", "token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("farmhand.toml");
            fs::write(
                &path,
                r#"
[notifier]
kind = "webhook"
endpoint = "https://messaging.example.com/send"
api_token = "${TEST_FARMHAND_NOTIFIER_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.notifier.kind == NotifierKind::Webhook, "kind should come from file")?;
            ensure(
                config
                    .notifier
                    .api_token
                    .as_ref()
                    .map(|token| token.expose_secret() == "token-from-env")
                    .unwrap_or(false),
                "api token should be interpolated from environment",
            )
        })();

        clear_vars(&["TEST_FARMHAND_NOTIFIER_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FARMHAND_LOG_LEVEL", "warn");
        env::set_var("FARMHAND_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["FARMHAND_LOG_LEVEL", "FARMHAND_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FARMHAND_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("FARMHAND_WORKER_BATCH_SIZE", "25");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("farmhand.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[worker]
batch_size = 5
interval_ms = 250

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.worker.batch_size == 25, "env batch size should win over file")?;
            ensure(config.worker.interval_ms == 250, "file interval should win over default")
        })();

        clear_vars(&["FARMHAND_DATABASE_URL", "FARMHAND_WORKER_BATCH_SIZE"]);
        result
    }

    #[test]
    fn webhook_notifier_without_endpoint_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FARMHAND_NOTIFIER_KIND", "webhook");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("notifier.endpoint")
            );
            ensure(has_message, "validation failure should mention notifier.endpoint")
        })();

        clear_vars(&["FARMHAND_NOTIFIER_KIND"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FARMHAND_WORKER_BATCH_SIZE", "ten");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "FARMHAND_WORKER_BATCH_SIZE"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["FARMHAND_WORKER_BATCH_SIZE"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FARMHAND_NOTIFIER_API_TOKEN", "super-secret-token");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-token"),
                "debug output should not contain the notifier token",
            )
        })();

        clear_vars(&["FARMHAND_NOTIFIER_API_TOKEN"]);
        result
    }
}
