use std::sync::Arc;
use std::time::Instant;

use farmhand_agent::{ConversationRuntime, QueueWorker, RecordingNotifier, WorkerSettings};
use farmhand_core::config::{AppConfig, LoadOptions, NotifierKind};
use farmhand_core::domain::message::{MessagePayload, QueuedMessage, SenderKey};
use farmhand_db::fixtures::{DemoFarmSeed, DEMO_OWNER_KEY};
use farmhand_db::repositories::{
    InMemoryMessageQueue, MessageQueue, SqlInventoryStore, SqlPendingActionRepository,
    SqlSessionRepository,
};
use farmhand_db::{connect_with_settings, migrations, DbPool};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const AFTER_CONFIG: [&str; 5] =
    ["notifier_sanity", "db_connectivity", "migration_visibility", "seed_fixture", "conversation_roundtrip"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(pass("config_validation", elapsed_ms, "configuration loaded and validated"));
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(fail("config_validation", elapsed_ms, error.to_string()));
            checks.extend(AFTER_CONFIG.iter().copied().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    checks.push(notifier_check(&config));

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(fail("db_connectivity", 0, format!("failed to initialize async runtime: {error}")));
            checks.extend(AFTER_CONFIG[2..].iter().copied().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )) {
        Ok(pool) => {
            checks.push(pass(
                "db_connectivity",
                elapsed_since(db_started),
                format!("connected using `{}`", config.database.url),
            ));
            pool
        }
        Err(error) => {
            checks.push(fail("db_connectivity", elapsed_since(db_started), format!("failed to connect: {error}")));
            checks.extend(AFTER_CONFIG[2..].iter().copied().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let migration_started = Instant::now();
    match runtime.block_on(migrations::run_pending(&pool)) {
        Ok(()) => checks.push(pass(
            "migration_visibility",
            elapsed_since(migration_started),
            "migrations are visible and executable",
        )),
        Err(error) => {
            checks.push(fail(
                "migration_visibility",
                elapsed_since(migration_started),
                format!("migration execution failed: {error}"),
            ));
            checks.extend(AFTER_CONFIG[3..].iter().copied().map(skipped));
            runtime.block_on(pool.close());
            return finalize_report(checks, elapsed_since(started));
        }
    }

    let seed_started = Instant::now();
    let seed_result = runtime.block_on(async {
        DemoFarmSeed::load(&pool).await?;
        DemoFarmSeed::verify(&pool).await
    });
    let seeded = match seed_result {
        Ok(verification) if verification.all_present => {
            checks.push(pass("seed_fixture", elapsed_since(seed_started), "demo farm loads and verifies"));
            true
        }
        Ok(verification) => {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            checks.push(fail("seed_fixture", elapsed_since(seed_started), format!("failed checks: {failed}")));
            false
        }
        Err(error) => {
            checks.push(fail("seed_fixture", elapsed_since(seed_started), error.to_string()));
            false
        }
    };

    if seeded {
        let roundtrip_started = Instant::now();
        let outcome = runtime.block_on(conversation_roundtrip(&pool, &config));
        checks.push(match outcome {
            Ok(reply) => pass(
                "conversation_roundtrip",
                elapsed_since(roundtrip_started),
                format!("status reply delivered: {reply}"),
            ),
            Err(message) => fail("conversation_roundtrip", elapsed_since(roundtrip_started), message),
        });
    } else {
        checks.push(skipped("conversation_roundtrip"));
    }

    runtime.block_on(async {
        // Best effort; a failed clean leaves only demo-farm rows behind.
        let _ = DemoFarmSeed::clean(&pool).await;
        pool.close().await;
    });

    finalize_report(checks, elapsed_since(started))
}

/// Sends "status" from the demo owner through a private queue and the SQL-backed
/// conversation runtime, capturing the reply instead of delivering it.
async fn conversation_roundtrip(pool: &DbPool, config: &AppConfig) -> Result<String, String> {
    let notifier = RecordingNotifier::default();
    let queue = Arc::new(InMemoryMessageQueue::default());
    let runtime = ConversationRuntime::new(
        Arc::new(SqlSessionRepository::new(pool.clone())),
        Arc::new(SqlPendingActionRepository::new(pool.clone())),
        Arc::new(SqlInventoryStore::new(pool.clone())),
        Arc::new(notifier.clone()),
    );
    let worker = QueueWorker::new(
        queue.clone(),
        queue.metrics(),
        Arc::new(runtime),
        Arc::new(notifier.clone()),
        WorkerSettings::from(&config.worker),
    );

    let owner = SenderKey::new(DEMO_OWNER_KEY);
    queue
        .push(QueuedMessage::new(owner.clone(), MessagePayload::text("status")))
        .await
        .map_err(|error| error.to_string())?;
    let report = worker.run_batch().await.map_err(|error| error.to_string())?;
    if report.acked != 1 {
        return Err(format!("expected one acknowledged message, batch report: {report:?}"));
    }
    notifier.last_body(&owner).ok_or_else(|| "no reply was produced".to_string())
}

fn notifier_check(config: &AppConfig) -> SmokeCheck {
    let started = Instant::now();
    let message = match config.notifier.kind {
        NotifierKind::Log => "log notifier: replies are written to the log only".to_string(),
        NotifierKind::Webhook => format!(
            "webhook notifier targeting `{}`",
            config.notifier.endpoint.as_deref().unwrap_or("<unset>")
        ),
    };
    pass("notifier_sanity", elapsed_since(started), message)
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn pass(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Pass, elapsed_ms, message: message.into() }
}

fn fail(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Fail, elapsed_ms, message: message.into() }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
