use std::sync::Arc;

use farmhand_agent::{notifier_from_config, ReminderBroadcaster};
use farmhand_core::domain::session::FarmId;
use farmhand_db::repositories::SqlSessionRepository;

use crate::commands::{load_config, open_database, runtime, CommandResult, StepError};

/// Broadcasts `body` to every onboarded user, optionally limited to one farm.
pub fn run(farm_id: Option<&str>, body: &str) -> CommandResult {
    if body.trim().is_empty() {
        return CommandResult::failure("remind", "invalid_input", "reminder text must not be blank", 2);
    }

    let config = match load_config("remind") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("remind") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let farm = farm_id.map(str::trim).filter(|farm| !farm.is_empty()).map(|farm| FarmId(farm.to_string()));
    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let notifier = notifier_from_config(&config.notifier)
            .map_err(|error| ("notifier", error.to_string(), 2u8))?;
        let broadcaster = ReminderBroadcaster::from_config(
            Arc::new(SqlSessionRepository::new(pool.clone())),
            notifier,
            &config.notifier,
        );
        let report = broadcaster
            .broadcast(farm.as_ref(), body.trim())
            .await
            .map_err(|error| ("persistence", error.to_string(), 7u8));
        pool.close().await;
        Ok::<_, StepError>(report?)
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "remind",
            format!("reminder sent to {} of {} recipient(s)", report.sent, report.recipients),
            report,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("remind", error_class, message, exit_code)
        }
    }
}
