use farmhand_agent::QueueWorker;

use crate::commands::{load_config, open_database, runtime, CommandResult, StepError};

/// Runs worker batches against the configured database until the queue is idle or
/// `max_batches` is reached.
pub fn run(max_batches: usize) -> CommandResult {
    let config = match load_config("drain") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("drain") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let worker = QueueWorker::sql_backed(&pool, &config)
            .map_err(|error| ("notifier", error.to_string(), 2u8))?;
        let report = worker
            .drain(max_batches.max(1))
            .await
            .map_err(|error| ("queue", error.to_string(), 7u8));
        pool.close().await;
        Ok::<_, StepError>(report?)
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "drain",
            format!(
                "processed {} message(s): {} acked, {} requeued, {} dropped",
                report.popped,
                report.acked,
                report.requeued,
                report.dropped
            ),
            report,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("drain", error_class, message, exit_code)
        }
    }
}
