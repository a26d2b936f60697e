use farmhand_db::fixtures::{DemoFarmSeed, DEMO_FARM_ID, DEMO_MEMBER_KEY, DEMO_OWNER_KEY};

use crate::commands::{load_config, open_database, runtime, CommandResult, StepError};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seeded = DemoFarmSeed::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoFarmSeed::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if !verification.all_present {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect::<Vec<_>>();
            return Err(("seed_verification", failure_message(&failed), 6u8));
        }
        Ok::<_, StepError>(seeded)
    });

    match result {
        Ok(seeded) => CommandResult::success(
            "seed",
            format!(
                "demo farm `{}` seeded: owner {DEMO_OWNER_KEY} ready, member {DEMO_MEMBER_KEY} \
                 invited, {} stock positions, {} livestock tags",
                seeded.farm_id, seeded.positions_seeded, seeded.tags_seeded
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn failure_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        format!("demo farm `{DEMO_FARM_ID}` failed verification")
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
