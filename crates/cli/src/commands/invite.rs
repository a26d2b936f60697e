use farmhand_core::domain::message::SenderKey;
use farmhand_core::domain::session::{FarmId, Invitation, InvitationKind};
use farmhand_db::repositories::{InvitationRepository, SessionRepository, SqlSessionRepository};

use crate::commands::{load_config, open_database, runtime, CommandResult, StepError};

/// Registers `sender_key` with `farm_id`; the sender's first message starts onboarding.
pub fn run(sender_key: &str, farm_id: &str, kind: InvitationKind) -> CommandResult {
    let sender_key = sender_key.trim();
    let farm_id = farm_id.trim();
    if sender_key.is_empty() || farm_id.is_empty() {
        return CommandResult::failure(
            "invite",
            "invalid_input",
            "sender key and farm id must not be blank",
            2,
        );
    }

    let config = match load_config("invite") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("invite") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let sender = SenderKey::new(sender_key);
    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let repository = SqlSessionRepository::new(pool.clone());

        let outcome: Result<(), StepError> = match repository.find(&sender).await {
            Ok(Some(session)) => Err((
                "already_registered",
                format!("{sender} already has a session on farm `{}`", session.farm_id.0),
                8u8,
            )),
            Ok(None) => repository
                .invite(Invitation::new(sender.clone(), FarmId(farm_id.to_string()), kind))
                .await
                .map_err(|error| ("persistence", error.to_string(), 7u8)),
            Err(error) => Err(("persistence", error.to_string(), 7u8)),
        };
        pool.close().await;
        outcome
    });

    match result {
        Ok(()) => CommandResult::success(
            "invite",
            format!("invited {sender} to farm `{farm_id}` as {}", kind.as_str()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("invite", error_class, message, exit_code)
        }
    }
}
