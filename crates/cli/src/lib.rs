pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use farmhand_core::domain::session::InvitationKind;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "farmhand",
    about = "Farmhand operator CLI",
    long_about = "Operate the farmhand messaging backend: migrations, config inspection, invitations, queue draining, reminders and smoke validation.",
    after_help = "Examples:\n  farmhand migrate\n  farmhand invite +5491100000001 farm-1 --kind owner\n  farmhand drain --max-batches 5\n  farmhand smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Load the deterministic demo farm fixture and verify it")]
    Seed,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(about = "Process queued messages until the queue is idle")]
    Drain {
        #[arg(long, default_value_t = 100, help = "Upper bound on worker batches to run")]
        max_batches: usize,
    },
    #[command(about = "Invite a sender key to join a farm")]
    Invite {
        sender_key: String,
        farm_id: String,
        #[arg(long, value_enum, default_value_t = InviteKind::Member)]
        kind: InviteKind,
    },
    #[command(about = "Send a text reminder to every onboarded user")]
    Remind {
        #[arg(long, help = "Only reach users of this farm")]
        farm: Option<String>,
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InviteKind {
    Member,
    Owner,
}

impl From<InviteKind> for InvitationKind {
    fn from(value: InviteKind) -> Self {
        match value {
            InviteKind::Member => InvitationKind::Member,
            InviteKind::Owner => InvitationKind::Owner,
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Seed => commands::seed::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Drain { max_batches } => commands::drain::run(max_batches),
        Command::Invite { sender_key, farm_id, kind } => {
            commands::invite::run(&sender_key, &farm_id, kind.into())
        }
        Command::Remind { farm, message } => commands::remind::run(farm.as_deref(), &message),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
