use std::process::ExitCode;

fn main() -> ExitCode {
    farmhand_cli::run()
}
