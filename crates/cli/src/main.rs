use std::process::ExitCode;

fn main() -> ExitCode {
    relaybot_cli::run()
}
