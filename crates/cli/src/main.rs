use std::process::ExitCode;

fn main() -> ExitCode {
    supplyq_cli::run()
}
