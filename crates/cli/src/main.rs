use std::process::ExitCode;

fn main() -> ExitCode {
    srdgen_cli::run()
}
