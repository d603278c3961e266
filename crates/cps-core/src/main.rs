//! `cps` binary entry point.

use clap::Parser;
use cps_core::cli::{error_document, execute, Cli};
use cps_core::exit_codes::ExitCode;
use cps_core::{logging, SystemClock};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.verbose);

    let (code, document) = match execute(&cli, &SystemClock) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "command failed");
            (ExitCode::from_error(&e), error_document(&e))
        }
    };

    match serde_json::to_string_pretty(&document) {
        Ok(text) if code.is_success() => println!("{text}"),
        Ok(text) => eprintln!("{text}"),
        Err(e) => eprintln!("failed to render output: {e}"),
    }
    std::process::exit(code.as_i32());
}
