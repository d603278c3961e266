//! Tracing subscriber setup for the `cps` binary.

use std::io;

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a filter directive, e.g. `cps_core=debug`.
pub const LOG_ENV_VAR: &str = "CPS_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Default directive for a `-v` count: warn, info, debug, then trace.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable. A second call is a no-op.
pub fn init(format: LogFormat, verbosity: u8) {
    let builder = fmt()
        .with_env_filter(filter(verbosity))
        .with_writer(io::stderr)
        .with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
