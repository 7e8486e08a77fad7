// src/logging.rs

//! Tracing subscriber setup.
//!
//! Level precedence: `--log-level` flag, then the `CMDQ_LOG` environment
//! variable, then `info`. Everything goes to stderr; stdout is reserved
//! for generated scripts and monitor output.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_level = || {
        // `Level: FromStr` accepts the usual names ("warn", "debug", ...).
        std::env::var("CMDQ_LOG").ok()?.trim().parse::<Level>().ok()
    };
    let level = cli_level.map(Level::from).or_else(env_level).unwrap_or(Level::INFO);

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
