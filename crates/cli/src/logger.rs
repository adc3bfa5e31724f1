//! Terminal logging for the `log` facade, backed by simplelog.

use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, Config, ConfigBuilder, TermLogger, TerminalMode};

/// Install a stderr logger at `level`. Fails if one is already set.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    TermLogger::init(level, config(), TerminalMode::Stderr, ColorChoice::Auto)
}

fn config() -> Config {
    ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Off)
        .set_time_format_rfc3339()
        .build()
}

/// Level from `-v` count, falling back to the configured level.
pub fn level_for(verbose: u8, configured: LevelFilter) -> LevelFilter {
    match verbose {
        0 => configured,
        1 => configured.max(LevelFilter::Info),
        2 => configured.max(LevelFilter::Debug),
        _ => LevelFilter::Trace,
    }
}
