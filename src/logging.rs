//! Diagnostic logging.
//!
//! The library logs through `tracing` macros; only the binary installs a
//! subscriber. Logs go to stderr so the progress lines printed by
//! [`crate::output`] own stdout.
//!
//! The default filter is `sitepipe=<level>`. Setting `SITEPIPE_LOG` (or
//! `RUST_LOG`) to any `EnvFilter` directive string replaces it:
//!
//! ```text
//! SITEPIPE_LOG=sitepipe::develop=debug sitepipe develop
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "SITEPIPE_LOG";

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for this crate when no environment filter is set.
    pub level: Level,
    /// Include the module path (e.g. `sitepipe::revision`).
    pub include_target: bool,
    /// Include file and line.
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            // Debug output is for tracking down which stage did what
            include_target: level >= Level::DEBUG,
            ..Default::default()
        }
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// The directive string in effect: `SITEPIPE_LOG`, then `RUST_LOG`, then
/// the configured level for this crate.
pub fn filter_directives(config: &LoggingConfig) -> String {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .find_map(|name| env::var(name).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| default_directives(config.level))
}

fn default_directives(level: Level) -> String {
    format!("sitepipe={}", level.as_str().to_lowercase())
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(filter_directives(&config))
            .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(config.include_target)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .init();
    });
}
