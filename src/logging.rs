//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--verbose` CLI flag or `WAVEKEEPER_DEBUG=1` force `debug`
//! 2. `WAVEKEEPER_LOG` environment variable (EnvFilter syntax, e.g. "wavekeeper=trace")
//! 3. default to `warn`
//!
//! Output goes to stderr so stdout stays machine-readable JSON.

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG: &str = "WAVEKEEPER_LOG";
pub const ENV_DEBUG: &str = "WAVEKEEPER_DEBUG";

/// Initialise the global subscriber. Later calls are ignored.
pub fn init(verbose: bool) {
    let filter = build_filter(
        verbose,
        std::env::var(ENV_LOG).ok().as_deref(),
        std::env::var(ENV_DEBUG).ok().as_deref(),
    );

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_filter(verbose: bool, log: Option<&str>, debug: Option<&str>) -> EnvFilter {
    if verbose || debug.is_some_and(is_truthy) {
        return EnvFilter::new("debug");
    }
    log.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
