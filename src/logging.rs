// Logging setup shared by the binaries

use tracing_subscriber::EnvFilter;

/// Env var holding the log filter (e.g. `usage_measurement=debug`)
pub const LOG_ENV: &str = "USAGE_LOG";

/// Install a fmt subscriber filtered by `USAGE_LOG` (default `info`).
/// Returns false if a global subscriber was already set.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
