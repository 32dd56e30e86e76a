use std::env;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber writing to stderr.
///
/// stdout stays reserved for the window report lines.
pub fn initialize_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(parse_rust_log())
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Uses `RUST_LOG` literally when set. A bare level such as `debug` only
/// applies to this crate and leaves dependencies at `info`.
fn parse_rust_log() -> EnvFilter {
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => EnvFilter::new(format!("info,kv_loadgen={level}")),
            Err(_) => EnvFilter::new(value),
        },
        Err(_) => EnvFilter::new("info"),
    }
}

/// Logs to the test runner's captured output.
#[cfg(test)]
pub fn init_test() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("ERROR,kv_loadgen=TRACE"))
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
