//! Shared helpers for the integration tests

use tracing_subscriber::EnvFilter;

/// Route library logs through the test harness; `RUST_LOG=debug` shows wire traffic
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
