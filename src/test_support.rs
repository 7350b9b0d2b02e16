//! Shared test-only helpers.

/// Route `tracing` spans/events through the test harness's captured writer
/// so `#[tracing::instrument]`-ed functions produce visible output under
/// `cargo test -- --nocapture`. Idempotent: later calls in the same process
/// are no-ops once a global subscriber is installed.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
