//! Tracing for tests.
//!
//! [`init_test_tracing`] routes `tracing` output to the test harness so it
//! only shows for failing tests. It installs at most one subscriber per
//! process and can be called from every test.

use tracing_subscriber::EnvFilter;

/// Default filter: daemon internals at debug, everything else at warn.
const DEFAULT_FILTER: &str = "warn,handyd_core=debug";

/// Install a test-writer subscriber honouring `RUST_LOG`.
///
/// ```ignore
/// #[tokio::test]
/// async fn forwards_to_daemon() {
///     handyd_test_utils::tracing_setup::init_test_tracing();
///     // ...
/// }
/// ```
pub fn init_test_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
