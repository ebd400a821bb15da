//! Shared test helpers.

/// Route `log` output through the test harness. Safe to call repeatedly.
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
