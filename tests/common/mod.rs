//! Shared test scaffolding.
#![allow(dead_code)]

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a fmt subscriber writing to the test writer. Idempotent.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Spins until `probe` returns true or the deadline passes.
pub fn wait_until(timeout: std::time::Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if probe() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    probe()
}
