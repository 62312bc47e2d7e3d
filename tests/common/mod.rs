use std::sync::Once;

static INIT: Once = Once::new();

/// Routes `tracing` output through the test harness so it shows up for
/// failing tests only.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    });
}
