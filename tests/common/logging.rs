use std::sync::Once;

static INIT: Once = Once::new();

/// Logs to stderr from the crate's `log4rs.yaml`, once per test binary.
#[allow(unused)] // used in tests
pub fn init_default_logging() {
    INIT.call_once(|| {
        log4rs::init_file("log4rs.yaml", Default::default()).unwrap();
    });
}
