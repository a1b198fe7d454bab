//! Installs the process-wide subscriber, so it lives in its own test binary.

use scep2acme::config::LoggingConfig;
use scep2acme::observability::init_logging;

#[test]
fn init_logging_twice_is_harmless() {
    init_logging(&LoggingConfig { debug: true, json: false });
    init_logging(&LoggingConfig { debug: false, json: true });
    tracing::info!("subscriber installed");
}
