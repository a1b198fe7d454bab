//! # Structured Logging
//!
//! Log sink setup and span helpers built on the tracing ecosystem.

use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};

/// Create a tracing span for one SCEP request.
///
/// ```rust,ignore
/// let span = scep_span!("PKIOperation");
/// let span = scep_span!("PKIOperation", transaction_id = %id);
/// ```
#[macro_export]
macro_rules! scep_span {
    ($operation:expr) => {
        tracing::info_span!(
            "scep_request",
            operation = %$operation,
            request_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "scep_request",
            operation = %$operation,
            request_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for one ACME issuance.
#[macro_export]
macro_rules! acme_span {
    ($names:expr) => {
        tracing::info_span!(
            "acme_issuance",
            names = ?$names,
            order_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the level is `info`, or `debug` when
/// the debug toggle is set. A subscriber installed earlier (tests) is left in
/// place.
pub fn init_logging(config: &LoggingConfig) {
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let _ = if config.json { builder.json().try_init() } else { builder.try_init() };
}

/// Log the non-secret parts of the configuration once at startup.
pub fn log_config_info(config: &Config) {
    tracing::info!(
        listen = %config.server.listen,
        cert = %config.identity.cert_path.display(),
        acme_directory = %config.acme.directory_url,
        acme_email = %config.acme.email,
        dns_provider = %config.acme.dns_provider,
        propagation_delay_secs = config.acme.propagation_delay.as_secs(),
        whitelist = %config.whitelist_path.display(),
        debug = config.logging.debug,
        "scep2acme configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = scep_span!("GetCACaps");
        let _span = scep_span!("PKIOperation", transaction_id = "abc");
        let _span = acme_span!(vec!["example.com"]);
    }
}
