//! # scep2acme
//!
//! A bridge that lets SCEP clients obtain certificates from an ACME CA.
//! Devices enrol over SCEP with a challenge password; the password decides
//! which hostnames they may request, and every approved request is passed
//! unmodified to the ACME CA, proving domain control with DNS-01.
//!
//! ## Architecture
//!
//! ```text
//! SCEP client → HTTP transport → SCEP engine → whitelist check
//!                                     ↓
//!                       ACME order (DNS-01) → issued certificate
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use clap::Parser;
//! use scep2acme::{config::CliArgs, Config, Result};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_args(CliArgs::parse())?;
//!     scep2acme::run(config, CancellationToken::new()).await
//! }
//! ```

pub mod acme;
pub mod config;
pub mod csr;
pub mod depot;
pub mod errors;
pub mod observability;
pub mod scep;
pub mod server;
pub mod utils;
pub mod whitelist;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use config::Config;
pub use errors::{Error, Result};

use acme::dns::create_provider;
use acme::{AcmeCertificateSource, AcmeClient, AcmeError};
use depot::FileDepot;
use scep::{LoggingService, ScepEngine, ScepService, ServiceWithoutRenewal};
use server::Supervisor;
use whitelist::CsrPasswordVerifier;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Build every component from `config` and serve until `shutdown` is
/// cancelled or the process receives SIGTERM.
///
/// Whitelist, DNS provider and ACME account failures abort before the
/// listener is bound.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<()> {
    tracing::info!(app_name = APP_NAME, version = VERSION, "Starting scep2acme");

    let verifier = CsrPasswordVerifier::from_file(&config.whitelist_path)?;
    let dns = create_provider(&config.acme.dns_provider).map_err(AcmeError::from)?;
    let client = AcmeClient::new(&config.acme, dns).await?;

    let engine = ScepEngine::new(
        Arc::new(FileDepot::from_config(&config.identity)),
        Arc::new(verifier),
        Arc::new(AcmeCertificateSource::new(Arc::new(client.clone()))),
    );
    let service: Arc<dyn ScepService> =
        Arc::new(LoggingService::new(ServiceWithoutRenewal::new(engine)));

    let served = Supervisor::new(config.server.clone()).run(service, shutdown).await;
    client.shutdown().await;
    served?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "scep2acme");
    }
}
