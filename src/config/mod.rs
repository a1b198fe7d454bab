//! # Configuration Management
//!
//! Command line and environment configuration for the bridge. Flags are parsed
//! once into [`CliArgs`], validated into an immutable [`Config`], and the
//! relevant sections are handed to each component constructor.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::{Error, Result};

/// Default listen address for the SCEP endpoint
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8383";

/// Let's Encrypt staging directory, used unless another directory is configured
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Default wait between publishing DNS-01 records and asking the CA to validate them
pub const DEFAULT_PROPAGATION_DELAY_SECS: u64 = 10;

/// Longest accepted propagation delay; an order must finish within the
/// PKIOperation request timeout
pub const MAX_PROPAGATION_DELAY_SECS: u64 = 120;

/// Raw command line arguments. Every flag can also be supplied through a
/// `SCEP2ACME_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "scep2acme")]
#[command(about = "SCEP server that obtains certificates from an ACME CA")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct CliArgs {
    /// Address to listen on
    #[arg(long, env = "SCEP2ACME_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// RA certificate chain (PEM, leaf first)
    #[arg(long, env = "SCEP2ACME_CERT")]
    pub cert: Option<PathBuf>,

    /// RA private key (PEM, PKCS#1 or PKCS#8 RSA)
    #[arg(long = "certkey", env = "SCEP2ACME_CERTKEY")]
    pub cert_key: Option<PathBuf>,

    /// ACME account credentials file; created on first registration
    #[arg(long = "acmekey", env = "SCEP2ACME_ACMEKEY")]
    pub acme_key: Option<PathBuf>,

    /// ACME account contact email
    #[arg(long = "acmeemail", env = "SCEP2ACME_ACMEEMAIL")]
    pub acme_email: Option<String>,

    /// ACME directory URL
    #[arg(long = "acmeurl", env = "SCEP2ACME_ACMEURL", default_value = LETSENCRYPT_STAGING)]
    pub acme_url: String,

    /// YAML file mapping challenge passwords to allowed hostnames
    #[arg(long, env = "SCEP2ACME_WHITELIST")]
    pub whitelist: Option<PathBuf>,

    /// DNS-01 provider name
    #[arg(long = "dnsprovider", env = "SCEP2ACME_DNSPROVIDER")]
    pub dns_provider: Option<String>,

    /// Seconds to wait for DNS-01 records to propagate
    #[arg(
        long = "dns-propagation-delay",
        env = "SCEP2ACME_DNS_PROPAGATION_DELAY",
        default_value_t = DEFAULT_PROPAGATION_DELAY_SECS
    )]
    pub dns_propagation_delay: u64,

    /// Enable debug logging
    #[arg(long, env = "SCEP2ACME_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long = "json-logs", env = "SCEP2ACME_JSON_LOGS")]
    pub json_logs: bool,
}

/// Validated, immutable application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    pub acme: AcmeSettings,
    pub whitelist_path: PathBuf,
    pub logging: LoggingConfig,
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Location of the RA chain and key on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// ACME account and DNS-01 settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeSettings {
    pub account_path: PathBuf,
    pub email: String,
    pub directory_url: String,
    pub dns_provider: String,
    pub propagation_delay: Duration,
}

/// Log sink settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub debug: bool,
    pub json: bool,
}

impl Config {
    /// Validate parsed arguments. The first missing mandatory flag is reported
    /// by name.
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let cert_path = mandatory(non_empty_path(args.cert), "cert")?;
        let key_path = mandatory(non_empty_path(args.cert_key), "certkey")?;
        let email = mandatory(args.acme_email.filter(|v| !v.trim().is_empty()), "acmeemail")?;
        let account_path = mandatory(non_empty_path(args.acme_key), "acmekey")?;
        let dns_provider =
            mandatory(args.dns_provider.filter(|v| !v.trim().is_empty()), "dnsprovider")?;
        let whitelist_path = mandatory(non_empty_path(args.whitelist), "whitelist")?;

        let listen = parse_listen(&args.listen)?;
        if args.dns_propagation_delay > MAX_PROPAGATION_DELAY_SECS {
            return Err(Error::config(format!(
                "-dns-propagation-delay must not exceed {} seconds",
                MAX_PROPAGATION_DELAY_SECS
            )));
        }

        Ok(Self {
            server: ServerConfig { listen },
            identity: IdentityConfig { cert_path, key_path },
            acme: AcmeSettings {
                account_path,
                email,
                directory_url: args.acme_url,
                dns_provider,
                propagation_delay: Duration::from_secs(args.dns_propagation_delay),
            },
            whitelist_path,
            logging: LoggingConfig { debug: args.debug, json: args.json_logs },
        })
    }
}

/// Parse a listen address; an empty host (`:8383`) binds every interface.
fn parse_listen(listen: &str) -> Result<SocketAddr> {
    let qualified = match listen.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => listen.to_string(),
    };
    qualified
        .parse::<SocketAddr>()
        .map_err(|e| Error::config(format!("Invalid listen address '{}': {}", listen, e)))
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

fn mandatory<T>(value: Option<T>, flag: &str) -> Result<T> {
    value.ok_or_else(|| Error::config(format!("-{} is mandatory, use -help for help", flag)))
}
