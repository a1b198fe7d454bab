//! DNS-01 challenge record providers
//!
//! A provider publishes and removes the `_acme-challenge` TXT records that
//! prove control of a domain. Providers are selected by name at startup.

mod manual;
mod webhook;

pub use manual::ManualProvider;
pub use webhook::WebhookProvider;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Result type for DNS operations
pub type DnsResult<T> = Result<T, DnsProviderError>;

/// Errors that can occur during DNS provider operations
#[derive(Debug, Error)]
pub enum DnsProviderError {
    /// Authentication failed with the DNS provider
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Record creation failed
    #[error("Failed to create TXT record for '{record_name}': {message}")]
    RecordCreation { record_name: String, message: String },

    /// Record deletion failed
    #[error("Failed to delete TXT record '{record_id}': {message}")]
    RecordDeletion { record_id: String, message: String },

    /// API request failed
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Request timeout
    #[error("Request timed out after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// No provider is registered under this name
    #[error("unknown DNS provider '{0}'")]
    UnknownProvider(String),
}

/// Trait for DNS providers that support DNS-01 challenges
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Returns the provider name (e.g., "webhook")
    fn name(&self) -> &'static str;

    /// Publish `record_value` at `{record_name}.{domain}`, returning an id for cleanup.
    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String>;

    /// Remove a record created by [`DnsProvider::create_txt_record`].
    ///
    /// Called during cleanup even if validation failed; removing a record
    /// that no longer exists is not an error.
    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()>;
}

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// TTL for challenge records
pub const CHALLENGE_TTL: u32 = 60;

/// Timeout for provider API calls
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding the webhook base URL
pub const WEBHOOK_URL_ENV: &str = "SCEP2ACME_DNS_WEBHOOK_URL";
/// Environment variable holding the optional webhook bearer token
pub const WEBHOOK_TOKEN_ENV: &str = "SCEP2ACME_DNS_WEBHOOK_TOKEN";

/// Strip a wildcard label: `*.example.com` → `example.com`.
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// `_acme-challenge.<domain>`
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

/// TXT value for a DNS-01 key authorization: base64url(SHA-256(key_authorization)).
pub fn challenge_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

/// Build the provider registered under `name`, configured from the process environment.
pub fn create_provider(name: &str) -> DnsResult<Arc<dyn DnsProvider>> {
    create_provider_with(name, |key| std::env::var(key).ok())
}

/// Like [`create_provider`], reading settings through `lookup`.
pub fn create_provider_with<F>(name: &str, lookup: F) -> DnsResult<Arc<dyn DnsProvider>>
where
    F: Fn(&str) -> Option<String>,
{
    match name {
        "webhook" => {
            let url = lookup(WEBHOOK_URL_ENV)
                .filter(|url| !url.is_empty())
                .ok_or_else(|| {
                    DnsProviderError::Configuration(format!(
                        "webhook provider requires {WEBHOOK_URL_ENV}"
                    ))
                })?;
            let token = lookup(WEBHOOK_TOKEN_ENV).filter(|token| !token.is_empty());
            Ok(Arc::new(WebhookProvider::new(url, token, PROVIDER_TIMEOUT)?))
        }
        "manual" => Ok(Arc::new(ManualProvider::new())),
        other => Err(DnsProviderError::UnknownProvider(other.to_string())),
    }
}
