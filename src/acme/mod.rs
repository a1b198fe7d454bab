//! # ACME
//!
//! The CA-facing half of the bridge: an ACME client that turns a PKCS#10
//! request into an issued certificate using DNS-01 validation, and the
//! [`AcmeCertificateSource`] adapter that plugs it into the SCEP engine.

mod client;
pub mod dns;
mod source;

pub use client::{issuance_budget, AcmeAccount, AcmeClient, AcmeOrder, DnsChallenge};
pub use source::AcmeCertificateSource;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use dns::DnsProviderError;

/// Errors that can occur during ACME operations
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Failed to create or load the ACME account
    #[error("Failed to set up ACME account: {0}")]
    AccountCreation(String),

    /// The account credentials file could not be read or written
    #[error("ACME account credentials {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request names nothing to order
    #[error("certificate request names no DNS identifiers")]
    NoIdentifiers,

    /// Failed to create the certificate order
    #[error("Failed to create certificate order: {0}")]
    OrderCreation(String),

    /// No DNS-01 challenge offered for a domain
    #[error("No DNS-01 challenge available for domain '{0}'")]
    NoDns01Challenge(String),

    /// Challenge validation failed
    #[error("Challenge validation failed for domain '{domain}': {message}")]
    ChallengeValidation { domain: String, message: String },

    /// Certificate finalization failed
    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    /// The caller stopped waiting before the order completed
    #[error("order abandoned before completion")]
    Abandoned,

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// DNS provider operation failed
    #[error("DNS provider error: {0}")]
    DnsProvider(#[from] DnsProviderError),

    /// The CA returned no usable certificate
    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),
}

/// Input to [`CaClient::obtain_for_csr`]
#[derive(Debug, Clone)]
pub struct ObtainForCsrRequest {
    /// DER PKCS#10 request, submitted unmodified
    pub csr: Vec<u8>,
    /// Keep the issuer chain after the leaf
    pub bundle: bool,
}

/// An issued certificate as returned by the CA
#[derive(Debug, Clone)]
pub struct CertificateResource {
    /// First identifier of the order
    pub domain: String,
    /// PEM certificate, leaf first
    pub certificate: String,
}

/// The CA-protocol operations the bridge relies on
#[async_trait]
pub trait CaClient: Send + Sync {
    async fn obtain_for_csr(
        &self,
        request: ObtainForCsrRequest,
    ) -> Result<CertificateResource, AcmeError>;
}
