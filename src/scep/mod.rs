//! # SCEP
//!
//! The device-facing half of the bridge. [`ScepEngine`] speaks SCEP and is
//! assembled from the collaborators below; the decorators in this module wrap
//! any [`ScepService`] without changing its contract.
//!
//! ```text
//! LoggingService
//!   └── ServiceWithoutRenewal
//!         └── ScepEngine ── Depot ─ CsrVerifier ─ CertificateSource
//! ```

mod caps;
mod engine;
mod logging;
pub mod message;

pub use caps::{without_renewal, ServiceWithoutRenewal};
pub use engine::{ScepEngine, CAPABILITIES};
pub use logging::LoggingService;

use async_trait::async_trait;
use rsa::RsaPrivateKey;
use thiserror::Error;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

use crate::errors::PkiError;
use crate::Result;

/// Errors raised while decoding or encoding SCEP messages
#[derive(Debug, Error)]
pub enum ScepError {
    #[error("malformed SCEP message: {0}")]
    Asn1(#[from] der::Error),

    #[error("expected {expected} content, found {found}")]
    UnexpectedContentType { expected: &'static str, found: String },

    #[error("SCEP message carries no content")]
    MissingContent,

    #[error("SCEP message has no signer")]
    NoSigner,

    #[error("SCEP message does not include the signer certificate")]
    NoSignerCertificate,

    #[error("missing {0} attribute")]
    MissingAttribute(&'static str),

    #[error("invalid {0} attribute")]
    InvalidAttribute(&'static str),

    #[error("unknown messageType {0}")]
    UnknownMessageType(String),

    #[error("unsupported digest algorithm {0}")]
    UnsupportedDigest(String),

    #[error("unsupported content encryption algorithm {0}")]
    UnsupportedCipher(String),

    #[error("messageDigest does not match content")]
    MessageDigestMismatch,

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("signing failed: {0}")]
    Sign(String),

    #[error("envelope has no key transport recipient")]
    NoRecipient,

    #[error("decrypting envelope: {0}")]
    Decrypt(String),

    #[error("encrypting envelope: {0}")]
    Encrypt(String),

    #[error(transparent)]
    Certificate(#[from] PkiError),
}

/// The SCEP operations exposed over HTTP
#[async_trait]
pub trait ScepService: Send + Sync {
    /// Newline-delimited capability tokens
    async fn get_ca_caps(&self) -> Result<Vec<u8>>;

    /// Encoded RA/CA certificates and how many there are
    async fn get_ca_cert(&self, message: &str) -> Result<(Vec<u8>, usize)>;

    /// Handle a PKIMessage, returning the CertRep
    async fn pki_operation(&self, body: &[u8]) -> Result<Vec<u8>>;
}

/// Identity material and certificate bookkeeping
pub trait Depot: Send + Sync {
    /// The RA chain (leaf first) and the leaf's private key
    fn ca(&self) -> Result<(Vec<Certificate>, RsaPrivateKey)>;

    fn serial(&self) -> Result<SerialNumber>;

    fn has_cn(&self, cn: &str, allow_time: i64, cert: &Certificate, revoke_old: bool)
        -> Result<bool>;

    fn put(&self, name: &str, cert: &Certificate) -> Result<()>;
}

/// Decides whether a PKCS#10 request may be served.
///
/// `Ok(false)` is a refusal; `Err` means the request could not be evaluated.
pub trait CsrVerifier: Send + Sync {
    fn verify(&self, csr: &[u8]) -> Result<bool>;
}

/// Where issued certificates come from
#[async_trait]
pub trait CertificateSource: Send + Sync {
    async fn obtain(&self, csr: &[u8]) -> Result<Certificate>;
}
