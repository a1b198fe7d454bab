use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading the bridge's own identity material (RA chain and key).
#[derive(Debug, Error)]
pub enum PkiError {
    /// The certificate chain file could not be read.
    #[error("Failed to read certificate chain at {path}: {source}")]
    ChainReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The private key file could not be read.
    #[error("Failed to read private key at {path}: {source}")]
    PrivateKeyReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No PEM block could be decoded from the file.
    #[error("PEM decode failed: {path}")]
    PemDecode { path: PathBuf },

    /// A PEM block decoded but did not contain a valid X.509 certificate.
    #[error("parsing cert {index}: {source}")]
    CertificateParse {
        index: usize,
        #[source]
        source: der::Error,
    },

    /// The private key PEM contents were invalid.
    #[error("Private key file {path} does not contain a supported private key: {message}")]
    InvalidPrivateKey { path: PathBuf, message: String },

    /// The key decoded, but it is not an RSA key.
    #[error("key is not an RSA private key")]
    NotRsaKey,

    /// The leaf certificate does not carry an RSA public key.
    #[error("leaf certificate does not carry an RSA public key: {0}")]
    LeafNotRsa(String),

    /// The supplied certificate and key do not match.
    #[error("Certificate and private key do not match")]
    CertificateKeyMismatch,
}
