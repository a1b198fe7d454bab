//! # Error Handling
//!
//! Error types for the SCEP to ACME bridge. Each component owns a
//! `thiserror` enum describing its own failures; [`Error`] wraps them so the
//! bootstrap code and the HTTP boundary can deal with a single type.

pub mod pki;

pub use pki::PkiError;

use crate::acme::AcmeError;
use crate::csr::CsrError;
use crate::scep::ScepError;
use crate::whitelist::WhitelistError;

/// Custom result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bridge
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network transport errors (listener, HTTP)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Identity material (chain or key) could not be loaded
    #[error(transparent)]
    Pki(#[from] PkiError),

    /// Certificate signing request could not be parsed
    #[error(transparent)]
    Csr(#[from] CsrError),

    /// Whitelist could not be loaded
    #[error("loading whitelist: {0}")]
    Whitelist(#[from] WhitelistError),

    /// SCEP message could not be decoded or encoded
    #[error(transparent)]
    Scep(#[from] ScepError),

    /// ACME account or issuance failure
    #[error(transparent)]
    Acme(#[from] AcmeError),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_message() {
        let err = Error::config("-cert is mandatory, use -help for help");
        assert_eq!(err.to_string(), "Configuration error: -cert is mandatory, use -help for help");
    }

    #[test]
    fn whitelist_error_is_prefixed() {
        let err: Error = WhitelistError::UnsupportedValue { secret: "s3cret".into() }.into();
        assert!(err.to_string().starts_with("loading whitelist:"));
    }

    #[test]
    fn pki_error_is_transparent() {
        let err: Error = PkiError::PemDecode { path: "chain.pem".into() }.into();
        assert_eq!(err.to_string(), PkiError::PemDecode { path: "chain.pem".into() }.to_string());
    }
}
