//! # Chain Depot
//!
//! Supplies the RA certificate chain and key that sign SCEP responses and
//! decrypt SCEP requests. Both files are read again on every call, so a
//! rotated chain is picked up without a restart.
//!
//! The bridge never mints certificates itself, so the serial, duplicate-CN
//! and storage hooks SCEP engines expect are fixed stubs.

use std::fs;
use std::path::{Path, PathBuf};

use rsa::RsaPrivateKey;
use tracing::debug;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

use crate::config::IdentityConfig;
use crate::errors::PkiError;
use crate::scep::Depot;
use crate::utils::certificates::{ensure_key_matches, parse_certificate_chain, parse_rsa_private_key};
use crate::{Error, Result};

/// File-backed depot for the RA identity
#[derive(Debug, Clone)]
pub struct FileDepot {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl FileDepot {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self { cert_path: cert_path.into(), key_path: key_path.into() }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self::new(&config.cert_path, &config.key_path)
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Read and decode the chain file.
    pub fn load_certs(&self) -> std::result::Result<Vec<Certificate>, PkiError> {
        let data = fs::read(&self.cert_path).map_err(|source| PkiError::ChainReadError {
            path: self.cert_path.clone(),
            source,
        })?;
        parse_certificate_chain(&data, &self.cert_path)
    }

    /// Read and decode the key file.
    pub fn load_key(&self) -> std::result::Result<RsaPrivateKey, PkiError> {
        let data = fs::read(&self.key_path).map_err(|source| PkiError::PrivateKeyReadError {
            path: self.key_path.clone(),
            source,
        })?;
        parse_rsa_private_key(&data, &self.key_path)
    }
}

impl Depot for FileDepot {
    fn ca(&self) -> Result<(Vec<Certificate>, RsaPrivateKey)> {
        let certs = self.load_certs()?;
        let key = self.load_key()?;
        ensure_key_matches(&certs[0], &key)?;

        debug!(
            component = "depot",
            path = %self.cert_path.display(),
            certificates = certs.len(),
            "Loaded RA chain"
        );
        Ok((certs, key))
    }

    fn serial(&self) -> Result<SerialNumber> {
        Err(Error::internal("depot cannot create certificates"))
    }

    fn has_cn(
        &self,
        _cn: &str,
        _allow_time: i64,
        _cert: &Certificate,
        _revoke_old: bool,
    ) -> Result<bool> {
        Ok(false)
    }

    fn put(&self, _name: &str, _cert: &Certificate) -> Result<()> {
        Ok(())
    }
}
