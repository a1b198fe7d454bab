use std::path::Path;

use der::{Decode, Encode};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, PrivateKeyInfo};
use rsa::{RsaPrivateKey, RsaPublicKey};
use rustls::pki_types::pem::{self, PemObject};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use x509_cert::Certificate;

use crate::errors::PkiError;

/// Decode every `CERTIFICATE` PEM block in `data`, preserving file order.
///
/// Zero blocks is a decode failure; a block that is valid PEM but not a valid
/// certificate is reported with its zero-based position.
pub fn parse_certificate_chain(data: &[u8], path: &Path) -> Result<Vec<Certificate>, PkiError> {
    let mut certs = Vec::new();

    for block in CertificateDer::pem_slice_iter(data) {
        let der = block.map_err(|_| PkiError::PemDecode { path: path.to_path_buf() })?;
        let cert = Certificate::from_der(der.as_ref())
            .map_err(|source| PkiError::CertificateParse { index: certs.len(), source })?;
        certs.push(cert);
    }

    if certs.is_empty() {
        return Err(PkiError::PemDecode { path: path.to_path_buf() });
    }

    Ok(certs)
}

/// Decode the first private key block in `data` as an RSA key.
///
/// `RSA PRIVATE KEY` blocks are read as PKCS#1; `PRIVATE KEY` blocks are
/// unwrapped as PKCS#8 and must carry an RSA key.
pub fn parse_rsa_private_key(data: &[u8], path: &Path) -> Result<RsaPrivateKey, PkiError> {
    let key = PrivateKeyDer::from_pem_slice(data).map_err(|e| match e {
        pem::Error::NoItemsFound => PkiError::PemDecode { path: path.to_path_buf() },
        other => {
            PkiError::InvalidPrivateKey { path: path.to_path_buf(), message: other.to_string() }
        }
    })?;

    match key {
        PrivateKeyDer::Pkcs1(pkcs1) => RsaPrivateKey::from_pkcs1_der(pkcs1.secret_pkcs1_der())
            .map_err(|e| PkiError::InvalidPrivateKey {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        PrivateKeyDer::Pkcs8(pkcs8) => {
            let bytes = pkcs8.secret_pkcs8_der();
            let info = PrivateKeyInfo::try_from(bytes).map_err(|e| PkiError::InvalidPrivateKey {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            if info.algorithm.oid != rsa::pkcs1::ALGORITHM_OID {
                return Err(PkiError::NotRsaKey);
            }
            RsaPrivateKey::from_pkcs8_der(bytes).map_err(|e| PkiError::InvalidPrivateKey {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
        _ => Err(PkiError::NotRsaKey),
    }
}

/// The RSA public key carried by `cert`.
pub fn rsa_public_key(cert: &Certificate) -> Result<RsaPublicKey, PkiError> {
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| PkiError::LeafNotRsa(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| PkiError::LeafNotRsa(e.to_string()))
}

/// Fail unless `key` is the private half of the public key in `cert`.
pub fn ensure_key_matches(cert: &Certificate, key: &RsaPrivateKey) -> Result<(), PkiError> {
    let expected = rsa_public_key(cert)?;
    if key.to_public_key() == expected {
        Ok(())
    } else {
        Err(PkiError::CertificateKeyMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    const CHAIN: &[u8] = include_bytes!("../../tests/fixtures/chain.pem");
    const RA_KEY: &[u8] = include_bytes!("../../tests/fixtures/ra.key");
    const OTHER_KEY: &[u8] = include_bytes!("../../tests/fixtures/other.key");

    #[test]
    fn chain_keeps_file_order() {
        let certs = parse_certificate_chain(CHAIN, Path::new("chain.pem")).expect("parse chain");
        assert_eq!(certs.len(), 2);
        let leaf_subject = certs[0].tbs_certificate.subject.to_string();
        let ca_subject = certs[1].tbs_certificate.subject.to_string();
        assert!(leaf_subject.contains("Test RA"), "{leaf_subject}");
        assert!(ca_subject.contains("Test CA"), "{ca_subject}");
    }

    #[test]
    fn matching_key_passes_cross_check() {
        let certs = parse_certificate_chain(CHAIN, Path::new("chain.pem")).expect("parse chain");
        let key = parse_rsa_private_key(RA_KEY, Path::new("ra.key")).expect("parse key");
        ensure_key_matches(&certs[0], &key).expect("key matches leaf");
        assert_eq!(key.e(), &rsa::BigUint::from(65537u32));
    }

    #[test]
    fn mismatched_key_fails_cross_check() {
        let certs = parse_certificate_chain(CHAIN, Path::new("chain.pem")).expect("parse chain");
        let key = parse_rsa_private_key(OTHER_KEY, Path::new("other.key")).expect("parse key");
        let err = ensure_key_matches(&certs[0], &key).expect_err("mismatch");
        assert!(format!("{err}").contains("do not match"));
    }

    #[test]
    fn empty_input_is_pem_decode_failure() {
        let err = parse_certificate_chain(b"", Path::new("empty.pem")).expect_err("empty");
        assert!(matches!(err, PkiError::PemDecode { .. }));
        let err = parse_rsa_private_key(b"", Path::new("empty.key")).expect_err("empty");
        assert!(matches!(err, PkiError::PemDecode { .. }));
    }
}
