use std::sync::Arc;

use async_trait::async_trait;
use der::Encode;
use rsa::RsaPrivateKey;
use tracing::{error, info, warn};
use x509_cert::Certificate;

use super::message::{
    degenerate_certificates, new_nonce, seal_envelope, DigestAlgorithm, FailInfo, MessageType,
    OutgoingMessage, PkiMessage, PkiStatus,
};
use super::{CertificateSource, CsrVerifier, Depot, ScepError, ScepService};
use crate::csr::subject_common_name;
use crate::{Error, Result};

/// Capabilities advertised by the engine, before any filtering
pub const CAPABILITIES: &[&str] =
    &["Renewal", "SHA-1", "SHA-256", "AES", "DES3", "SCEPStandard", "POSTPKIOperation"];

enum Reply {
    Success { envelope: Vec<u8> },
    Failure(FailInfo),
}

/// SCEP server built from a depot, a CSR verifier and a certificate source
#[derive(Clone)]
pub struct ScepEngine {
    depot: Arc<dyn Depot>,
    verifier: Arc<dyn CsrVerifier>,
    source: Arc<dyn CertificateSource>,
}

impl ScepEngine {
    pub fn new(
        depot: Arc<dyn Depot>,
        verifier: Arc<dyn CsrVerifier>,
        source: Arc<dyn CertificateSource>,
    ) -> Self {
        Self { depot, verifier, source }
    }

    fn identity(&self) -> Result<(Certificate, RsaPrivateKey)> {
        let (mut chain, key) = self.depot.ca()?;
        if chain.is_empty() {
            return Err(Error::internal("depot returned an empty chain"));
        }
        Ok((chain.swap_remove(0), key))
    }

    async fn enroll(
        &self,
        request: &PkiMessage,
        ra_cert: &Certificate,
        ra_key: &RsaPrivateKey,
    ) -> Result<Reply> {
        let (csr, cipher) = request.open_envelope(ra_cert, ra_key)?;

        if !self.verifier.verify(&csr)? {
            return Ok(Reply::Failure(FailInfo::BadRequest));
        }

        let cert = match self.source.obtain(&csr).await {
            Ok(cert) => cert,
            Err(e) => {
                error!(
                    component = "scep_engine",
                    transaction_id = %request.transaction_id,
                    error = %e,
                    "certificate issuance failed"
                );
                return Ok(Reply::Failure(FailInfo::BadRequest));
            }
        };

        let name = subject_common_name(&cert.tbs_certificate.subject)
            .ok()
            .flatten()
            .unwrap_or_default();
        self.depot.put(&name, &cert)?;

        let bundle = degenerate_certificates(std::slice::from_ref(&cert))?;
        let envelope = seal_envelope(&bundle, &request.signer, cipher)?;
        info!(
            component = "scep_engine",
            transaction_id = %request.transaction_id,
            name = %name,
            "certificate issued"
        );
        Ok(Reply::Success { envelope })
    }
}

#[async_trait]
impl ScepService for ScepEngine {
    async fn get_ca_caps(&self) -> Result<Vec<u8>> {
        Ok(CAPABILITIES.join("\n").into_bytes())
    }

    async fn get_ca_cert(&self, _message: &str) -> Result<(Vec<u8>, usize)> {
        let (chain, _) = self.depot.ca()?;
        match chain.as_slice() {
            [] => Err(Error::internal("depot returned an empty chain")),
            [single] => Ok((single.to_der().map_err(ScepError::from)?, 1)),
            many => Ok((degenerate_certificates(many)?, many.len())),
        }
    }

    async fn pki_operation(&self, body: &[u8]) -> Result<Vec<u8>> {
        let (ra_cert, ra_key) = self.identity()?;
        let request = PkiMessage::decode(body)?;

        let reply = match request.message_type {
            MessageType::PkcsReq => self.enroll(&request, &ra_cert, &ra_key).await?,
            other => {
                warn!(
                    component = "scep_engine",
                    transaction_id = %request.transaction_id,
                    message_type = other.code(),
                    "unsupported message type"
                );
                Reply::Failure(FailInfo::BadRequest)
            }
        };

        let sender_nonce = new_nonce();
        let (pki_status, fail_info, envelope) = match &reply {
            Reply::Success { envelope } => (PkiStatus::Success, None, Some(envelope.as_slice())),
            Reply::Failure(info) => (PkiStatus::Failure, Some(*info), None),
        };

        let response = OutgoingMessage {
            message_type: MessageType::CertRep,
            transaction_id: &request.transaction_id,
            sender_nonce: &sender_nonce,
            recipient_nonce: Some(&request.sender_nonce),
            pki_status: Some(pki_status),
            fail_info,
            envelope,
        }
        .sign(&ra_cert, &ra_key, DigestAlgorithm::Sha256)?;

        Ok(response)
    }
}
