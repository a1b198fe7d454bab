use std::sync::Arc;

use async_trait::async_trait;
use der::Decode;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use tracing::info;
use x509_cert::Certificate;

use super::{AcmeError, CaClient, ObtainForCsrRequest};
use crate::scep::CertificateSource;
use crate::Result;

/// Serves SCEP enrollments from an ACME CA.
pub struct AcmeCertificateSource {
    client: Arc<dyn CaClient>,
}

impl AcmeCertificateSource {
    pub fn new(client: Arc<dyn CaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CertificateSource for AcmeCertificateSource {
    async fn obtain(&self, csr: &[u8]) -> Result<Certificate> {
        let resource = self
            .client
            .obtain_for_csr(ObtainForCsrRequest { csr: csr.to_vec(), bundle: false })
            .await?;

        let certificate = decode_first_certificate(&resource.certificate)?;
        info!(domain = %resource.domain, "Certificate obtained from ACME");
        Ok(certificate)
    }
}

/// Decode the first `CERTIFICATE` block of a PEM response, skipping any
/// other leading blocks. A malformed certificate block is an error.
pub fn decode_first_certificate(pem: &str) -> std::result::Result<Certificate, AcmeError> {
    let der = CertificateDer::pem_slice_iter(pem.as_bytes())
        .next()
        .ok_or_else(|| AcmeError::CertificateParse("no certificate in CA response".to_string()))?
        .map_err(|e| AcmeError::CertificateParse(format!("PEM decode failed: {e}")))?;

    if let Ok((_, parsed)) = x509_parser::parse_x509_certificate(der.as_ref()) {
        info!(
            subject = %parsed.subject(),
            not_after = %parsed.validity().not_after,
            "Issued certificate"
        );
    }

    Certificate::from_der(der.as_ref()).map_err(|e| AcmeError::CertificateParse(e.to_string()))
}
