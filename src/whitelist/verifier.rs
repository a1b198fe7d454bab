use std::path::Path;

use tracing::{info, warn};

use super::{AuthorizationTable, Decision, WhitelistError};
use crate::csr::CertificateRequest;
use crate::scep::CsrVerifier;
use crate::Result;

/// SCEP CSR verifier that authorizes requests by challenge password.
#[derive(Debug, Clone)]
pub struct CsrPasswordVerifier {
    table: AuthorizationTable,
}

impl CsrPasswordVerifier {
    pub fn new(table: AuthorizationTable) -> Self {
        Self { table }
    }

    /// Build from a whitelist file. Any malformed entry fails the whole load.
    pub fn from_file(path: &Path) -> std::result::Result<Self, WhitelistError> {
        let table = AuthorizationTable::load(path)?;
        info!(path = %path.display(), secrets = table.len(), "Loaded hostname whitelist");
        Ok(Self::new(table))
    }

    pub fn table(&self) -> &AuthorizationTable {
        &self.table
    }
}

impl CsrVerifier for CsrPasswordVerifier {
    fn verify(&self, csr: &[u8]) -> Result<bool> {
        let request = CertificateRequest::from_der(csr)?;

        let Some(secret) = request.challenge_password.as_deref() else {
            warn!(component = "csr_verifier", "certificate request carries no challenge password");
            return Ok(false);
        };

        match self.table.authorize(secret, &request) {
            Decision::Allowed => {
                info!(
                    component = "csr_verifier",
                    common_name = ?request.common_name,
                    dns_names = ?request.dns_names,
                    "certificate request accepted"
                );
                Ok(true)
            }
            Decision::Rejected { name } => {
                warn!(component = "csr_verifier", name = %name, "name not allowed");
                Ok(false)
            }
            Decision::NoNames => {
                warn!(component = "csr_verifier", "certificate request names no hosts");
                Ok(false)
            }
        }
    }
}
