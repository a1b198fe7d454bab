use async_trait::async_trait;

use super::ScepService;
use crate::Result;

const RENEWAL: &str = "Renewal";

/// Drop the `Renewal` token from a newline-delimited capability list.
///
/// Other tokens keep their order and line endings.
pub fn without_renewal(caps: &[u8]) -> Vec<u8> {
    let mut filtered = Vec::with_capacity(caps.len());
    for line in caps.split_inclusive(|b| *b == b'\n') {
        let token = line.strip_suffix(b"\n").unwrap_or(line);
        let token = token.strip_suffix(b"\r").unwrap_or(token);
        if token == RENEWAL.as_bytes() {
            continue;
        }
        filtered.extend_from_slice(line);
    }
    filtered
}

/// Hides renewal support, which the bridge cannot honour since every request
/// is a fresh ACME order.
pub struct ServiceWithoutRenewal<S> {
    inner: S,
}

impl<S> ServiceWithoutRenewal<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ScepService> ScepService for ServiceWithoutRenewal<S> {
    async fn get_ca_caps(&self) -> Result<Vec<u8>> {
        let caps = self.inner.get_ca_caps().await?;
        Ok(without_renewal(&caps))
    }

    async fn get_ca_cert(&self, message: &str) -> Result<(Vec<u8>, usize)> {
        self.inner.get_ca_cert(message).await
    }

    async fn pki_operation(&self, body: &[u8]) -> Result<Vec<u8>> {
        self.inner.pki_operation(body).await
    }
}
