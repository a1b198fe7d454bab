use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use super::ScepService;
use crate::Result;

/// Logs every call on the wrapped service with its duration and outcome.
pub struct LoggingService<S> {
    inner: S,
}

impl<S> LoggingService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn record<T>(method: &'static str, started: Instant, result: &Result<T>) {
    let took_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => info!(component = "scep_service", method, took_ms, "call completed"),
        Err(e) => warn!(component = "scep_service", method, took_ms, error = %e, "call failed"),
    }
}

#[async_trait]
impl<S: ScepService> ScepService for LoggingService<S> {
    async fn get_ca_caps(&self) -> Result<Vec<u8>> {
        let started = Instant::now();
        let result = self.inner.get_ca_caps().await;
        record("GetCACaps", started, &result);
        result
    }

    async fn get_ca_cert(&self, message: &str) -> Result<(Vec<u8>, usize)> {
        let started = Instant::now();
        let result = self.inner.get_ca_cert(message).await;
        record("GetCACert", started, &result);
        result
    }

    async fn pki_operation(&self, body: &[u8]) -> Result<Vec<u8>> {
        let started = Instant::now();
        let result = self.inner.pki_operation(body).await;
        record("PKIOperation", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tracing_test::traced_test;

    struct Fixed;

    #[async_trait]
    impl ScepService for Fixed {
        async fn get_ca_caps(&self) -> Result<Vec<u8>> {
            Ok(b"AES".to_vec())
        }

        async fn get_ca_cert(&self, _message: &str) -> Result<(Vec<u8>, usize)> {
            Err(Error::internal("no chain"))
        }

        async fn pki_operation(&self, body: &[u8]) -> Result<Vec<u8>> {
            Ok(body.to_vec())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn passes_results_through_and_logs() {
        let service = LoggingService::new(Fixed);

        assert_eq!(service.get_ca_caps().await.expect("caps"), b"AES");
        assert!(service.get_ca_cert("").await.is_err());
        assert_eq!(service.pki_operation(b"abc").await.expect("echo"), b"abc");

        assert!(logs_contain("GetCACaps"));
        assert!(logs_contain("call failed"));
        assert!(logs_contain("no chain"));
    }
}
