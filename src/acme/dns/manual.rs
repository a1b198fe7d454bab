use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use super::{DnsProvider, DnsResult};

/// Provider that only logs the record an operator must create by hand.
///
/// Nothing is published, so validation succeeds only if the record is put in
/// place within the propagation delay.
#[derive(Debug, Default)]
pub struct ManualProvider;

impl ManualProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DnsProvider for ManualProvider {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String> {
        let record_id = Uuid::new_v4().to_string();
        warn!(
            provider = "manual",
            record = %format!("{record_name}.{domain}"),
            value = %record_value,
            record_id = %record_id,
            "Create this TXT record now"
        );
        Ok(record_id)
    }

    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        info!(provider = "manual", domain = %domain, record_id = %record_id, "TXT record may be removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_unique_and_delete_is_a_noop() {
        let provider = ManualProvider::new();
        let first = provider
            .create_txt_record("example.com", "_acme-challenge", "value")
            .await
            .expect("create");
        let second = provider
            .create_txt_record("example.com", "_acme-challenge", "value")
            .await
            .expect("create");

        assert_ne!(first, second);
        provider.delete_txt_record("example.com", &first).await.expect("delete");
    }
}
