//! Generic webhook DNS provider
//!
//! ```text
//! POST {url}/records
//! {"domain": "example.com", "record_name": "_acme-challenge",
//!  "record_type": "TXT", "record_value": "...", "ttl": 60}
//! → {"record_id": "unique-id"}
//!
//! DELETE {url}/records/{record_id}?domain={domain}
//! → 200 OK, 204 No Content or 404 Not Found
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DnsProvider, DnsProviderError, DnsResult, CHALLENGE_TTL};

/// Webhook DNS provider for custom integrations
#[derive(Debug)]
pub struct WebhookProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    domain: &'a str,
    record_name: &'a str,
    record_type: &'static str,
    record_value: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    record_id: String,
}

impl WebhookProvider {
    pub fn new(base_url: String, token: Option<String>, timeout: Duration) -> DnsResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            DnsProviderError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn add_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> DnsProviderError {
        if e.is_timeout() {
            DnsProviderError::Timeout { elapsed_secs: self.timeout.as_secs() }
        } else {
            DnsProviderError::ApiRequest(format!("Webhook request failed: {}", e))
        }
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl DnsProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn create_txt_record(
        &self,
        domain: &str,
        record_name: &str,
        record_value: &str,
    ) -> DnsResult<String> {
        debug!(domain = %domain, record_name = %record_name, url = %self.base_url, "Creating TXT record via webhook");

        let body = CreateRecordRequest {
            domain,
            record_name,
            record_type: "TXT",
            record_value,
            ttl: CHALLENGE_TTL,
        };

        let response = self
            .add_auth(self.client.post(format!("{}/records", self.base_url)).json(&body))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if is_auth_failure(status) {
            return Err(DnsProviderError::Authentication(
                "Webhook authentication failed".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsProviderError::RecordCreation {
                record_name: record_name.to_string(),
                message: format!("Webhook returned HTTP {} - {}", status, body),
            });
        }

        let created: CreateRecordResponse =
            response.json().await.map_err(|e| DnsProviderError::RecordCreation {
                record_name: record_name.to_string(),
                message: format!("Failed to parse webhook response: {}", e),
            })?;

        debug!(record_id = %created.record_id, "TXT record created via webhook");
        Ok(created.record_id)
    }

    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> DnsResult<()> {
        debug!(domain = %domain, record_id = %record_id, "Deleting TXT record via webhook");

        let request = self
            .client
            .delete(format!("{}/records/{}", self.base_url, record_id))
            .query(&[("domain", domain)]);

        let response = self
            .add_auth(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if is_auth_failure(status) {
            return Err(DnsProviderError::Authentication(
                "Webhook authentication failed".to_string(),
            ));
        }
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DnsProviderError::RecordDeletion {
            record_id: record_id.to_string(),
            message: format!("Webhook returned HTTP {} - {}", status, body),
        })
    }
}
