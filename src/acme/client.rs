//! ACME client wrapper around instant-acme
//!
//! Orders a certificate for an externally generated CSR, proving control of
//! every name with a DNS-01 challenge published through a [`DnsProvider`].

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn, Instrument};

use super::dns::{challenge_value, normalize_domain, DnsProvider, ACME_CHALLENGE_RECORD};
use super::{AcmeError, CaClient, CertificateResource, ObtainForCsrRequest};
use crate::config::AcmeSettings;
use crate::csr::CertificateRequest;

/// Timeout for challenge validation
const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for issuance after finalization
const ISSUANCE_TIMEOUT: Duration = Duration::from_secs(60);
/// Interval between order status polls
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Allowance for account, order and finalize round trips
const ROUND_TRIP_ALLOWANCE: Duration = Duration::from_secs(30);

/// Longest an order may take end to end with the given propagation delay.
pub fn issuance_budget(propagation_delay: Duration) -> Duration {
    propagation_delay + CHALLENGE_TIMEOUT + ISSUANCE_TIMEOUT + ROUND_TRIP_ALLOWANCE
}

/// A DNS-01 challenge awaiting validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallenge {
    pub domain: String,
    pub key_authorization: String,
}

/// An account able to open certificate orders
#[async_trait]
pub trait AcmeAccount: Send + Sync {
    async fn new_order(&self, identifiers: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError>;
}

/// The CA-side steps of one certificate order
#[async_trait]
pub trait AcmeOrder: Send {
    /// DNS-01 challenges of every authorization that is not yet valid.
    async fn dns_challenges(&mut self) -> Result<Vec<DnsChallenge>, AcmeError>;

    /// Ask the CA to validate every pending challenge.
    async fn set_challenges_ready(&mut self) -> Result<(), AcmeError>;

    /// Poll until the order is ready for finalization.
    async fn wait_ready(&mut self) -> Result<(), AcmeError>;

    /// Submit the CSR and poll for the PEM chain.
    async fn finalize(&mut self, csr: &[u8]) -> Result<String, AcmeError>;
}

/// A published challenge record awaiting cleanup
struct PublishedRecord {
    domain: String,
    record_id: String,
}

/// ACME client bound to one account.
///
/// Every order runs on a tracked task. If the caller gives up, the order is
/// abandoned and its challenge records are still removed; [`AcmeClient::shutdown`]
/// waits for those removals.
#[derive(Clone)]
pub struct AcmeClient {
    account: Arc<dyn AcmeAccount>,
    dns: Arc<dyn DnsProvider>,
    propagation_delay: Duration,
    orders: TaskTracker,
}

impl AcmeClient {
    /// Load the account from `settings.account_path`, registering a new one
    /// when the file does not exist yet.
    pub async fn new(settings: &AcmeSettings, dns: Arc<dyn DnsProvider>) -> Result<Self, AcmeError> {
        let account = load_or_register(settings).await?;
        info!(
            directory = %settings.directory_url,
            dns_provider = dns.name(),
            "ACME account ready"
        );

        Ok(Self::with_account(Arc::new(account), dns, settings.propagation_delay))
    }

    pub fn with_account(
        account: Arc<dyn AcmeAccount>,
        dns: Arc<dyn DnsProvider>,
        propagation_delay: Duration,
    ) -> Self {
        Self { account, dns, propagation_delay, orders: TaskTracker::new() }
    }

    /// Stop taking orders and wait for running ones, including the cleanup
    /// of abandoned orders.
    pub async fn shutdown(&self) {
        self.orders.close();
        if !self.orders.is_empty() {
            info!(orders = self.orders.len(), "Waiting for ACME orders to finish");
        }
        self.orders.wait().await;
    }

    /// Publish a TXT record for every pending challenge.
    async fn publish_challenges(
        &self,
        order: &mut dyn AcmeOrder,
        published: &mut Vec<PublishedRecord>,
    ) -> Result<(), AcmeError> {
        for challenge in order.dns_challenges().await? {
            let value = challenge_value(&challenge.key_authorization);
            let zone = normalize_domain(&challenge.domain).to_string();
            let record_id = self.dns.create_txt_record(&zone, ACME_CHALLENGE_RECORD, &value).await?;
            debug!(domain = %challenge.domain, record_id = %record_id, "DNS-01 record published");
            published.push(PublishedRecord { domain: zone, record_id });
        }
        Ok(())
    }

    async fn run_order(
        &self,
        identifiers: &[String],
        csr: &[u8],
        published: &mut Vec<PublishedRecord>,
    ) -> Result<String, AcmeError> {
        info!("Creating certificate order");
        let mut order = self.account.new_order(identifiers).await?;
        self.publish_challenges(order.as_mut(), published).await?;

        if !published.is_empty() {
            debug!(delay_secs = self.propagation_delay.as_secs(), "Waiting for DNS propagation");
            tokio::time::sleep(self.propagation_delay).await;
            order.set_challenges_ready().await?;
        }

        order.wait_ready().await?;
        order.finalize(csr).await
    }

    async fn cleanup(&self, published: &[PublishedRecord]) {
        let deletions = published.iter().map(|record| async move {
            if let Err(e) = self.dns.delete_txt_record(&record.domain, &record.record_id).await {
                warn!(
                    domain = %record.domain,
                    record_id = %record.record_id,
                    error = %e,
                    "Failed to remove DNS-01 record"
                );
            }
        });
        join_all(deletions).await;
    }
}

#[async_trait]
impl CaClient for AcmeClient {
    async fn obtain_for_csr(
        &self,
        request: ObtainForCsrRequest,
    ) -> Result<CertificateResource, AcmeError> {
        let parsed = CertificateRequest::from_der(&request.csr)
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;
        let names = parsed.identifiers();
        let Some(domain) = names.first().cloned() else {
            return Err(AcmeError::NoIdentifiers);
        };
        if self.orders.is_closed() {
            return Err(AcmeError::OrderCreation("client is shutting down".to_string()));
        }

        let span = crate::acme_span!(names);
        let abandoned = CancellationToken::new();
        let _abandon_on_drop = abandoned.clone().drop_guard();
        let client = self.clone();
        let csr = request.csr;

        let order = self.orders.spawn(
            async move {
                let mut published = Vec::new();
                let outcome = tokio::select! {
                    outcome = client.run_order(&names, &csr, &mut published) => outcome,
                    _ = abandoned.cancelled() => {
                        warn!("Caller went away, abandoning order");
                        Err(AcmeError::Abandoned)
                    }
                };
                client.cleanup(&published).await;
                outcome
            }
            .instrument(span),
        );

        let chain = order
            .await
            .map_err(|e| AcmeError::OrderCreation(format!("order task failed: {e}")))??;
        let certificate = if request.bundle { chain } else { leaf_only(&chain) };
        info!(domain = %domain, "Certificate issued");
        Ok(CertificateResource { domain, certificate })
    }
}

#[async_trait]
impl AcmeAccount for Account {
    async fn new_order(&self, identifiers: &[String]) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let identifiers: Vec<Identifier> = identifiers.iter().cloned().map(Identifier::Dns).collect();
        let order = Account::new_order(self, &NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;
        Ok(Box::new(order))
    }
}

#[async_trait]
impl AcmeOrder for Order {
    async fn dns_challenges(&mut self) -> Result<Vec<DnsChallenge>, AcmeError> {
        let mut challenges = Vec::new();
        let mut authorizations = self.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| {
                AcmeError::OrderCreation(format!("Failed to get authorization: {}", e))
            })?;

            let domain = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };

            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "Authorization already valid");
                continue;
            }

            let challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| AcmeError::NoDns01Challenge(domain.clone()))?;
            let key_authorization = challenge.key_authorization().as_str().to_string();
            challenges.push(DnsChallenge { domain, key_authorization });
        }
        Ok(challenges)
    }

    async fn set_challenges_ready(&mut self) -> Result<(), AcmeError> {
        let mut authorizations = self.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| {
                AcmeError::OrderCreation(format!("Failed to get authorization: {}", e))
            })?;

            if authz.status != AuthorizationStatus::Pending {
                continue;
            }

            let domain = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.clone(),
                _ => continue,
            };
            let Some(mut challenge) = authz.challenge(ChallengeType::Dns01) else {
                return Err(AcmeError::NoDns01Challenge(domain));
            };
            challenge.set_ready().await.map_err(|e| AcmeError::ChallengeValidation {
                domain,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn wait_ready(&mut self) -> Result<(), AcmeError> {
        let deadline = tokio::time::Instant::now() + CHALLENGE_TIMEOUT;
        loop {
            let state = self
                .refresh()
                .await
                .map_err(|e| AcmeError::OrderCreation(format!("Failed to refresh order: {}", e)))?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => {
                    return Err(AcmeError::ChallengeValidation {
                        domain: "order".to_string(),
                        message: "order became invalid".to_string(),
                    })
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(AcmeError::Timeout(
                            "waiting for order to become ready".to_string(),
                        ));
                    }
                    trace!(status = ?state.status, "Order not ready yet");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn finalize(&mut self, csr: &[u8]) -> Result<String, AcmeError> {
        self.finalize_csr(csr)
            .await
            .map_err(|e| AcmeError::Finalization(format!("Failed to finalize order: {}", e)))?;

        let deadline = tokio::time::Instant::now() + ISSUANCE_TIMEOUT;
        loop {
            let state = self
                .refresh()
                .await
                .map_err(|e| AcmeError::Finalization(format!("Failed to refresh order: {}", e)))?;

            match state.status {
                OrderStatus::Valid => {
                    let chain = self.certificate().await.map_err(|e| {
                        AcmeError::Finalization(format!("Failed to get certificate: {}", e))
                    })?;
                    return chain.ok_or_else(|| {
                        AcmeError::Finalization("No certificate in response".to_string())
                    });
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::Finalization("Order became invalid".to_string()));
                }
                _ => {
                    if tokio::time::Instant::now() > deadline {
                        return Err(AcmeError::Timeout("waiting for certificate".to_string()));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

/// The first PEM certificate of `chain`.
fn leaf_only(chain: &str) -> String {
    const END: &str = "-----END CERTIFICATE-----";
    match chain.find(END) {
        Some(end) => format!("{}\n", &chain[..end + END.len()]),
        None => chain.to_string(),
    }
}

async fn load_or_register(settings: &AcmeSettings) -> Result<Account, AcmeError> {
    let path = settings.account_path.as_path();
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            info!(path = %path.display(), "Loading existing ACME account");
            let credentials: AccountCredentials = serde_json::from_str(&json).map_err(|e| {
                AcmeError::AccountCreation(format!("Failed to deserialize credentials: {}", e))
            })?;
            Account::builder()
                .map_err(|e| AcmeError::AccountCreation(e.to_string()))?
                .from_credentials(credentials)
                .await
                .map_err(|e| AcmeError::AccountCreation(e.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(email = %settings.email, directory = %settings.directory_url, "Registering new ACME account");
            let (account, credentials) = Account::builder()
                .map_err(|e| AcmeError::AccountCreation(e.to_string()))?
                .create(
                    &NewAccount {
                        contact: &[&format!("mailto:{}", settings.email)],
                        terms_of_service_agreed: true,
                        only_return_existing: false,
                    },
                    settings.directory_url.clone(),
                    None,
                )
                .await
                .map_err(|e| AcmeError::AccountCreation(e.to_string()))?;

            let json = serde_json::to_string_pretty(&credentials).map_err(|e| {
                AcmeError::AccountCreation(format!("Failed to serialize credentials: {}", e))
            })?;
            write_private(path, json.as_bytes())
                .map_err(|source| AcmeError::Credentials { path: path.to_path_buf(), source })?;
            Ok(account)
        }
        Err(source) => Err(AcmeError::Credentials { path: path.to_path_buf(), source }),
    }
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n\
                         -----BEGIN CERTIFICATE-----\nBBBB\n-----END CERTIFICATE-----\n";

    #[test]
    fn leaf_only_keeps_first_block() {
        assert_eq!(
            leaf_only(CHAIN),
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n"
        );
    }

    #[test]
    fn leaf_only_without_marker_is_unchanged() {
        assert_eq!(leaf_only("garbage"), "garbage");
    }

    #[cfg(unix)]
    #[test]
    fn credentials_are_written_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("account.json");
        write_private(&path, b"{}").expect("write");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read(&path).expect("read"), b"{}");
    }
}
