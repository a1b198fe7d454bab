//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rsa::RsaPrivateKey;
use x509_cert::Certificate;

use scep2acme::depot::FileDepot;
use scep2acme::scep::message::{
    new_nonce, seal_envelope, ContentCipher, DigestAlgorithm, MessageType, OutgoingMessage,
};
use scep2acme::scep::{CertificateSource, CsrVerifier, Depot, ScepEngine};
use scep2acme::utils::certificates::{parse_certificate_chain, parse_rsa_private_key};
use scep2acme::whitelist::CsrPasswordVerifier;
use scep2acme::{Error, Result};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

pub fn read_fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap_or_else(|e| panic!("reading fixture {name}: {e}"))
}

fn identity(cert: &str, key: &str) -> (Certificate, RsaPrivateKey) {
    let certs = parse_certificate_chain(&read_fixture(cert), &fixture(cert)).expect("certificate");
    let key = parse_rsa_private_key(&read_fixture(key), &fixture(key)).expect("key");
    (certs[0].clone(), key)
}

/// The RA certificate and key
pub fn ra_identity() -> (Certificate, RsaPrivateKey) {
    identity("chain.pem", "ra.key")
}

/// The self-signed certificate and key of the enrolling device
pub fn client_identity() -> (Certificate, RsaPrivateKey) {
    identity("client.pem", "client.key")
}

/// The leaf a fake CA hands out
pub fn issued_certificate() -> Certificate {
    let pem = read_fixture("issued.pem");
    parse_certificate_chain(&pem, &fixture("issued.pem")).expect("issued")[0].clone()
}

pub fn file_depot() -> FileDepot {
    FileDepot::new(fixture("chain.pem"), fixture("ra.key"))
}

pub fn whitelist_verifier() -> CsrPasswordVerifier {
    CsrPasswordVerifier::from_file(&fixture("whitelist.yaml")).expect("whitelist")
}

/// A signed PKIMessage from the test client carrying `csr` for the RA.
pub fn pki_request(
    message_type: MessageType,
    csr: &[u8],
    cipher: ContentCipher,
    transaction_id: &str,
) -> (Vec<u8>, Vec<u8>) {
    let (ra_cert, _) = ra_identity();
    let (client_cert, client_key) = client_identity();
    let envelope = seal_envelope(csr, &ra_cert, cipher).expect("seal");
    let nonce = new_nonce();
    let message = OutgoingMessage {
        message_type,
        transaction_id,
        sender_nonce: &nonce,
        recipient_nonce: None,
        pki_status: None,
        fail_info: None,
        envelope: Some(&envelope),
    }
    .sign(&client_cert, &client_key, DigestAlgorithm::Sha256)
    .expect("sign");
    (message, nonce)
}

/// Certificate source returning a fixed certificate, or failing
pub struct StubSource {
    certificate: Option<Certificate>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<u8>>>,
}

impl StubSource {
    pub fn issuing(certificate: Certificate) -> Self {
        Self { certificate: Some(certificate), calls: AtomicUsize::new(0), requests: Mutex::default() }
    }

    pub fn failing() -> Self {
        Self { certificate: None, calls: AtomicUsize::new(0), requests: Mutex::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CertificateSource for StubSource {
    async fn obtain(&self, csr: &[u8]) -> Result<Certificate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock").push(csr.to_vec());
        self.certificate.clone().ok_or_else(|| Error::internal("CA unavailable"))
    }
}

/// Verifier that fails to evaluate every request
pub struct BrokenVerifier;

impl CsrVerifier for BrokenVerifier {
    fn verify(&self, _csr: &[u8]) -> Result<bool> {
        Err(Error::internal("verifier unavailable"))
    }
}

/// Engine over the fixture depot and whitelist
pub fn engine(source: Arc<StubSource>) -> ScepEngine {
    engine_with(Arc::new(file_depot()), Arc::new(whitelist_verifier()), source)
}

pub fn engine_with(
    depot: Arc<dyn Depot>,
    verifier: Arc<dyn CsrVerifier>,
    source: Arc<StubSource>,
) -> ScepEngine {
    ScepEngine::new(depot, verifier, source)
}
