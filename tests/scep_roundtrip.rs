mod support;

use std::sync::Arc;

use der::Encode;
use scep2acme::depot::FileDepot;
use scep2acme::scep::message::{
    parse_degenerate_certificates, ContentCipher, DigestAlgorithm, FailInfo, MessageType,
    PkiMessage, PkiStatus,
};
use scep2acme::scep::{ScepEngine, ScepService};

use support::{
    client_identity, engine, engine_with, file_depot, fixture, issued_certificate, pki_request,
    ra_identity, read_fixture, BrokenVerifier, StubSource,
};

async fn enroll(engine: &ScepEngine, csr: &str, cipher: ContentCipher) -> (PkiMessage, Vec<u8>) {
    let (request, nonce) = pki_request(MessageType::PkcsReq, &read_fixture(csr), cipher, "txn-42");
    let reply = engine.pki_operation(&request).await.expect("pki operation");
    (PkiMessage::decode(&reply).expect("decode reply"), nonce)
}

#[tokio::test]
async fn approved_request_returns_the_issued_certificate() {
    let source = Arc::new(StubSource::issuing(issued_certificate()));
    let engine = engine(source.clone());

    let (reply, nonce) = enroll(&engine, "csr_testpass_test.der", ContentCipher::Aes256Cbc).await;

    assert_eq!(reply.message_type, MessageType::CertRep);
    assert_eq!(reply.pki_status, Some(PkiStatus::Success));
    assert_eq!(reply.fail_info, None);
    assert_eq!(reply.transaction_id, "txn-42");
    assert_eq!(reply.recipient_nonce.as_deref(), Some(nonce.as_slice()));
    assert_ne!(reply.sender_nonce, nonce);
    assert_eq!(reply.digest, DigestAlgorithm::Sha256);
    assert_eq!(reply.signer, ra_identity().0);

    let (client_cert, client_key) = client_identity();
    let (bundle, cipher) = reply.open_envelope(&client_cert, &client_key).expect("open reply");
    assert_eq!(cipher, ContentCipher::Aes256Cbc);
    assert_eq!(parse_degenerate_certificates(&bundle).expect("bundle"), vec![issued_certificate()]);

    assert_eq!(source.calls(), 1);
    assert_eq!(source.requests(), vec![read_fixture("csr_testpass_test.der")]);
}

#[tokio::test]
async fn reply_is_encrypted_with_the_request_cipher() {
    let engine = engine(Arc::new(StubSource::issuing(issued_certificate())));

    let (reply, _) = enroll(&engine, "csr_testpass_test.der", ContentCipher::DesEde3Cbc).await;

    let (client_cert, client_key) = client_identity();
    let (_, cipher) = reply.open_envelope(&client_cert, &client_key).expect("open reply");
    assert_eq!(cipher, ContentCipher::DesEde3Cbc);
}

#[tokio::test]
async fn unauthorized_request_is_rejected_without_issuance() {
    let source = Arc::new(StubSource::issuing(issued_certificate()));
    let engine = engine(source.clone());

    let (reply, _) = enroll(&engine, "csr_testpass_other.der", ContentCipher::Aes128Cbc).await;

    assert_eq!(reply.pki_status, Some(PkiStatus::Failure));
    assert_eq!(reply.fail_info, Some(FailInfo::BadRequest));
    assert!(reply.envelope.is_none());
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn verifier_failure_fails_the_operation() {
    let source = Arc::new(StubSource::issuing(issued_certificate()));
    let engine = engine_with(Arc::new(file_depot()), Arc::new(BrokenVerifier), source.clone());

    let (request, _) = pki_request(
        MessageType::PkcsReq,
        &read_fixture("csr_testpass_test.der"),
        ContentCipher::Aes256Cbc,
        "txn-broken",
    );
    let err = engine.pki_operation(&request).await.unwrap_err();

    assert!(err.to_string().contains("verifier unavailable"));
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn issuance_failure_becomes_a_failure_reply() {
    let source = Arc::new(StubSource::failing());
    let engine = engine(source.clone());

    let (reply, _) = enroll(&engine, "csr_testpass_test.der", ContentCipher::Aes256Cbc).await;

    assert_eq!(reply.pki_status, Some(PkiStatus::Failure));
    assert_eq!(reply.fail_info, Some(FailInfo::BadRequest));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn other_message_types_are_refused() {
    let source = Arc::new(StubSource::issuing(issued_certificate()));
    let engine = engine(source.clone());

    let (request, _) = pki_request(
        MessageType::GetCert,
        &read_fixture("csr_testpass_test.der"),
        ContentCipher::Aes256Cbc,
        "txn-getcert",
    );
    let reply = PkiMessage::decode(&engine.pki_operation(&request).await.expect("reply"))
        .expect("decode");

    assert_eq!(reply.pki_status, Some(PkiStatus::Failure));
    assert_eq!(reply.fail_info, Some(FailInfo::BadRequest));
    assert_eq!(reply.transaction_id, "txn-getcert");
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn undecodable_message_is_an_error() {
    let engine = engine(Arc::new(StubSource::issuing(issued_certificate())));
    assert!(engine.pki_operation(b"definitely not DER").await.is_err());
}

#[tokio::test]
async fn ca_cert_with_chain_is_a_degenerate_bundle() {
    let engine = engine(Arc::new(StubSource::issuing(issued_certificate())));

    let (body, count) = engine.get_ca_cert("").await.expect("ca cert");
    assert_eq!(count, 2);

    let certs = parse_degenerate_certificates(&body).expect("bundle");
    assert_eq!(certs.len(), 2);
    assert_eq!(certs[0], ra_identity().0, "RA certificate comes first, as in the chain file");
}

#[tokio::test]
async fn ca_cert_with_single_certificate_is_raw_der() {
    let depot = FileDepot::new(fixture("ra.pem"), fixture("ra.key"));
    let engine = engine_with(
        Arc::new(depot),
        Arc::new(support::whitelist_verifier()),
        Arc::new(StubSource::issuing(issued_certificate())),
    );

    let (body, count) = engine.get_ca_cert("ignored").await.expect("ca cert");
    assert_eq!(count, 1);
    assert_eq!(body, ra_identity().0.to_der().expect("der"));
}
