mod support;

use proptest::prelude::*;
use scep2acme::scep::CsrVerifier;
use scep2acme::whitelist::{AuthorizationTable, Decision};

use support::{read_fixture, whitelist_verifier};

const TABLE: &str = r#"
password1: example.com
password2:
  - subdomain1.example.com
  - subdomain2.example.com
"#;

fn table() -> AuthorizationTable {
    AuthorizationTable::from_yaml_str(TABLE).expect("table")
}

fn verify(fixture: &str) -> bool {
    whitelist_verifier().verify(&read_fixture(fixture)).expect("verify")
}

#[test]
fn single_covered_name_is_allowed() {
    assert!(verify("csr_password2_sub1.der"));
    assert!(verify("csr_password1_example.der"));
}

#[test]
fn one_uncovered_name_rejects_the_request() {
    // CN subdomain1, SANs subdomain2 and example.com; the last is not listed
    assert!(!verify("csr_password2_mixed.der"));
}

#[test]
fn names_are_checked_against_the_presented_secret_only() {
    assert!(verify("csr_testpass_test.der"));
    assert!(!verify("csr_testpass_other.der"));
}

#[test]
fn request_with_sans_and_no_cn_is_checked_on_sans() {
    assert!(verify("csr_multipass_san_only.der"));
}

#[test]
fn missing_or_unknown_secret_is_rejected() {
    assert!(!verify("csr_no_password.der"));
    assert!(!verify("csr_unknown_secret.der"));
}

#[test]
fn unparseable_request_is_an_error() {
    assert!(whitelist_verifier().verify(b"not a csr").is_err());
}

#[test]
fn empty_name_set_is_never_allowed() {
    assert_eq!(table().check("password1", std::iter::empty()), Decision::NoNames);
}

#[test]
fn rejection_names_the_uncovered_host() {
    let decision = table().check(
        "password2",
        ["subdomain1.example.com", "subdomain2.example.com", "example.com"],
    );
    assert_eq!(decision, Decision::Rejected { name: "example.com".to_string() });
}

fn hostname() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("example.com".to_string()),
        Just("subdomain1.example.com".to_string()),
        Just("subdomain2.example.com".to_string()),
        "[a-z]{1,8}\\.example\\.(com|org)",
    ]
}

proptest! {
    #[test]
    fn allowed_iff_every_name_is_covered(
        secret in prop_oneof![Just("password1"), Just("password2")],
        names in prop::collection::vec(hostname(), 0..6),
    ) {
        let table = table();
        let covered = names.iter().all(|name| table.permits(secret, name));
        let decision = table.check(secret, names.iter().map(String::as_str));

        prop_assert_eq!(decision.is_allowed(), !names.is_empty() && covered);
    }

    #[test]
    fn unknown_secret_rejects_every_name(
        secret in "[a-z0-9]{1,16}",
        names in prop::collection::vec(hostname(), 1..6),
    ) {
        prop_assume!(secret != "password1" && secret != "password2");
        let decision = table().check(&secret, names.iter().map(String::as_str));
        prop_assert!(!decision.is_allowed());
    }
}
