//! # Certificate Signing Requests
//!
//! Extraction of the fields the bridge cares about from a PKCS#10 request:
//! the subject common name, the DNS subject alternative names and the SCEP
//! challenge password.

use der::asn1::ObjectIdentifier;
use der::{Any, Decode, Encode, Tag, Tagged};
use thiserror::Error;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::ext::Extensions;
use x509_cert::name::Name;
use x509_cert::request::CertReq;

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_CHALLENGE_PASSWORD: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");
const OID_EXTENSION_REQUEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");
const OID_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// Errors raised while reading a certificate signing request
#[derive(Debug, Error)]
pub enum CsrError {
    /// The request is not valid DER PKCS#10
    #[error("parsing certificate request: {0}")]
    Malformed(#[from] der::Error),

    /// An attribute or name carries a value that is not a string type
    #[error("certificate request field {field} is not a string")]
    NotAString { field: &'static str },
}

/// The parts of a signing request used for authorization and ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub challenge_password: Option<String>,
}

impl CertificateRequest {
    /// Parse a DER-encoded PKCS#10 request.
    pub fn from_der(csr: &[u8]) -> Result<Self, CsrError> {
        let request = CertReq::from_der(csr)?;
        let info = &request.info;

        let common_name = subject_common_name(&info.subject)?;
        let mut challenge_password = None;
        let mut dns_names = Vec::new();

        for attribute in info.attributes.iter() {
            if attribute.oid == OID_CHALLENGE_PASSWORD {
                if let Some(value) = attribute.values.iter().next() {
                    challenge_password = Some(directory_string(value, "challengePassword")?);
                }
            } else if attribute.oid == OID_EXTENSION_REQUEST {
                for value in attribute.values.iter() {
                    let extensions = Extensions::from_der(&value.to_der()?)?;
                    for extension in extensions.iter().filter(|e| e.extn_id == OID_SUBJECT_ALT_NAME)
                    {
                        let san = SubjectAltName::from_der(extension.extn_value.as_bytes())?;
                        for name in san.0 {
                            if let GeneralName::DnsName(dns) = name {
                                dns_names.push(dns.to_string());
                            }
                        }
                    }
                }
            }
        }

        Ok(Self { common_name, dns_names, challenge_password })
    }

    /// The names a certificate for this request would cover: the common name
    /// (when present) followed by every DNS SAN.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.common_name.iter().map(String::as_str).chain(self.dns_names.iter().map(String::as_str))
    }

    /// Distinct names in first-seen order, as ACME order identifiers.
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = Vec::new();
        for name in self.names() {
            if !identifiers.iter().any(|existing| existing.eq_ignore_ascii_case(name)) {
                identifiers.push(name.to_string());
            }
        }
        identifiers
    }
}

/// First common name in `subject`, if any.
pub fn subject_common_name(subject: &Name) -> Result<Option<String>, CsrError> {
    for rdn in subject.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid == OID_COMMON_NAME {
                return directory_string(&atv.value, "commonName").map(Some);
            }
        }
    }
    Ok(None)
}

fn directory_string(value: &Any, field: &'static str) -> Result<String, CsrError> {
    match value.tag() {
        Tag::Utf8String | Tag::PrintableString | Tag::Ia5String | Tag::TeletexString => {
            std::str::from_utf8(value.value())
                .map(str::to_owned)
                .map_err(|_| CsrError::NotAString { field })
        }
        _ => Err(CsrError::NotAString { field }),
    }
}
