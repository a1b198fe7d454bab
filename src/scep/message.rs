//! SCEP PKIMessage codec.
//!
//! A PKIMessage is a CMS `SignedData` whose signed attributes carry the SCEP
//! transaction fields and whose content, when present, is a CMS
//! `EnvelopedData` (the pkcsPKIEnvelope) encrypted to the other party.

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::enveloped_data::{
    EncryptedContentInfo, EnvelopedData, KeyTransRecipientInfo, RecipientIdentifier,
    RecipientInfo, RecipientInfos,
};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use der::asn1::{ObjectIdentifier, OctetString, SetOfVec};
use der::{
    Any, Decode, DecodeValue, Encode, EncodeValue, FixedTag, Header, Length, Reader, Tag,
    TagNumber, Tagged, Writer,
};
use rand::RngCore;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey};
use sha2::Digest;
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use super::ScepError;
use crate::utils::certificates::rsa_public_key;

const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_ENVELOPED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");
const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

const ID_MESSAGE_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.2");
const ID_PKI_STATUS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.3");
const ID_FAIL_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.4");
const ID_SENDER_NONCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.5");
const ID_RECIPIENT_NONCE: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.6");
const ID_TRANSACTION_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.7");

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");
const AES128_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.2");
const AES192_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.22");
const AES256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");
const DES_EDE3_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.3.7");

/// Length of the nonces this codec generates
pub const NONCE_LEN: usize = 16;

/// SCEP messageType values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    CertRep,
    RenewalReq,
    PkcsReq,
    CertPoll,
    GetCert,
    GetCrl,
}

impl MessageType {
    pub fn code(self) -> &'static str {
        match self {
            MessageType::CertRep => "3",
            MessageType::RenewalReq => "17",
            MessageType::PkcsReq => "19",
            MessageType::CertPoll => "20",
            MessageType::GetCert => "21",
            MessageType::GetCrl => "22",
        }
    }

    fn from_code(code: &str) -> Result<Self, ScepError> {
        match code {
            "3" => Ok(MessageType::CertRep),
            "17" => Ok(MessageType::RenewalReq),
            "19" => Ok(MessageType::PkcsReq),
            "20" => Ok(MessageType::CertPoll),
            "21" => Ok(MessageType::GetCert),
            "22" => Ok(MessageType::GetCrl),
            other => Err(ScepError::UnknownMessageType(other.to_string())),
        }
    }
}

/// SCEP pkiStatus values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    Success,
    Failure,
    Pending,
}

impl PkiStatus {
    fn code(self) -> &'static str {
        match self {
            PkiStatus::Success => "0",
            PkiStatus::Failure => "2",
            PkiStatus::Pending => "3",
        }
    }

    fn from_code(code: &str) -> Result<Self, ScepError> {
        match code {
            "0" => Ok(PkiStatus::Success),
            "2" => Ok(PkiStatus::Failure),
            "3" => Ok(PkiStatus::Pending),
            _ => Err(ScepError::InvalidAttribute("pkiStatus")),
        }
    }
}

/// SCEP failInfo values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailInfo {
    BadAlg,
    BadMessageCheck,
    BadRequest,
    BadTime,
    BadCertId,
}

impl FailInfo {
    fn code(self) -> &'static str {
        match self {
            FailInfo::BadAlg => "0",
            FailInfo::BadMessageCheck => "1",
            FailInfo::BadRequest => "2",
            FailInfo::BadTime => "3",
            FailInfo::BadCertId => "4",
        }
    }

    fn from_code(code: &str) -> Result<Self, ScepError> {
        match code {
            "0" => Ok(FailInfo::BadAlg),
            "1" => Ok(FailInfo::BadMessageCheck),
            "2" => Ok(FailInfo::BadRequest),
            "3" => Ok(FailInfo::BadTime),
            "4" => Ok(FailInfo::BadCertId),
            _ => Err(ScepError::InvalidAttribute("failInfo")),
        }
    }
}

/// Digest used for the signer's message digest and signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    fn from_oid(oid: &ObjectIdentifier) -> Result<Self, ScepError> {
        match *oid {
            SHA1 => Ok(DigestAlgorithm::Sha1),
            SHA256 => Ok(DigestAlgorithm::Sha256),
            SHA512 => Ok(DigestAlgorithm::Sha512),
            other => Err(ScepError::UnsupportedDigest(other.to_string())),
        }
    }

    fn oid(self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => SHA1,
            DigestAlgorithm::Sha256 => SHA256,
            DigestAlgorithm::Sha512 => SHA512,
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    fn scheme(self) -> Pkcs1v15Sign {
        match self {
            DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        }
    }

    fn identifier(self) -> AlgorithmIdentifierOwned {
        AlgorithmIdentifierOwned { oid: self.oid(), parameters: None }
    }
}

/// Content-encryption algorithm of a pkcsPKIEnvelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    DesEde3Cbc,
}

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type TdesCbcEnc = cbc::Encryptor<des::TdesEde3>;
type TdesCbcDec = cbc::Decryptor<des::TdesEde3>;

impl ContentCipher {
    fn from_oid(oid: &ObjectIdentifier) -> Result<Self, ScepError> {
        match *oid {
            AES128_CBC => Ok(ContentCipher::Aes128Cbc),
            AES192_CBC => Ok(ContentCipher::Aes192Cbc),
            AES256_CBC => Ok(ContentCipher::Aes256Cbc),
            DES_EDE3_CBC => Ok(ContentCipher::DesEde3Cbc),
            other => Err(ScepError::UnsupportedCipher(other.to_string())),
        }
    }

    fn oid(self) -> ObjectIdentifier {
        match self {
            ContentCipher::Aes128Cbc => AES128_CBC,
            ContentCipher::Aes192Cbc => AES192_CBC,
            ContentCipher::Aes256Cbc => AES256_CBC,
            ContentCipher::DesEde3Cbc => DES_EDE3_CBC,
        }
    }

    fn key_len(self) -> usize {
        match self {
            ContentCipher::Aes128Cbc => 16,
            ContentCipher::Aes192Cbc => 24,
            ContentCipher::Aes256Cbc => 32,
            ContentCipher::DesEde3Cbc => 24,
        }
    }

    fn iv_len(self) -> usize {
        match self {
            ContentCipher::DesEde3Cbc => 8,
            _ => 16,
        }
    }

    fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, ScepError> {
        let invalid = |e: cbc::cipher::InvalidLength| ScepError::Encrypt(e.to_string());
        Ok(match self {
            ContentCipher::Aes128Cbc => Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            ContentCipher::Aes192Cbc => Aes192CbcEnc::new_from_slices(key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            ContentCipher::Aes256Cbc => Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            ContentCipher::DesEde3Cbc => TdesCbcEnc::new_from_slices(key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        })
    }

    fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, ScepError> {
        let invalid = |e: cbc::cipher::InvalidLength| ScepError::Decrypt(e.to_string());
        let unpad = |e: cbc::cipher::block_padding::UnpadError| ScepError::Decrypt(e.to_string());
        match self {
            ContentCipher::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(unpad),
            ContentCipher::Aes192Cbc => Aes192CbcDec::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(unpad),
            ContentCipher::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(unpad),
            ContentCipher::DesEde3Cbc => TdesCbcDec::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(unpad),
        }
    }
}

/// A decoded, signature-verified PKIMessage
#[derive(Debug, Clone)]
pub struct PkiMessage {
    pub message_type: MessageType,
    pub transaction_id: String,
    pub sender_nonce: Vec<u8>,
    pub recipient_nonce: Option<Vec<u8>>,
    pub pki_status: Option<PkiStatus>,
    pub fail_info: Option<FailInfo>,
    /// Certificate that signed the message
    pub signer: Certificate,
    pub digest: DigestAlgorithm,
    /// DER `ContentInfo` holding the pkcsPKIEnvelope, when present
    pub envelope: Option<Vec<u8>>,
}

impl PkiMessage {
    /// Decode `data` and verify its signature against the embedded signer certificate.
    pub fn decode(data: &[u8]) -> Result<Self, ScepError> {
        let signed = verify_signed_data(data)?;
        let attrs = &signed.attributes;

        let message_type = MessageType::from_code(&string_attribute(attrs, ID_MESSAGE_TYPE, "messageType")?)?;
        let transaction_id = string_attribute(attrs, ID_TRANSACTION_ID, "transactionID")?;
        let sender_nonce = octets_attribute(attrs, ID_SENDER_NONCE, "senderNonce")?;
        let recipient_nonce = optional(octets_attribute(attrs, ID_RECIPIENT_NONCE, "recipientNonce"))?;
        let pki_status = optional(string_attribute(attrs, ID_PKI_STATUS, "pkiStatus"))?
            .map(|code| PkiStatus::from_code(&code))
            .transpose()?;
        let fail_info = optional(string_attribute(attrs, ID_FAIL_INFO, "failInfo"))?
            .map(|code| FailInfo::from_code(&code))
            .transpose()?;

        Ok(Self {
            message_type,
            transaction_id,
            sender_nonce,
            recipient_nonce,
            pki_status,
            fail_info,
            signer: signed.signer,
            digest: signed.digest,
            envelope: signed.content,
        })
    }

    /// Decrypt the pkcsPKIEnvelope with the recipient's key.
    pub fn open_envelope(
        &self,
        recipient: &Certificate,
        key: &RsaPrivateKey,
    ) -> Result<(Vec<u8>, ContentCipher), ScepError> {
        let envelope = self.envelope.as_deref().ok_or(ScepError::MissingContent)?;
        open_envelope(envelope, recipient, key)
    }
}

/// Fields of an outgoing PKIMessage
#[derive(Debug, Clone)]
pub struct OutgoingMessage<'a> {
    pub message_type: MessageType,
    pub transaction_id: &'a str,
    pub sender_nonce: &'a [u8],
    pub recipient_nonce: Option<&'a [u8]>,
    pub pki_status: Option<PkiStatus>,
    pub fail_info: Option<FailInfo>,
    /// DER `ContentInfo` of the pkcsPKIEnvelope
    pub envelope: Option<&'a [u8]>,
}

impl OutgoingMessage<'_> {
    /// Sign the message as `signer`, producing a DER `ContentInfo`.
    pub fn sign(
        &self,
        signer: &Certificate,
        key: &RsaPrivateKey,
        digest: DigestAlgorithm,
    ) -> Result<Vec<u8>, ScepError> {
        let content = self.envelope.unwrap_or_default();

        let mut attributes = vec![
            attribute(ID_CONTENT_TYPE, Any::new(Tag::ObjectIdentifier, ID_DATA.as_bytes())?)?,
            attribute(ID_MESSAGE_DIGEST, Any::new(Tag::OctetString, digest.digest(content))?)?,
            attribute(ID_MESSAGE_TYPE, printable(self.message_type.code())?)?,
            attribute(ID_TRANSACTION_ID, printable(self.transaction_id)?)?,
            attribute(ID_SENDER_NONCE, Any::new(Tag::OctetString, self.sender_nonce)?)?,
        ];
        if let Some(nonce) = self.recipient_nonce {
            attributes.push(attribute(ID_RECIPIENT_NONCE, Any::new(Tag::OctetString, nonce)?)?);
        }
        if let Some(status) = self.pki_status {
            attributes.push(attribute(ID_PKI_STATUS, printable(status.code())?)?);
        }
        if let Some(fail_info) = self.fail_info {
            attributes.push(attribute(ID_FAIL_INFO, printable(fail_info.code())?)?);
        }

        let signed_attrs = SetOfVec::try_from(attributes)?;
        let signature = key
            .sign(digest.scheme(), &digest.digest(&signed_attrs.to_der()?))
            .map_err(|e| ScepError::Sign(e.to_string()))?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(issuer_and_serial(signer)),
            digest_alg: digest.identifier(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: RSA_ENCRYPTION,
                parameters: Some(Any::new(Tag::Null, Vec::<u8>::new())?),
            },
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let econtent = match self.envelope {
            Some(envelope) => Some(Any::new(Tag::OctetString, envelope)?),
            None => None,
        };

        let certificates: SetOfVec<CertificateChoices> =
            SetOfVec::try_from(vec![CertificateChoices::Certificate(signer.clone())])?;

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(vec![digest.identifier()])?,
            encap_content_info: EncapsulatedContentInfo { econtent_type: ID_DATA, econtent },
            certificates: Some(CertificateSet(certificates)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        };

        wrap(ID_SIGNED_DATA, &signed_data)
    }
}

struct VerifiedSignedData {
    attributes: Vec<Attribute>,
    signer: Certificate,
    digest: DigestAlgorithm,
    content: Option<Vec<u8>>,
}

fn verify_signed_data(data: &[u8]) -> Result<VerifiedSignedData, ScepError> {
    let signed_data: SignedData = unwrap(data, ID_SIGNED_DATA, "signedData")?;

    let content = match &signed_data.encap_content_info.econtent {
        Some(any) if any.tag() == Tag::OctetString => Some(any.value().to_vec()),
        Some(_) => return Err(ScepError::InvalidAttribute("encapsulated content")),
        None => None,
    };

    let certificates = embedded_certificates(signed_data.certificates.as_ref());
    let signer_info = signed_data.signer_infos.0.iter().next().ok_or(ScepError::NoSigner)?;

    let signer = match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => certificates.iter().find(|cert| {
            cert.tbs_certificate.issuer == id.issuer
                && cert.tbs_certificate.serial_number == id.serial_number
        }),
        _ => None,
    }
    .or_else(|| certificates.first())
    .cloned()
    .ok_or(ScepError::NoSignerCertificate)?;

    let digest = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid)?;
    let signed_attrs = signer_info.signed_attrs.as_ref().ok_or(ScepError::MissingAttribute("signedAttrs"))?;
    let attributes: Vec<Attribute> = signed_attrs.iter().cloned().collect();

    let expected = octets_attribute(&attributes, ID_MESSAGE_DIGEST, "messageDigest")?;
    if expected != digest.digest(content.as_deref().unwrap_or_default()) {
        return Err(ScepError::MessageDigestMismatch);
    }

    let public_key = rsa_public_key(&signer)?;
    public_key
        .verify(
            digest.scheme(),
            &digest.digest(&signed_attrs.to_der()?),
            signer_info.signature.as_bytes(),
        )
        .map_err(|e| ScepError::BadSignature(e.to_string()))?;

    Ok(VerifiedSignedData { attributes, signer, digest, content })
}

/// Decrypt a DER `ContentInfo(EnvelopedData)` addressed to `recipient`.
pub fn open_envelope(
    data: &[u8],
    recipient: &Certificate,
    key: &RsaPrivateKey,
) -> Result<(Vec<u8>, ContentCipher), ScepError> {
    let enveloped: EnvelopedData = unwrap(data, ID_ENVELOPED_DATA, "envelopedData")?;

    let transports: Vec<&KeyTransRecipientInfo> = enveloped
        .recip_infos
        .0
        .iter()
        .filter_map(|info| match info {
            RecipientInfo::Ktri(ktri) => Some(ktri),
            _ => None,
        })
        .collect();

    let ktri = transports
        .iter()
        .find(|ktri| match &ktri.rid {
            RecipientIdentifier::IssuerAndSerialNumber(id) => {
                id.issuer == recipient.tbs_certificate.issuer
                    && id.serial_number == recipient.tbs_certificate.serial_number
            }
            _ => false,
        })
        .or_else(|| transports.first())
        .ok_or(ScepError::NoRecipient)?;

    let content_key = key
        .decrypt(Pkcs1v15Encrypt, ktri.enc_key.as_bytes())
        .map_err(|e| ScepError::Decrypt(e.to_string()))?;

    let encrypted = &enveloped.encrypted_content;
    let cipher = ContentCipher::from_oid(&encrypted.content_enc_alg.oid)?;
    let iv = match &encrypted.content_enc_alg.parameters {
        Some(any) if any.tag() == Tag::OctetString => any.value().to_vec(),
        _ => return Err(ScepError::InvalidAttribute("content encryption IV")),
    };
    let ciphertext = encrypted.encrypted_content.as_ref().ok_or(ScepError::MissingContent)?;

    let plaintext = cipher.decrypt(&content_key, &iv, ciphertext.as_bytes())?;
    Ok((plaintext, cipher))
}

/// Encrypt `content` to `recipient` as a DER `ContentInfo(EnvelopedData)`.
pub fn seal_envelope(
    content: &[u8],
    recipient: &Certificate,
    cipher: ContentCipher,
) -> Result<Vec<u8>, ScepError> {
    let mut rng = rand::thread_rng();
    let mut content_key = vec![0u8; cipher.key_len()];
    rng.fill_bytes(&mut content_key);
    let mut iv = vec![0u8; cipher.iv_len()];
    rng.fill_bytes(&mut iv);

    let ciphertext = cipher.encrypt(&content_key, &iv, content)?;
    let encrypted_key = rsa_public_key(recipient)?
        .encrypt(&mut rng, Pkcs1v15Encrypt, &content_key)
        .map_err(|e| ScepError::Encrypt(e.to_string()))?;

    let ktri = KeyTransRecipientInfo {
        version: CmsVersion::V0,
        rid: RecipientIdentifier::IssuerAndSerialNumber(issuer_and_serial(recipient)),
        key_enc_alg: AlgorithmIdentifierOwned {
            oid: RSA_ENCRYPTION,
            parameters: Some(Any::new(Tag::Null, Vec::<u8>::new())?),
        },
        enc_key: OctetString::new(encrypted_key)?,
    };

    let enveloped = EnvelopedData {
        version: CmsVersion::V0,
        originator_info: None,
        recip_infos: RecipientInfos(SetOfVec::try_from(vec![RecipientInfo::Ktri(ktri)])?),
        encrypted_content: EncryptedContentInfo {
            content_type: ID_DATA,
            content_enc_alg: AlgorithmIdentifierOwned {
                oid: cipher.oid(),
                parameters: Some(Any::new(Tag::OctetString, iv)?),
            },
            encrypted_content: Some(OctetString::new(ciphertext)?),
        },
        unprotected_attrs: None,
    };

    wrap(ID_ENVELOPED_DATA, &enveloped)
}

/// Degenerate certs-only `SignedData` carrying `certs` in the given order.
pub fn degenerate_certificates(certs: &[Certificate]) -> Result<Vec<u8>, ScepError> {
    wrap(ID_SIGNED_DATA, &CertsOnly(certs.to_vec()))
}

/// Certificates of a degenerate certs-only `SignedData`, in encoded order.
pub fn parse_degenerate_certificates(data: &[u8]) -> Result<Vec<Certificate>, ScepError> {
    let bundle: CertsOnly = unwrap(data, ID_SIGNED_DATA, "signedData")?;
    Ok(bundle.0)
}

const CERTIFICATES_TAG: Tag = Tag::ContextSpecific { constructed: true, number: TagNumber::N0 };

/// Certs-only `SignedData`. The certificate set is written as given rather
/// than in DER set order, so a chain keeps its leaf first.
struct CertsOnly(Vec<Certificate>);

impl CertsOnly {
    fn certificates_len(&self) -> der::Result<Length> {
        self.0.iter().try_fold(Length::ZERO, |len, cert| len + cert.encoded_len()?)
    }
}

fn certs_only_content() -> EncapsulatedContentInfo {
    EncapsulatedContentInfo { econtent_type: ID_DATA, econtent: None }
}

impl FixedTag for CertsOnly {
    const TAG: Tag = Tag::Sequence;
}

impl EncodeValue for CertsOnly {
    fn value_len(&self) -> der::Result<Length> {
        let certificates = self.certificates_len()?;
        [
            CmsVersion::V1.encoded_len()?,
            SetOfVec::<AlgorithmIdentifierOwned>::new().encoded_len()?,
            certs_only_content().encoded_len()?,
            Header::new(CERTIFICATES_TAG, certificates)?.encoded_len()?,
            certificates,
            SignerInfos(SetOfVec::new()).encoded_len()?,
        ]
        .into_iter()
        .try_fold(Length::ZERO, |total, len| total + len)
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        CmsVersion::V1.encode(writer)?;
        SetOfVec::<AlgorithmIdentifierOwned>::new().encode(writer)?;
        certs_only_content().encode(writer)?;
        Header::new(CERTIFICATES_TAG, self.certificates_len()?)?.encode(writer)?;
        for cert in &self.0 {
            cert.encode(writer)?;
        }
        SignerInfos(SetOfVec::new()).encode(writer)
    }
}

impl<'a> DecodeValue<'a> for CertsOnly {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        reader.read_nested(header.length, |reader| {
            CmsVersion::decode(reader)?;
            // digestAlgorithms, encapContentInfo
            Any::decode(reader)?;
            Any::decode(reader)?;

            let mut certificates = Vec::new();
            if !reader.is_finished() && reader.peek_tag()? == CERTIFICATES_TAG {
                let set = Header::decode(reader)?;
                reader.read_nested(set.length, |reader| {
                    while !reader.is_finished() {
                        certificates.push(Certificate::decode(reader)?);
                    }
                    Ok(())
                })?;
            }

            // crls, signerInfos
            while !reader.is_finished() {
                Any::decode(reader)?;
            }
            Ok(Self(certificates))
        })
    }
}

fn embedded_certificates(set: Option<&CertificateSet>) -> Vec<Certificate> {
    set.map(|set| {
        set.0
            .iter()
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert.clone()),
                _ => None,
            })
            .collect()
    })
    .unwrap_or_default()
}

/// A fresh random nonce
pub fn new_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

fn wrap<T: Encode>(content_type: ObjectIdentifier, content: &T) -> Result<Vec<u8>, ScepError> {
    let info = ContentInfo { content_type, content: Any::from_der(&content.to_der()?)? };
    Ok(info.to_der()?)
}

fn unwrap<T>(data: &[u8], expected: ObjectIdentifier, name: &'static str) -> Result<T, ScepError>
where
    T: for<'a> Decode<'a>,
{
    let info = ContentInfo::from_der(data)?;
    if info.content_type != expected {
        return Err(ScepError::UnexpectedContentType {
            expected: name,
            found: info.content_type.to_string(),
        });
    }
    Ok(T::from_der(&info.content.to_der()?)?)
}

fn issuer_and_serial(cert: &Certificate) -> IssuerAndSerialNumber {
    IssuerAndSerialNumber {
        issuer: cert.tbs_certificate.issuer.clone(),
        serial_number: cert.tbs_certificate.serial_number.clone(),
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute, ScepError> {
    Ok(Attribute { oid, values: SetOfVec::try_from(vec![value])? })
}

fn printable(value: &str) -> Result<Any, ScepError> {
    Ok(Any::new(Tag::PrintableString, value.as_bytes())?)
}

fn find_attribute<'a>(attributes: &'a [Attribute], oid: ObjectIdentifier) -> Option<&'a Any> {
    attributes.iter().find(|attr| attr.oid == oid).and_then(|attr| attr.values.iter().next())
}

fn string_attribute(
    attributes: &[Attribute],
    oid: ObjectIdentifier,
    name: &'static str,
) -> Result<String, ScepError> {
    let value = find_attribute(attributes, oid).ok_or(ScepError::MissingAttribute(name))?;
    match value.tag() {
        Tag::PrintableString | Tag::Utf8String | Tag::Ia5String => std::str::from_utf8(value.value())
            .map(str::to_owned)
            .map_err(|_| ScepError::InvalidAttribute(name)),
        _ => Err(ScepError::InvalidAttribute(name)),
    }
}

fn octets_attribute(
    attributes: &[Attribute],
    oid: ObjectIdentifier,
    name: &'static str,
) -> Result<Vec<u8>, ScepError> {
    let value = find_attribute(attributes, oid).ok_or(ScepError::MissingAttribute(name))?;
    if value.tag() == Tag::OctetString {
        Ok(value.value().to_vec())
    } else {
        Err(ScepError::InvalidAttribute(name))
    }
}

fn optional<T>(result: Result<T, ScepError>) -> Result<Option<T>, ScepError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ScepError::MissingAttribute(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::certificates::{parse_certificate_chain, parse_rsa_private_key};
    use std::path::Path;

    const CHAIN: &[u8] = include_bytes!("../../tests/fixtures/chain.pem");
    const RA_KEY: &[u8] = include_bytes!("../../tests/fixtures/ra.key");
    const CLIENT_CERT: &[u8] = include_bytes!("../../tests/fixtures/client.pem");
    const CLIENT_KEY: &[u8] = include_bytes!("../../tests/fixtures/client.key");
    const CSR: &[u8] = include_bytes!("../../tests/fixtures/csr_testpass_test.der");
    const OPENSSL_AES256: &[u8] = include_bytes!("../../tests/fixtures/enveloped_aes256.der");
    const OPENSSL_DES3: &[u8] = include_bytes!("../../tests/fixtures/enveloped_des3.der");
    const OPENSSL_SIGNED: &[u8] = include_bytes!("../../tests/fixtures/signed_enveloped.der");

    fn ra() -> (Certificate, RsaPrivateKey) {
        let certs = parse_certificate_chain(CHAIN, Path::new("chain.pem")).expect("chain");
        let key = parse_rsa_private_key(RA_KEY, Path::new("ra.key")).expect("key");
        (certs[0].clone(), key)
    }

    fn client() -> (Certificate, RsaPrivateKey) {
        let certs = parse_certificate_chain(CLIENT_CERT, Path::new("client.pem")).expect("cert");
        let key = parse_rsa_private_key(CLIENT_KEY, Path::new("client.key")).expect("key");
        (certs[0].clone(), key)
    }

    #[test]
    fn opens_openssl_envelopes() {
        let (ra_cert, ra_key) = ra();

        let (plaintext, cipher) = open_envelope(OPENSSL_AES256, &ra_cert, &ra_key).expect("aes");
        assert_eq!(plaintext, CSR);
        assert_eq!(cipher, ContentCipher::Aes256Cbc);

        let (plaintext, cipher) = open_envelope(OPENSSL_DES3, &ra_cert, &ra_key).expect("des3");
        assert_eq!(plaintext, CSR);
        assert_eq!(cipher, ContentCipher::DesEde3Cbc);
    }

    #[test]
    fn verifies_openssl_signature_but_requires_scep_attributes() {
        let verified = verify_signed_data(OPENSSL_SIGNED).expect("signature verifies");
        assert_eq!(verified.digest, DigestAlgorithm::Sha256);
        assert_eq!(verified.content.as_deref(), Some(OPENSSL_AES256));

        let err = PkiMessage::decode(OPENSSL_SIGNED).expect_err("no messageType");
        assert!(matches!(err, ScepError::MissingAttribute("messageType")));
    }

    #[test]
    fn signed_request_decodes_and_opens() {
        let (ra_cert, ra_key) = ra();
        let (client_cert, client_key) = client();

        let envelope = seal_envelope(CSR, &ra_cert, ContentCipher::Aes128Cbc).expect("seal");
        let nonce = new_nonce();
        let request = OutgoingMessage {
            message_type: MessageType::PkcsReq,
            transaction_id: "txn-1",
            sender_nonce: &nonce,
            recipient_nonce: None,
            pki_status: None,
            fail_info: None,
            envelope: Some(&envelope),
        }
        .sign(&client_cert, &client_key, DigestAlgorithm::Sha1)
        .expect("sign");

        let decoded = PkiMessage::decode(&request).expect("decode");
        assert_eq!(decoded.message_type, MessageType::PkcsReq);
        assert_eq!(decoded.transaction_id, "txn-1");
        assert_eq!(decoded.sender_nonce, nonce);
        assert_eq!(decoded.digest, DigestAlgorithm::Sha1);
        assert_eq!(decoded.signer, client_cert);

        let (csr, cipher) = decoded.open_envelope(&ra_cert, &ra_key).expect("open");
        assert_eq!(csr, CSR);
        assert_eq!(cipher, ContentCipher::Aes128Cbc);
    }

    #[test]
    fn tampered_message_fails_verification() {
        let (client_cert, client_key) = client();
        let nonce = new_nonce();
        let mut message = OutgoingMessage {
            message_type: MessageType::PkcsReq,
            transaction_id: "txn-2",
            sender_nonce: &nonce,
            recipient_nonce: None,
            pki_status: None,
            fail_info: None,
            envelope: Some(b"payload"),
        }
        .sign(&client_cert, &client_key, DigestAlgorithm::Sha256)
        .expect("sign");

        let position = message
            .windows(b"payload".len())
            .position(|w| w == b"payload")
            .expect("payload present");
        message[position] ^= 0xff;

        let err = PkiMessage::decode(&message).expect_err("tampered");
        assert!(matches!(err, ScepError::MessageDigestMismatch));
    }

    #[test]
    fn degenerate_bundle_carries_every_certificate() {
        let certs = parse_certificate_chain(CHAIN, Path::new("chain.pem")).expect("chain");
        let bundle = degenerate_certificates(&certs).expect("encode");
        let decoded = parse_degenerate_certificates(&bundle).expect("decode");

        assert_eq!(decoded, certs);
    }

    #[test]
    fn degenerate_bundle_keeps_given_order() {
        let certs = parse_certificate_chain(CHAIN, Path::new("chain.pem")).expect("chain");
        let reversed: Vec<Certificate> = certs.iter().rev().cloned().collect();

        for order in [certs, reversed] {
            let bundle = degenerate_certificates(&order).expect("encode");
            assert_eq!(parse_degenerate_certificates(&bundle).expect("decode"), order);
        }
    }

    #[test]
    fn degenerate_bundle_is_a_certs_only_signed_data() {
        let certs = parse_certificate_chain(CHAIN, Path::new("chain.pem")).expect("chain");
        let bundle = degenerate_certificates(&certs[..1]).expect("encode");

        let info = ContentInfo::from_der(&bundle).expect("content info");
        let signed_data =
            SignedData::from_der(&info.content.to_der().expect("der")).expect("signed data");
        assert_eq!(signed_data.version, CmsVersion::V1);
        assert!(signed_data.signer_infos.0.is_empty());
        assert_eq!(embedded_certificates(signed_data.certificates.as_ref()), certs[..1].to_vec());
    }
}
