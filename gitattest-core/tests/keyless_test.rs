//! Keyless verification against a locally issued Fulcio-style hierarchy

use async_trait::async_trait;
use cms::builder::{create_signing_time_attribute, SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use der::asn1::{BitString, Ia5String, ObjectIdentifier, OctetString, Utf8StringRef};
use der::oid::AssociatedOid;
use der::Encode;
use gitattest_core::error::BoxError;
use gitattest_core::keyless::{
    verify_keyless, CertificatePools, CertificateVerifier, CmsVerifier, KeylessBackend,
    TransparencyKey, TransparencyLog, VerifiedCertificate,
};
use gitattest_core::{KeylessIdentity, OperationContext, SignatureError};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{DerSignature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tls_codec::TlsByteVecU16;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::sct::{
    DigitallySigned, HashAlgorithm, LogId, SerializedSct, SignatureAlgorithm,
    SignatureAndHashAlgorithm, SignedCertificateTimestamp, SignedCertificateTimestampList,
    Version,
};
use x509_cert::ext::pkix::{ExtendedKeyUsage, SubjectAltName};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};
use x509_cert::Certificate;

const COMMIT: &[u8] = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\nauthor Jane <jane@example.com> 1700000000 +0000\n\ninitial\n";
const ISSUER: &str = "https://github.com/login/oauth";
const SUBJECT: &str = "jane@example.com";
const ROOT_NAME: &str = "CN=sigstore,O=sigstore.dev";
const INTERMEDIATE_NAME: &str = "CN=sigstore-intermediate,O=sigstore.dev";

const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const ID_KP_CODE_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");
const ID_KP_EMAIL_PROTECTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.4");
const FULCIO_ISSUER: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.8");

fn key() -> SigningKey {
    SigningKey::random(&mut rand_core::OsRng)
}

fn spki_der(key: &SigningKey) -> Vec<u8> {
    key.verifying_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec()
}

fn validity() -> Validity {
    let now = SystemTime::now();
    Validity {
        not_before: Time::try_from(now - Duration::from_secs(60)).unwrap(),
        not_after: Time::try_from(now + Duration::from_secs(600)).unwrap(),
    }
}

fn extension(extn_id: ObjectIdentifier, value: Vec<u8>) -> Extension {
    Extension {
        extn_id,
        critical: false,
        extn_value: OctetString::new(value).unwrap(),
    }
}

fn key_usage(purpose: ObjectIdentifier) -> Extension {
    extension(
        ExtendedKeyUsage::OID,
        ExtendedKeyUsage(vec![purpose]).to_der().unwrap(),
    )
}

/// Fulcio's identity extensions for `SUBJECT` at `ISSUER`
fn identity() -> Vec<Extension> {
    let san = SubjectAltName(vec![GeneralName::Rfc822Name(
        Ia5String::new(SUBJECT).unwrap(),
    )]);
    vec![
        extension(SubjectAltName::OID, san.to_der().unwrap()),
        extension(
            FULCIO_ISSUER,
            Utf8StringRef::new(ISSUER).unwrap().to_der().unwrap(),
        ),
    ]
}

/// Append `extensions` and sign the result with `issuer`
fn with_extensions(cert: Certificate, extensions: &[Extension], issuer: &SigningKey) -> Certificate {
    let mut tbs = cert.tbs_certificate;
    tbs.extensions
        .get_or_insert_with(Vec::new)
        .extend_from_slice(extensions);
    let signature: DerSignature = issuer.sign(&tbs.to_der().unwrap());
    Certificate {
        tbs_certificate: tbs,
        signature_algorithm: cert.signature_algorithm,
        signature: BitString::from_bytes(signature.as_bytes()).unwrap(),
    }
}

fn issue(
    profile: Profile,
    serial: u32,
    subject: &str,
    key: &SigningKey,
    issuer: &SigningKey,
    extensions: &[Extension],
) -> Certificate {
    let spki = SubjectPublicKeyInfoOwned::from_key(*key.verifying_key()).unwrap();
    let cert = CertificateBuilder::new(
        profile,
        SerialNumber::from(serial),
        validity(),
        Name::from_str(subject).unwrap(),
        spki,
        issuer,
    )
    .unwrap()
    .build::<DerSignature>()
    .unwrap();
    with_extensions(cert, extensions, issuer)
}

fn leaf_profile(issuer: &str) -> Profile {
    Profile::Leaf {
        issuer: Name::from_str(issuer).unwrap(),
        enable_key_agreement: false,
        enable_key_encipherment: false,
    }
}

fn der(cert: &Certificate) -> CertificateDer<'static> {
    CertificateDer::from(cert.to_der().unwrap())
}

struct Authority {
    key: SigningKey,
    cert: Certificate,
}

/// Root and intermediate, issuing leaves the way Fulcio does
struct Fulcio {
    root: Authority,
    intermediate: Authority,
}

impl Fulcio {
    fn new() -> Self {
        let root_key = key();
        let root = issue(Profile::Root, 1, ROOT_NAME, &root_key, &root_key, &[]);
        let intermediate_key = key();
        let intermediate = issue(
            Profile::SubCA {
                issuer: Name::from_str(ROOT_NAME).unwrap(),
                path_len_constraint: Some(0),
            },
            2,
            INTERMEDIATE_NAME,
            &intermediate_key,
            &root_key,
            &[],
        );
        Self {
            root: Authority {
                key: root_key,
                cert: root,
            },
            intermediate: Authority {
                key: intermediate_key,
                cert: intermediate,
            },
        }
    }

    fn pools(&self) -> CertificatePools {
        CertificatePools::from_certificates([der(&self.root.cert), der(&self.intermediate.cert)])
            .unwrap()
    }

    /// Code-signing leaf for `key` without an SCT
    fn precertificate(&self, key: &SigningKey, extensions: &[Extension]) -> Certificate {
        issue(
            leaf_profile(INTERMEDIATE_NAME),
            3,
            "CN=sigstore-leaf",
            key,
            &self.intermediate.key,
            extensions,
        )
    }

    /// Leaf carrying an SCT from `log`
    fn leaf(&self, key: &SigningKey, log: &SigningKey) -> Certificate {
        let mut extensions = vec![key_usage(ID_KP_CODE_SIGNING)];
        extensions.extend(identity());
        let precert = self.precertificate(key, &extensions);
        with_sct(precert, &self.intermediate, log)
    }
}

/// Embed an SCT signed by `log` over the precertificate entry
fn with_sct(precert: Certificate, issuer: &Authority, log: &SigningKey) -> Certificate {
    let log_id: [u8; 32] = Sha256::digest(spki_der(log)).into();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;
    let issuer_key_hash = Sha256::digest(
        issuer
            .cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .unwrap(),
    );
    let tbs = precert.tbs_certificate.to_der().unwrap();

    let mut entry = vec![0, 0];
    entry.extend_from_slice(&timestamp.to_be_bytes());
    entry.extend_from_slice(&[0, 1]);
    entry.extend_from_slice(&issuer_key_hash);
    entry.extend_from_slice(&(tbs.len() as u32).to_be_bytes()[1..]);
    entry.extend_from_slice(&tbs);
    entry.extend_from_slice(&[0, 0]);
    let signature: p256::ecdsa::Signature = log.sign(&entry);

    let sct = SerializedSct::new(SignedCertificateTimestamp {
        version: Version::V1,
        log_id: LogId { key_id: log_id },
        timestamp,
        extensions: TlsByteVecU16::new(vec![]),
        signature: DigitallySigned {
            algorithm: SignatureAndHashAlgorithm {
                hash: HashAlgorithm::Sha256,
                signature: SignatureAlgorithm::Ecdsa,
            },
            signature: TlsByteVecU16::new(signature.to_der().as_bytes().to_vec()),
        },
    })
    .unwrap();
    let list = SignedCertificateTimestampList::new(&[sct]).unwrap();
    with_extensions(
        precert,
        &[extension(
            SignedCertificateTimestampList::OID,
            list.to_der().unwrap(),
        )],
        &issuer.key,
    )
}

/// Detached CMS signature over `payload`, armored as git stores it
fn sign(payload: &[u8], key: &SigningKey, leaf: &Certificate, chain: &[&Certificate]) -> Vec<u8> {
    let digest = Sha256::digest(payload);
    let eci = EncapsulatedContentInfo {
        econtent_type: ID_DATA,
        econtent: None,
    };
    let sha256 = AlgorithmIdentifierOwned {
        oid: ID_SHA256,
        parameters: None,
    };
    let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: leaf.tbs_certificate.issuer.clone(),
        serial_number: leaf.tbs_certificate.serial_number.clone(),
    });

    let mut signer =
        SignerInfoBuilder::new(key, sid, sha256.clone(), &eci, Some(digest.as_slice())).unwrap();
    signer
        .add_signed_attribute(create_signing_time_attribute().unwrap())
        .unwrap();

    let mut builder = SignedDataBuilder::new(&eci);
    builder.add_digest_algorithm(sha256).unwrap();
    for cert in std::iter::once(leaf).chain(chain.iter().copied()) {
        builder
            .add_certificate(CertificateChoices::Certificate(cert.clone()))
            .unwrap();
    }
    let content_info = builder
        .add_signer_info::<SigningKey, DerSignature>(signer)
        .unwrap()
        .build()
        .unwrap();

    pem::encode(&pem::Pem::new(
        "SIGNED MESSAGE",
        content_info.to_der().unwrap(),
    ))
    .into_bytes()
}

struct AcceptingLog {
    checks: Arc<AtomicUsize>,
}

#[async_trait]
impl TransparencyLog for AcceptingLog {
    fn url(&self) -> &str {
        "https://rekor.test"
    }

    fn public_keys(&self) -> &[TransparencyKey] {
        &[]
    }

    async fn verify_inclusion(
        &self,
        _cert: &VerifiedCertificate,
        _payload: &[u8],
    ) -> Result<(), BoxError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Real certificate, CMS and SCT checks over local trust material
struct LocalBackend {
    pools: CertificatePools,
    ct_log_keys: Vec<TransparencyKey>,
    inclusion_checks: Arc<AtomicUsize>,
}

impl LocalBackend {
    fn new(fulcio: &Fulcio, ct_log: &SigningKey) -> Self {
        Self {
            pools: fulcio.pools(),
            ct_log_keys: vec![TransparencyKey::from_spki_der(spki_der(ct_log))],
            inclusion_checks: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl KeylessBackend for LocalBackend {
    async fn fetch_pools(&self) -> Result<CertificatePools, BoxError> {
        Ok(self.pools.clone())
    }

    fn certificate_verifier(
        &self,
        pools: &CertificatePools,
    ) -> Result<Box<dyn CertificateVerifier>, BoxError> {
        Ok(Box::new(CmsVerifier::new(pools)))
    }

    async fn connect_log(&self) -> Result<Box<dyn TransparencyLog>, BoxError> {
        Ok(Box::new(AcceptingLog {
            checks: self.inclusion_checks.clone(),
        }))
    }

    async fn ct_log_keys(&self) -> Result<Vec<TransparencyKey>, BoxError> {
        Ok(self.ct_log_keys.clone())
    }

    fn verify_sct(
        &self,
        cert: &VerifiedCertificate,
        ct_log_keys: &[TransparencyKey],
    ) -> Result<(), BoxError> {
        cert.verify_scts(ct_log_keys)
    }
}

#[test]
fn test_signature_chains_to_fulcio_root() {
    let fulcio = Fulcio::new();
    let signer = key();
    let leaf = fulcio.leaf(&signer, &key());
    let signature = sign(COMMIT, &signer, &leaf, &[&fulcio.intermediate.cert]);

    let cert = CmsVerifier::new(&fulcio.pools())
        .verify(COMMIT, &signature, true)
        .unwrap();

    assert_eq!(cert.subject.as_deref(), Some(SUBJECT));
    assert_eq!(cert.issuer.as_deref(), Some(ISSUER));
    assert_eq!(
        cert.chain,
        vec![
            fulcio.intermediate.cert.to_der().unwrap(),
            fulcio.root.cert.to_der().unwrap()
        ]
    );
    assert!(cert.signing_time.is_some());
}

#[test]
fn test_intermediate_may_come_from_the_pool() {
    let fulcio = Fulcio::new();
    let signer = key();
    let leaf = fulcio.leaf(&signer, &key());
    let signature = sign(COMMIT, &signer, &leaf, &[]);

    let cert = CmsVerifier::new(&fulcio.pools())
        .verify(COMMIT, &signature, false)
        .unwrap();
    assert_eq!(cert.chain.len(), 2);
}

#[test]
fn test_end_entity_cannot_issue_certificates() {
    let fulcio = Fulcio::new();
    let mut extensions = vec![key_usage(ID_KP_CODE_SIGNING)];
    extensions.extend(identity());

    // A leaf (cA=false) issued by the root, then used to issue another leaf
    let rogue_key = key();
    let rogue = issue(
        leaf_profile(ROOT_NAME),
        4,
        "CN=rogue",
        &rogue_key,
        &fulcio.root.key,
        &extensions,
    );
    let signer = key();
    let leaf = issue(
        leaf_profile("CN=rogue"),
        5,
        "CN=sigstore-leaf",
        &signer,
        &rogue_key,
        &extensions,
    );
    let signature = sign(COMMIT, &signer, &leaf, &[&rogue]);

    let err = CmsVerifier::new(&fulcio.pools())
        .verify(COMMIT, &signature, true)
        .unwrap_err();
    assert!(err.to_string().contains("trusted root"), "{err}");
}

#[test]
fn test_foreign_root_is_rejected() {
    let fulcio = Fulcio::new();
    let other = Fulcio::new();
    let signer = key();
    let leaf = other.leaf(&signer, &key());
    let signature = sign(COMMIT, &signer, &leaf, &[&other.intermediate.cert]);

    assert!(CmsVerifier::new(&fulcio.pools())
        .verify(COMMIT, &signature, true)
        .is_err());
}

#[test]
fn test_tampered_payload_is_rejected() {
    let fulcio = Fulcio::new();
    let signer = key();
    let leaf = fulcio.leaf(&signer, &key());
    let signature = sign(COMMIT, &signer, &leaf, &[&fulcio.intermediate.cert]);

    let err = CmsVerifier::new(&fulcio.pools())
        .verify(b"tree 0000000\n", &signature, true)
        .unwrap_err();
    assert!(err.to_string().contains("messageDigest"), "{err}");
}

#[test]
fn test_signature_by_other_key_is_rejected() {
    let fulcio = Fulcio::new();
    let leaf = fulcio.leaf(&key(), &key());
    let signature = sign(COMMIT, &key(), &leaf, &[&fulcio.intermediate.cert]);

    let err = CmsVerifier::new(&fulcio.pools())
        .verify(COMMIT, &signature, true)
        .unwrap_err();
    assert!(err.to_string().contains("signer certificate"), "{err}");
}

#[test]
fn test_leaf_must_be_issued_for_code_signing() {
    let fulcio = Fulcio::new();
    let signer = key();
    let mut extensions = vec![key_usage(ID_KP_EMAIL_PROTECTION)];
    extensions.extend(identity());
    let leaf = fulcio.precertificate(&signer, &extensions);
    let signature = sign(COMMIT, &signer, &leaf, &[&fulcio.intermediate.cert]);

    let err = CmsVerifier::new(&fulcio.pools())
        .verify(COMMIT, &signature, true)
        .unwrap_err();
    assert!(err.to_string().contains("code signing"), "{err}");
}

#[test]
fn test_embedded_sct_verifies_under_log_key() {
    let fulcio = Fulcio::new();
    let signer = key();
    let ct_log = key();
    let leaf = fulcio.leaf(&signer, &ct_log);
    let signature = sign(COMMIT, &signer, &leaf, &[&fulcio.intermediate.cert]);
    let cert = CmsVerifier::new(&fulcio.pools())
        .verify(COMMIT, &signature, true)
        .unwrap();

    let log_key = TransparencyKey::from_spki_der(spki_der(&ct_log));
    cert.verify_scts(&[log_key]).unwrap();

    let stranger = TransparencyKey::from_spki_der(spki_der(&key()));
    assert!(cert.verify_scts(&[stranger]).is_err());
}

#[tokio::test]
async fn test_pipeline_accepts_expected_identity() {
    let fulcio = Fulcio::new();
    let signer = key();
    let ct_log = key();
    let leaf = fulcio.leaf(&signer, &ct_log);
    let signature = sign(COMMIT, &signer, &leaf, &[&fulcio.intermediate.cert]);
    let backend = LocalBackend::new(&fulcio, &ct_log);
    let checks = backend.inclusion_checks.clone();

    verify_keyless(
        Arc::new(backend),
        &OperationContext::new(),
        &KeylessIdentity::new(ISSUER, SUBJECT),
        COMMIT,
        &signature,
    )
    .await
    .unwrap();
    assert_eq!(checks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pipeline_wrong_identity_is_incorrect_key() {
    let fulcio = Fulcio::new();
    let signer = key();
    let ct_log = key();
    let leaf = fulcio.leaf(&signer, &ct_log);
    let signature = sign(COMMIT, &signer, &leaf, &[&fulcio.intermediate.cert]);
    let backend = LocalBackend::new(&fulcio, &ct_log);
    let checks = backend.inclusion_checks.clone();

    let err = verify_keyless(
        Arc::new(backend),
        &OperationContext::new(),
        &KeylessIdentity::new(ISSUER, "mallory@example.com"),
        COMMIT,
        &signature,
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, SignatureError::IncorrectVerificationKey { .. }),
        "unexpected error {err:?}"
    );
    assert_eq!(checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pipeline_rejects_sct_from_unknown_log() {
    let fulcio = Fulcio::new();
    let signer = key();
    let leaf = fulcio.leaf(&signer, &key());
    let signature = sign(COMMIT, &signer, &leaf, &[&fulcio.intermediate.cert]);
    let backend = LocalBackend::new(&fulcio, &key());

    let err = verify_keyless(
        Arc::new(backend),
        &OperationContext::new(),
        &KeylessIdentity::new(ISSUER, SUBJECT),
        COMMIT,
        &signature,
    )
    .await
    .unwrap_err();
    assert!(err.is_trust_failure(), "unexpected error {err:?}");
}
