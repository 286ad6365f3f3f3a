//! CMS signed-message verification against Fulcio certificate pools
//!
//! A keyless Git signature is a detached CMS `SignedData` armored as
//! `SIGNED MESSAGE`. The signer certificate is embedded; webpki builds and
//! validates its path to one of the pool roots.

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use der::asn1::{ObjectIdentifier, Utf8StringRef};
use der::{Decode, Encode};
use rustls_pki_types::{CertificateDer, SignatureVerificationAlgorithm, TrustAnchor, UnixTime};
use sha2::{Digest, Sha256, Sha384};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use webpki::{EndEntityCert, KeyUsage};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{ExtendedKeyUsage, KeyUsage as KeyUsageExt, SubjectAltName};
use x509_cert::Certificate;

use super::{CertificatePools, CertificateVerifier, VerifiedCertificate};
use crate::error::BoxError;

const SIGNED_MESSAGE_LABEL: &str = "SIGNED MESSAGE";
const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
const ID_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");
const ID_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const ID_EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");
const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const ID_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const ID_KP_CODE_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");

/// `id-kp-codeSigning`, DER value bytes
const CODE_SIGNING_EKU: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x03, 0x03];

/// Fulcio OIDC issuer, DER `UTF8String` form
pub(crate) const FULCIO_ISSUER_V2: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.8");
/// Fulcio OIDC issuer, legacy raw-bytes form
pub(crate) const FULCIO_ISSUER_V1: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.1");

/// Verifies CMS signatures whose signer chains to a Fulcio root
pub struct CmsVerifier {
    roots: Vec<CertificateDer<'static>>,
    intermediates: Vec<CertificateDer<'static>>,
}

impl CmsVerifier {
    pub fn new(pools: &CertificatePools) -> Self {
        Self {
            roots: pools.roots.clone(),
            intermediates: pools.intermediates.clone(),
        }
    }

    fn verify_signed_message(
        &self,
        payload: &[u8],
        signature: &[u8],
        enforce_tlog: bool,
    ) -> Result<VerifiedCertificate, BoxError> {
        let signed_data = decode_signed_message(signature)?;

        let embedded: Vec<Certificate> = signed_data
            .certificates
            .iter()
            .flat_map(|set| set.0.iter())
            .filter_map(|choice| match choice {
                CertificateChoices::Certificate(cert) => Some(cert.clone()),
                _ => None,
            })
            .collect();

        let signer = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or("signed message has no signer")?;
        let leaf = find_signer_certificate(signer, &embedded)?;
        let leaf_der = CertificateDer::from(leaf.to_der()?);

        let signing_time = verify_signer(signer, &leaf_der, payload)?;

        // Validity is judged at the time of signing when the log vouches for
        // that time, otherwise now.
        let at = match (enforce_tlog, signing_time) {
            (true, Some(t)) => t,
            _ => SystemTime::now(),
        };
        let embedded_der = embedded
            .iter()
            .filter(|c| *c != leaf)
            .map(|c| c.to_der().map(CertificateDer::from))
            .collect::<der::Result<Vec<_>>>()?;
        require_code_signing(leaf)?;
        let chain = self.verify_chain(&leaf_der, &embedded_der, at)?;

        debug!("Signer certificate chains to a trusted root ({} link(s))", chain.len());

        let validity = &leaf.tbs_certificate.validity;
        Ok(VerifiedCertificate {
            der: leaf_der.to_vec(),
            chain,
            issuer: oidc_issuer(leaf)?,
            subject: san_identity(leaf)?,
            not_before: validity.not_before.to_system_time(),
            not_after: validity.not_after.to_system_time(),
            signing_time,
        })
    }

    /// Build a path from `leaf` to a root at `at`; returns the issuers
    /// above the leaf, nearest first, ending with the root
    fn verify_chain(
        &self,
        leaf_der: &CertificateDer<'_>,
        embedded: &[CertificateDer<'static>],
        at: SystemTime,
    ) -> Result<Vec<Vec<u8>>, BoxError> {
        if self.roots.is_empty() {
            return Err("no trusted roots".into());
        }
        let anchors = self
            .roots
            .iter()
            .map(|root| webpki::anchor_from_trusted_cert(root).map(|a| a.to_owned()))
            .collect::<Result<Vec<TrustAnchor<'static>>, _>>()?;
        let intermediates: Vec<CertificateDer<'static>> = self
            .intermediates
            .iter()
            .chain(embedded)
            .cloned()
            .collect();

        let leaf = EndEntityCert::try_from(leaf_der)?;
        let time = UnixTime::since_unix_epoch(at.duration_since(UNIX_EPOCH)?);

        // Basic constraints (cA, pathLenConstraint), validity and EKU are
        // enforced on every link here.
        let path = leaf
            .verify_for_usage(
                webpki::ALL_VERIFICATION_ALGS,
                &anchors,
                &intermediates,
                time,
                KeyUsage::required_if_present(CODE_SIGNING_EKU),
                None,
                None,
            )
            .map_err(|e| format!("certificate chain does not lead to a trusted root: {e}"))?;

        let mut chain: Vec<Vec<u8>> = path
            .intermediate_certificates()
            .map(|cert| cert.der().to_vec())
            .collect();
        let anchor = path.anchor();
        let root = self
            .roots
            .iter()
            .zip(&anchors)
            .find(|(_, a)| {
                a.subject == anchor.subject
                    && a.subject_public_key_info == anchor.subject_public_key_info
            })
            .map(|(root, _)| root)
            .ok_or("verified path ends at an unknown root")?;
        chain.push(root.to_vec());

        for issuer in &chain {
            let issuer = Certificate::from_der(issuer)?;
            require_cert_sign(&issuer)?;
            check_validity(&issuer, at)?;
        }
        Ok(chain)
    }
}

impl CertificateVerifier for CmsVerifier {
    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        enforce_tlog: bool,
    ) -> Result<VerifiedCertificate, BoxError> {
        self.verify_signed_message(payload, signature, enforce_tlog)
    }
}

fn decode_signed_message(signature: &[u8]) -> Result<SignedData, BoxError> {
    let block = pem::parse(signature)?;
    if block.tag() != SIGNED_MESSAGE_LABEL {
        return Err(format!("expected {SIGNED_MESSAGE_LABEL} block, found {}", block.tag()).into());
    }
    let content_info = ContentInfo::from_der(block.contents())?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(format!("unexpected CMS content type {}", content_info.content_type).into());
    }
    Ok(SignedData::from_der(&content_info.content.to_der()?)?)
}

fn find_signer_certificate<'a>(
    signer: &SignerInfo,
    embedded: &'a [Certificate],
) -> Result<&'a Certificate, BoxError> {
    match &signer.sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => embedded
            .iter()
            .find(|c| {
                c.tbs_certificate.serial_number == id.serial_number
                    && c.tbs_certificate.issuer == id.issuer
            })
            .ok_or_else(|| "signer certificate not embedded in signature".into()),
        SignerIdentifier::SubjectKeyIdentifier(_) => {
            Err("signer identified by subject key identifier is not supported".into())
        }
    }
}

/// Digest of `payload` under the signer's digest algorithm, with the ECDSA
/// schemes that pair with it
fn message_digest(
    oid: &ObjectIdentifier,
    payload: &[u8],
) -> Result<(Vec<u8>, [&'static dyn SignatureVerificationAlgorithm; 2]), BoxError> {
    if *oid == ID_SHA256 {
        Ok((
            Sha256::digest(payload).to_vec(),
            [webpki::ring::ECDSA_P256_SHA256, webpki::ring::ECDSA_P384_SHA256],
        ))
    } else if *oid == ID_SHA384 {
        Ok((
            Sha384::digest(payload).to_vec(),
            [webpki::ring::ECDSA_P384_SHA384, webpki::ring::ECDSA_P256_SHA384],
        ))
    } else {
        Err(format!("unsupported digest algorithm {oid}").into())
    }
}

/// Check the signer's digest and signature; returns the signed signing time
fn verify_signer(
    signer: &SignerInfo,
    leaf_der: &CertificateDer<'_>,
    payload: &[u8],
) -> Result<Option<SystemTime>, BoxError> {
    let (digest, algorithms) = message_digest(&signer.digest_alg.oid, payload)?;

    let signed_attrs = signer
        .signed_attrs
        .as_ref()
        .ok_or("signer has no signed attributes")?;

    let mut signed_digest = None;
    let mut signing_time = None;
    for attr in signed_attrs.iter() {
        let Some(value) = attr.values.iter().next() else {
            continue;
        };
        if attr.oid == ID_MESSAGE_DIGEST {
            signed_digest = Some(value.value().to_vec());
        } else if attr.oid == ID_SIGNING_TIME {
            let time = x509_cert::time::Time::from_der(&value.to_der()?)?;
            signing_time = Some(time.to_system_time());
        }
    }

    let signed_digest = signed_digest.ok_or("signer has no messageDigest attribute")?;
    if signed_digest != digest {
        return Err("payload digest does not match signed messageDigest".into());
    }

    let leaf = EndEntityCert::try_from(leaf_der)?;
    let message = signed_attrs.to_der()?;
    let verified = algorithms
        .iter()
        .any(|alg| leaf.verify_signature(*alg, &message, signer.signature.as_bytes()).is_ok());
    if !verified {
        return Err("signature does not verify under signer certificate".into());
    }

    Ok(signing_time)
}

/// An issuer that states its key usage must allow certificate signing
fn require_cert_sign(issuer: &Certificate) -> Result<(), BoxError> {
    let extensions = issuer.tbs_certificate.extensions.as_deref().unwrap_or_default();
    let Some(ext) = extensions.iter().find(|e| e.extn_id == ID_KEY_USAGE) else {
        return Ok(());
    };
    if KeyUsageExt::from_der(ext.extn_value.as_bytes())?.key_cert_sign() {
        return Ok(());
    }
    Err(format!(
        "issuer {} is not allowed to sign certificates",
        issuer.tbs_certificate.subject
    )
    .into())
}

/// The signing certificate must be issued for code signing
fn require_code_signing(leaf: &Certificate) -> Result<(), BoxError> {
    let extensions = leaf.tbs_certificate.extensions.as_deref().unwrap_or_default();
    let ext = extensions
        .iter()
        .find(|e| e.extn_id == ID_EXTENDED_KEY_USAGE)
        .ok_or("signer certificate has no extended key usage")?;
    if ExtendedKeyUsage::from_der(ext.extn_value.as_bytes())?
        .0
        .contains(&ID_KP_CODE_SIGNING)
    {
        return Ok(());
    }
    Err("signer certificate is not issued for code signing".into())
}

fn check_validity(cert: &Certificate, at: SystemTime) -> Result<(), BoxError> {
    let validity = &cert.tbs_certificate.validity;
    if at < validity.not_before.to_system_time() || at > validity.not_after.to_system_time() {
        return Err(format!(
            "certificate {} is not valid at the verification time",
            cert.tbs_certificate.subject
        )
        .into());
    }
    Ok(())
}

/// OIDC issuer recorded by Fulcio
pub(crate) fn oidc_issuer(cert: &Certificate) -> Result<Option<String>, BoxError> {
    let extensions = cert.tbs_certificate.extensions.as_deref().unwrap_or_default();

    if let Some(ext) = extensions.iter().find(|e| e.extn_id == FULCIO_ISSUER_V2) {
        let issuer = Utf8StringRef::from_der(ext.extn_value.as_bytes())?;
        return Ok(Some(issuer.as_str().to_string()));
    }
    if let Some(ext) = extensions.iter().find(|e| e.extn_id == FULCIO_ISSUER_V1) {
        return Ok(Some(String::from_utf8(ext.extn_value.as_bytes().to_vec())?));
    }
    Ok(None)
}

/// First email or URI subject alternative name
pub(crate) fn san_identity(cert: &Certificate) -> Result<Option<String>, BoxError> {
    let extensions = cert.tbs_certificate.extensions.as_deref().unwrap_or_default();
    let Some(ext) = extensions.iter().find(|e| e.extn_id == ID_SUBJECT_ALT_NAME) else {
        return Ok(None);
    };

    let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
    Ok(san.0.iter().find_map(|name| match name {
        GeneralName::Rfc822Name(email) => Some(email.to_string()),
        GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
        _ => None,
    }))
}
