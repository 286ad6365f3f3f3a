//! Embedded signed certificate timestamp (RFC 6962) verification

use der::oid::AssociatedOid;
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_cert::ext::pkix::sct::{SignedCertificateTimestamp, SignedCertificateTimestampList};
use x509_cert::Certificate;

use super::crypto::TransparencyKey;
use crate::error::BoxError;

const ID_EMBEDDED_SCT_LIST: der::asn1::ObjectIdentifier = SignedCertificateTimestampList::OID;

/// Decode the timestamps in an embedded SCT list extension value
fn parse_sct_list(extn_value: &[u8]) -> Result<Vec<SignedCertificateTimestamp>, BoxError> {
    let list = SignedCertificateTimestampList::from_der(extn_value)?;
    let serialized = list
        .parse_timestamps()
        .map_err(|e| format!("malformed SCT list: {e:?}"))?;

    let mut scts = Vec::with_capacity(serialized.len());
    for entry in &serialized {
        scts.push(
            entry
                .parse_timestamp()
                .map_err(|e| format!("malformed SCT: {e:?}"))?,
        );
    }
    Ok(scts)
}

/// Bytes the CT log signed for a precertificate entry
fn signed_entry(
    timestamp: u64,
    extensions: &[u8],
    issuer_key_hash: &[u8],
    precert_tbs: &[u8],
) -> Result<Vec<u8>, BoxError> {
    if precert_tbs.len() >= 1 << 24 {
        return Err("precertificate too large".into());
    }
    let mut out = Vec::with_capacity(precert_tbs.len() + extensions.len() + 48);
    out.push(0); // v1
    out.push(0); // certificate_timestamp
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // precert_entry
    out.extend_from_slice(issuer_key_hash);
    out.extend_from_slice(&(precert_tbs.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(precert_tbs);
    out.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    out.extend_from_slice(extensions);
    Ok(out)
}

/// Require at least one embedded SCT from a known CT log to verify
pub(crate) fn verify_embedded_scts(
    leaf_der: &[u8],
    issuer_der: &[u8],
    ct_log_keys: &[TransparencyKey],
) -> Result<(), BoxError> {
    let leaf = Certificate::from_der(leaf_der)?;
    let issuer = Certificate::from_der(issuer_der)?;

    let extensions = leaf.tbs_certificate.extensions.clone().unwrap_or_default();
    let sct_ext = extensions
        .iter()
        .find(|e| e.extn_id == ID_EMBEDDED_SCT_LIST)
        .ok_or("certificate has no embedded SCT")?;
    let scts = parse_sct_list(sct_ext.extn_value.as_bytes())?;

    // The log signed the TBS without the SCT list
    let mut precert = leaf.tbs_certificate.clone();
    precert.extensions = Some(
        extensions
            .into_iter()
            .filter(|e| e.extn_id != ID_EMBEDDED_SCT_LIST)
            .collect(),
    );
    let precert_tbs = precert.to_der()?;
    let issuer_key_hash = Sha256::digest(issuer.tbs_certificate.subject_public_key_info.to_der()?);

    for sct in &scts {
        let log_id = sct.log_id.key_id;
        let Some(key) = ct_log_keys.iter().find(|k| k.id() == &log_id) else {
            debug!("Skipping SCT from unknown log {}", hex::encode(log_id));
            continue;
        };
        let message = signed_entry(
            sct.timestamp,
            sct.extensions.as_slice(),
            &issuer_key_hash,
            &precert_tbs,
        )?;
        if key.verify(&message, sct.signature.signature.as_slice()).is_ok() {
            debug!("SCT from log {} verified", key.hex_id());
            return Ok(());
        }
    }
    Err(format!(
        "none of {} embedded SCT(s) verify under the configured CT log keys",
        scts.len()
    )
    .into())
}
