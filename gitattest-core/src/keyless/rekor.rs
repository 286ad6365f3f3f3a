//! Rekor transparency log client

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, warn};

use super::crypto::TransparencyKey;
use super::{TransparencyLog, VerifiedCertificate};
use crate::error::BoxError;

/// Rekor API client holding the log's public keys
pub struct RekorClient {
    client: reqwest::Client,
    base_url: String,
    public_keys: Vec<TransparencyKey>,
}

#[derive(Debug, Serialize)]
struct SearchIndex {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    body: String,
    integrated_time: i64,
    #[serde(rename = "logID")]
    log_id: String,
    log_index: i64,
    verification: Option<EntryVerification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryVerification {
    signed_entry_timestamp: String,
}

/// Fields covered by the signed entry timestamp, in canonical key order
#[derive(Serialize)]
struct SignedEntryPayload<'a> {
    body: &'a str,
    #[serde(rename = "integratedTime")]
    integrated_time: i64,
    #[serde(rename = "logID")]
    log_id: &'a str,
    #[serde(rename = "logIndex")]
    log_index: i64,
}

#[derive(Debug, Deserialize)]
struct HashedRekord {
    kind: String,
    spec: HashedRekordSpec,
}

#[derive(Debug, Deserialize)]
struct HashedRekordSpec {
    data: HashedRekordData,
    signature: HashedRekordSignature,
}

#[derive(Debug, Deserialize)]
struct HashedRekordData {
    hash: HashedRekordHash,
}

#[derive(Debug, Deserialize)]
struct HashedRekordHash {
    algorithm: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HashedRekordSignature {
    public_key: HashedRekordPublicKey,
}

#[derive(Debug, Deserialize)]
struct HashedRekordPublicKey {
    content: String,
}

impl RekorClient {
    /// Client for the log at `base_url`, trusting entries signed by `public_keys`
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        public_keys: Vec<TransparencyKey>,
    ) -> Result<Self> {
        if public_keys.is_empty() {
            bail!("no Rekor public key available");
        }
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!("Rekor {} with {} key(s)", base_url, public_keys.len());
        Ok(Self {
            client,
            base_url,
            public_keys,
        })
    }

    async fn find_entry_uuids(&self, digest_hex: &str) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/index/retrieve", self.base_url);
        self.client
            .post(&url)
            .json(&SearchIndex {
                hash: format!("sha256:{digest_hex}"),
            })
            .send()
            .await
            .context("Failed to search Rekor index")?
            .error_for_status()
            .context("Rekor rejected index search")?
            .json()
            .await
            .context("Failed to parse Rekor index response")
    }

    async fn fetch_entry(&self, uuid: &str) -> Result<HashMap<String, LogEntry>> {
        let url = format!("{}/api/v1/log/entries/{}", self.base_url, uuid);
        self.client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch Rekor entry")?
            .error_for_status()
            .context("Rekor rejected entry request")?
            .json()
            .await
            .context("Failed to parse Rekor entry")
    }

    /// Accept `entry` only if it is signed by the log and binds `cert` to the digest
    fn check_entry(
        &self,
        entry: &LogEntry,
        cert: &VerifiedCertificate,
        digest_hex: &str,
    ) -> Result<()> {
        let verification = entry
            .verification
            .as_ref()
            .ok_or_else(|| anyhow!("entry has no signed entry timestamp"))?;
        let set = BASE64
            .decode(&verification.signed_entry_timestamp)
            .context("Invalid signed entry timestamp encoding")?;
        let canonical = serde_json::to_vec(&SignedEntryPayload {
            body: &entry.body,
            integrated_time: entry.integrated_time,
            log_id: &entry.log_id,
            log_index: entry.log_index,
        })?;

        let signed_by_log = self
            .public_keys
            .iter()
            .filter(|k| k.hex_id() == entry.log_id)
            .any(|k| k.verify(&canonical, &set).is_ok());
        if !signed_by_log {
            bail!("signed entry timestamp does not verify under the log key");
        }

        let body: HashedRekord = serde_json::from_slice(
            &BASE64.decode(&entry.body).context("Invalid entry body encoding")?,
        )
        .context("Entry body is not a hashedrekord")?;
        if body.kind != "hashedrekord" {
            bail!("unexpected entry kind {}", body.kind);
        }
        let hash = &body.spec.data.hash;
        if hash.algorithm != "sha256" || !hash.value.eq_ignore_ascii_case(digest_hex) {
            bail!("entry digest does not match payload");
        }

        let cert_pem = BASE64
            .decode(&body.spec.signature.public_key.content)
            .context("Invalid entry public key encoding")?;
        let entry_cert = pem::parse(cert_pem).context("Entry public key is not PEM")?;
        if entry_cert.contents() != cert.der.as_slice() {
            bail!("entry was made with a different certificate");
        }

        let integrated = UNIX_EPOCH + Duration::from_secs(entry.integrated_time.max(0) as u64);
        if !cert.is_valid_at(integrated) {
            bail!("entry integrated outside the certificate validity window");
        }
        Ok(())
    }
}

#[async_trait]
impl TransparencyLog for RekorClient {
    fn url(&self) -> &str {
        &self.base_url
    }

    fn public_keys(&self) -> &[TransparencyKey] {
        &self.public_keys
    }

    async fn verify_inclusion(
        &self,
        cert: &VerifiedCertificate,
        payload: &[u8],
    ) -> std::result::Result<(), BoxError> {
        let digest_hex = hex::encode(Sha256::digest(payload));
        let uuids = self.find_entry_uuids(&digest_hex).await?;
        debug!("Rekor returned {} candidate entr(ies)", uuids.len());

        for uuid in &uuids {
            for (id, entry) in self.fetch_entry(uuid).await? {
                match self.check_entry(&entry, cert, &digest_hex) {
                    Ok(()) => {
                        debug!("Rekor entry {} at index {} matches", id, entry.log_index);
                        return Ok(());
                    }
                    Err(e) => warn!("Ignoring Rekor entry {}: {}", id, e),
                }
            }
        }
        Err("no transparency log entry binds this certificate to the payload".into())
    }
}
