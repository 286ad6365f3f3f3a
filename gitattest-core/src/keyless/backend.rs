//! Network-backed keyless backend: TUF trust root, Rekor log, embedded SCTs

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::config::KeylessConfig;
use super::crypto::TransparencyKey;
use super::rekor::RekorClient;
use super::trust::TrustMaterial;
use super::{
    CertificatePools, CertificateVerifier, CmsVerifier, KeylessBackend, TransparencyLog,
    VerifiedCertificate,
};
use crate::error::BoxError;

/// Public Sigstore (or a private deployment) as a [`KeylessBackend`]
///
/// Trust material is loaded on first use and kept for the backend's lifetime.
pub struct SigstoreBackend {
    client: reqwest::Client,
    config: KeylessConfig,
    trust: OnceCell<TrustMaterial>,
}

impl SigstoreBackend {
    pub fn new(config: KeylessConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        info!(
            "Sigstore backend: Fulcio {}, Rekor {}",
            config.fulcio_url, config.rekor_url
        );
        Ok(Self {
            client,
            config,
            trust: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &KeylessConfig {
        &self.config
    }

    async fn trust(&self) -> Result<&TrustMaterial, BoxError> {
        let material = self
            .trust
            .get_or_try_init(|| TrustMaterial::load(&self.config))
            .await?;
        Ok(material)
    }
}

#[async_trait]
impl KeylessBackend for SigstoreBackend {
    async fn fetch_pools(&self) -> Result<CertificatePools, BoxError> {
        let pools = self.trust().await?.pools()?;
        if pools.is_empty() {
            return Err("trust material has no Fulcio root".into());
        }
        Ok(pools)
    }

    fn certificate_verifier(
        &self,
        pools: &CertificatePools,
    ) -> Result<Box<dyn CertificateVerifier>, BoxError> {
        if pools.is_empty() {
            return Err("no trusted Fulcio roots".into());
        }
        Ok(Box::new(CmsVerifier::new(pools)))
    }

    async fn connect_log(&self) -> Result<Box<dyn TransparencyLog>, BoxError> {
        let keys = self.trust().await?.rekor_keys.clone();
        let rekor = RekorClient::new(self.client.clone(), self.config.rekor_url.clone(), keys)?;
        Ok(Box::new(rekor))
    }

    async fn ct_log_keys(&self) -> Result<Vec<TransparencyKey>, BoxError> {
        let keys = self.trust().await?.ct_log_keys.clone();
        if keys.is_empty() {
            return Err("no CT log public keys in trust material".into());
        }
        for key in &keys {
            debug!("Using CT log key {}", key.hex_id());
        }
        Ok(keys)
    }

    fn verify_sct(
        &self,
        cert: &VerifiedCertificate,
        ct_log_keys: &[TransparencyKey],
    ) -> Result<(), BoxError> {
        cert.verify_scts(ct_log_keys)
    }
}
