//! Sigstore trust material: Fulcio certificates plus Rekor and CT log keys
//!
//! The public-good instance publishes all three through its TUF repository.
//! PEM files named in [`KeylessConfig`] replace the matching category, which
//! is how private deployments and air-gapped hosts supply their own roots.

use anyhow::{Context, Result};
use rustls_pki_types::CertificateDer;
use sigstore::trust::TrustRoot;
use std::path::Path;

use super::config::KeylessConfig;
use super::crypto::TransparencyKey;
use super::CertificatePools;
use crate::error::BoxError;

/// Certificates and keys a keyless verification is anchored to
#[derive(Debug, Clone, Default)]
pub struct TrustMaterial {
    /// Fulcio roots and intermediates
    pub fulcio_certs: Vec<CertificateDer<'static>>,
    /// Rekor signing keys
    pub rekor_keys: Vec<TransparencyKey>,
    /// Certificate-transparency log keys
    pub ct_log_keys: Vec<TransparencyKey>,
}

impl TrustMaterial {
    /// Copy the material out of a sigstore trust root
    pub fn from_trust_root(root: &impl TrustRoot) -> std::result::Result<Self, BoxError> {
        let fulcio_certs = root
            .fulcio_certs()
            .map_err(|e| format!("trust root has no usable Fulcio certificates: {e}"))?
            .into_iter()
            .map(CertificateDer::into_owned)
            .collect();
        let rekor_keys = root
            .rekor_keys()
            .map_err(|e| format!("trust root has no usable Rekor keys: {e}"))?
            .into_iter()
            .map(|spki| TransparencyKey::from_spki_der(spki.to_vec()))
            .collect();
        let ct_log_keys = root
            .ctfe_keys()
            .map_err(|e| format!("trust root has no usable CT log keys: {e}"))?
            .into_iter()
            .map(|spki| TransparencyKey::from_spki_der(spki.to_vec()))
            .collect();

        Ok(Self {
            fulcio_certs,
            rekor_keys,
            ct_log_keys,
        })
    }

    /// Read the override files named in `config`
    ///
    /// Categories without configured files stay empty.
    pub async fn read_overrides(config: &KeylessConfig) -> Result<Self> {
        let mut out = Self::default();
        for path in &config.fulcio_roots {
            let pem_bytes = read(path, "Fulcio root").await?;
            out.fulcio_certs.extend(
                parse_certificates(&pem_bytes)
                    .map_err(|e| anyhow::anyhow!("Invalid Fulcio root {}: {e}", path.display()))?,
            );
        }
        for path in &config.rekor_public_keys {
            let pem_bytes = read(path, "Rekor key").await?;
            out.rekor_keys.extend(
                TransparencyKey::from_pem(&pem_bytes)
                    .map_err(|e| anyhow::anyhow!("Invalid Rekor key {}: {e}", path.display()))?,
            );
        }
        for path in &config.ct_log_public_keys {
            let pem_bytes = read(path, "CT log key").await?;
            out.ct_log_keys.extend(
                TransparencyKey::from_pem(&pem_bytes)
                    .map_err(|e| anyhow::anyhow!("Invalid CT log key {}: {e}", path.display()))?,
            );
        }
        Ok(out)
    }

    /// True when every category is populated
    pub fn is_complete(&self) -> bool {
        !self.fulcio_certs.is_empty() && !self.rekor_keys.is_empty() && !self.ct_log_keys.is_empty()
    }

    /// Replace each category that `overrides` populates
    pub fn with_overrides(mut self, overrides: TrustMaterial) -> Self {
        if !overrides.fulcio_certs.is_empty() {
            self.fulcio_certs = overrides.fulcio_certs;
        }
        if !overrides.rekor_keys.is_empty() {
            self.rekor_keys = overrides.rekor_keys;
        }
        if !overrides.ct_log_keys.is_empty() {
            self.ct_log_keys = overrides.ct_log_keys;
        }
        self
    }

    pub fn pools(&self) -> std::result::Result<CertificatePools, BoxError> {
        CertificatePools::from_certificates(self.fulcio_certs.iter().cloned())
    }

    /// Override files first; the TUF trust root fills whatever they leave out
    #[cfg(feature = "network")]
    pub async fn load(config: &KeylessConfig) -> Result<Self> {
        use sigstore::trust::sigstore::SigstoreTrustRoot;

        let overrides = Self::read_overrides(config).await?;
        if overrides.is_complete() {
            tracing::debug!("Trust material taken entirely from configured files");
            return Ok(overrides);
        }
        if config.fulcio_url != super::config::DEFAULT_FULCIO_URL
            && overrides.fulcio_certs.is_empty()
        {
            anyhow::bail!(
                "Fulcio {} is not the public-good instance; configure fulcio_roots for it",
                config.fulcio_url
            );
        }

        let root = SigstoreTrustRoot::new(config.tuf_cache_dir.as_deref())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch Sigstore trust root: {e}"))?;
        let material = Self::from_trust_root(&root)
            .map_err(|e| anyhow::anyhow!("Invalid Sigstore trust root: {e}"))?
            .with_overrides(overrides);
        tracing::debug!(
            "Trust material: {} Fulcio certificate(s), {} Rekor key(s), {} CT log key(s)",
            material.fulcio_certs.len(),
            material.rekor_keys.len(),
            material.ct_log_keys.len()
        );
        Ok(material)
    }
}

async fn read(path: &Path, what: &str) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {what} {}", path.display()))
}

/// Every `CERTIFICATE` block in a PEM file
fn parse_certificates(
    pem_bytes: &[u8],
) -> std::result::Result<Vec<CertificateDer<'static>>, BoxError> {
    let blocks = pem::parse_many(pem_bytes)?;
    if blocks.is_empty() {
        return Err("no PEM block found".into());
    }
    blocks
        .into_iter()
        .map(|block| {
            if block.tag() != "CERTIFICATE" {
                return Err(format!("expected CERTIFICATE block, found {}", block.tag()).into());
            }
            Ok(CertificateDer::from(block.into_contents()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::EncodePublicKey;
    use pretty_assertions::assert_eq;
    use sigstore::trust::ManualTrustRoot;
    use std::path::PathBuf;

    fn spki() -> Vec<u8> {
        p256::SecretKey::random(&mut rand_core::OsRng)
            .public_key()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    fn public_good() -> ManualTrustRoot<'static> {
        ManualTrustRoot {
            fulcio_certs: vec![CertificateDer::from(vec![0x30, 0x00])],
            rekor_keys: vec![spki()],
            ctfe_keys: vec![spki(), spki()],
        }
    }

    #[test]
    fn test_trust_root_supplies_every_category() {
        let material = TrustMaterial::from_trust_root(&public_good()).unwrap();
        assert!(material.is_complete());
        assert_eq!(material.rekor_keys.len(), 1);
        assert_eq!(material.ct_log_keys.len(), 2);
    }

    #[test]
    fn test_overrides_replace_only_their_category() {
        let base = TrustMaterial::from_trust_root(&public_good()).unwrap();
        let rekor_before = base.rekor_keys.clone();
        let private_ct = TransparencyKey::from_spki_der(spki());

        let merged = base.with_overrides(TrustMaterial {
            ct_log_keys: vec![private_ct.clone()],
            ..Default::default()
        });
        assert_eq!(merged.ct_log_keys, vec![private_ct]);
        assert_eq!(merged.rekor_keys, rekor_before);
        assert_eq!(merged.fulcio_certs.len(), 1);
    }

    #[tokio::test]
    async fn test_read_overrides_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let ct_path = dir.path().join("ctfe.pub");
        let key = spki();
        std::fs::write(&ct_path, pem::encode(&pem::Pem::new("PUBLIC KEY", key.clone()))).unwrap();

        let config = KeylessConfig {
            ct_log_public_keys: vec![ct_path],
            ..Default::default()
        };
        let overrides = TrustMaterial::read_overrides(&config).await.unwrap();
        assert_eq!(overrides.ct_log_keys, vec![TransparencyKey::from_spki_der(key)]);
        assert!(overrides.fulcio_certs.is_empty());
        assert!(!overrides.is_complete());
    }

    #[tokio::test]
    async fn test_missing_override_file_fails() {
        let config = KeylessConfig {
            rekor_public_keys: vec![PathBuf::from("/nonexistent/rekor.pub")],
            ..Default::default()
        };
        let err = TrustMaterial::read_overrides(&config).await.unwrap_err();
        assert!(err.to_string().contains("Rekor key"));
    }

    #[test]
    fn test_certificate_file_label_is_checked() {
        let block = pem::encode(&pem::Pem::new("PUBLIC KEY", vec![0x30, 0x00]));
        assert!(parse_certificates(block.as_bytes()).is_err());
    }
}
