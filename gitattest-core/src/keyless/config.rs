//! Keyless verification settings
//!
//! Sources, lowest precedence first: built-in defaults, an optional YAML file,
//! the repository's `gitsign.*` git config keys, then environment variables.
//! Trust material comes from the Sigstore TUF repository unless PEM files are
//! named here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ConfigMap;

pub const DEFAULT_FULCIO_URL: &str = "https://fulcio.sigstore.dev";
pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";

/// Git config keys read by [`KeylessConfig::apply_config_map`]
pub mod keys {
    pub const FULCIO: &str = "gitsign.fulcio";
    pub const REKOR: &str = "gitsign.rekor";
}

/// Environment overrides
pub mod env {
    pub const FULCIO: &str = "GITSIGN_FULCIO_URL";
    pub const REKOR: &str = "GITSIGN_REKOR_URL";
    pub const CT_LOG_PUBLIC_KEY_FILE: &str = "SIGSTORE_CT_LOG_PUBLIC_KEY_FILE";
    pub const ROOT_FILE: &str = "SIGSTORE_ROOT_FILE";
    pub const REKOR_PUBLIC_KEY: &str = "SIGSTORE_REKOR_PUBLIC_KEY";
}

/// Sigstore endpoints and trust material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylessConfig {
    /// Fulcio base URL (certificate authority)
    #[serde(default = "default_fulcio_url")]
    pub fulcio_url: String,

    /// Rekor base URL (transparency log)
    #[serde(default = "default_rekor_url")]
    pub rekor_url: String,

    /// PEM files holding Fulcio root and intermediate certificates
    #[serde(default)]
    pub fulcio_roots: Vec<PathBuf>,

    /// PEM files holding Rekor public keys
    #[serde(default)]
    pub rekor_public_keys: Vec<PathBuf>,

    /// PEM files holding certificate-transparency log public keys
    #[serde(default)]
    pub ct_log_public_keys: Vec<PathBuf>,

    /// Where the TUF client caches trust-root metadata (default: in memory)
    #[serde(default)]
    pub tuf_cache_dir: Option<PathBuf>,

    /// Per-request HTTP timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_fulcio_url() -> String {
    DEFAULT_FULCIO_URL.to_string()
}

fn default_rekor_url() -> String {
    DEFAULT_REKOR_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for KeylessConfig {
    fn default() -> Self {
        Self {
            fulcio_url: default_fulcio_url(),
            rekor_url: default_rekor_url(),
            fulcio_roots: Vec::new(),
            rekor_public_keys: Vec::new(),
            ct_log_public_keys: Vec::new(),
            tuf_cache_dir: None,
            timeout_seconds: default_timeout(),
        }
    }
}

impl KeylessConfig {
    /// Load settings from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading keyless config from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read keyless config {}", path.display()))?;
        let config: KeylessConfig =
            serde_yaml_ng::from_str(&content).context("Failed to parse keyless config YAML")?;

        debug!("Fulcio {}, Rekor {}", config.fulcio_url, config.rekor_url);
        Ok(config)
    }

    /// Defaults overlaid with `gitsign.*` entries from git config
    pub fn from_config_map(config: &ConfigMap) -> Self {
        let mut out = Self::default();
        out.apply_config_map(config);
        out
    }

    pub fn apply_config_map(&mut self, config: &ConfigMap) {
        if let Some(url) = config.get(keys::FULCIO) {
            self.fulcio_url = url.clone();
        }
        if let Some(url) = config.get(keys::REKOR) {
            self.rekor_url = url.clone();
        }
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(env::FULCIO) {
            debug!("Fulcio URL overridden by {}", env::FULCIO);
            self.fulcio_url = url;
        }
        if let Ok(url) = std::env::var(env::REKOR) {
            debug!("Rekor URL overridden by {}", env::REKOR);
            self.rekor_url = url;
        }
        add_env_path(&mut self.fulcio_roots, env::ROOT_FILE);
        add_env_path(&mut self.rekor_public_keys, env::REKOR_PUBLIC_KEY);
        add_env_path(&mut self.ct_log_public_keys, env::CT_LOG_PUBLIC_KEY_FILE);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn add_env_path(paths: &mut Vec<PathBuf>, var: &str) {
    if let Ok(path) = std::env::var(var) {
        let path = PathBuf::from(path);
        if !paths.contains(&path) {
            debug!("Trust file {} added by {}", path.display(), var);
            paths.push(path);
        }
    }
}
