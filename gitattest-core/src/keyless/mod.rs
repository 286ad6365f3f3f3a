//! Keyless (Sigstore) signature verification
//!
//! Verification runs in five stages. Stages that fetch inputs (roots, log
//! client, CT keys) fail as [`SignatureError::VerifyingSigstoreSignature`];
//! stages that make a trust decision fail as
//! [`SignatureError::IncorrectVerificationKey`]. Network access sits behind
//! [`KeylessBackend`] so the pipeline is independent of where roots and log
//! entries come from.

mod signed_message;
mod config;
mod crypto;
mod sct;
mod trust;

#[cfg(feature = "network")]
mod backend;
#[cfg(feature = "network")]
mod rekor;

pub use signed_message::CmsVerifier;
pub use config::KeylessConfig;
pub use crypto::TransparencyKey;
pub use trust::TrustMaterial;

#[cfg(feature = "network")]
pub use backend::SigstoreBackend;
#[cfg(feature = "network")]
pub use rekor::RekorClient;

use async_trait::async_trait;
use der::Decode;
use rustls_pki_types::CertificateDer;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};
use x509_cert::Certificate;

use crate::context::OperationContext;
use crate::error::{BoxError, Result, SignatureError};
use crate::verify::KeylessIdentity;

/// Trusted Fulcio certificates, DER
#[derive(Debug, Clone, Default)]
pub struct CertificatePools {
    pub roots: Vec<CertificateDer<'static>>,
    pub intermediates: Vec<CertificateDer<'static>>,
}

impl CertificatePools {
    /// Sort certificates into roots (self-issued) and intermediates
    pub fn from_certificates(
        certs: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> std::result::Result<Self, BoxError> {
        let mut pools = Self::default();
        for cert_der in certs {
            let cert = Certificate::from_der(&cert_der)?;
            let pool = if cert.tbs_certificate.subject == cert.tbs_certificate.issuer {
                &mut pools.roots
            } else {
                &mut pools.intermediates
            };
            if !pool.contains(&cert_der) {
                pool.push(cert_der);
            }
        }
        Ok(pools)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Signer certificate that passed chain and signature verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCertificate {
    /// Leaf certificate DER
    pub der: Vec<u8>,
    /// Issuer path above the leaf, nearest first
    pub chain: Vec<Vec<u8>>,
    /// OIDC issuer from the Fulcio extension
    pub issuer: Option<String>,
    /// First email or URI subject alternative name
    pub subject: Option<String>,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    /// `signingTime` signed attribute, when present
    pub signing_time: Option<SystemTime>,
}

impl VerifiedCertificate {
    /// True when `at` falls inside the leaf validity window
    pub fn is_valid_at(&self, at: SystemTime) -> bool {
        at >= self.not_before && at <= self.not_after
    }

    /// Require an embedded SCT that verifies under one of `ct_log_keys`
    pub fn verify_scts(&self, ct_log_keys: &[TransparencyKey]) -> std::result::Result<(), BoxError> {
        let issuer = self
            .chain
            .first()
            .ok_or("certificate chain has no issuer")?;
        sct::verify_embedded_scts(&self.der, issuer, ct_log_keys)
    }
}

/// Verifies a CMS signature and returns its signer certificate
pub trait CertificateVerifier: Send + Sync {
    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        enforce_tlog: bool,
    ) -> std::result::Result<VerifiedCertificate, BoxError>;
}

/// Client for a transparency log
#[async_trait]
pub trait TransparencyLog: Send + Sync {
    fn url(&self) -> &str;

    /// Keys the log signs entries with
    fn public_keys(&self) -> &[TransparencyKey];

    /// Confirm the log holds an entry binding `cert` to `payload`
    async fn verify_inclusion(
        &self,
        cert: &VerifiedCertificate,
        payload: &[u8],
    ) -> std::result::Result<(), BoxError>;
}

/// Source of keyless verification inputs
#[async_trait]
pub trait KeylessBackend: Send + Sync {
    /// Fetch Fulcio root and intermediate certificates
    async fn fetch_pools(&self) -> std::result::Result<CertificatePools, BoxError>;

    /// Build a certificate verifier bound to `pools`
    fn certificate_verifier(
        &self,
        pools: &CertificatePools,
    ) -> std::result::Result<Box<dyn CertificateVerifier>, BoxError>;

    /// Connect to the transparency log and load its keys
    async fn connect_log(&self) -> std::result::Result<Box<dyn TransparencyLog>, BoxError>;

    /// Load certificate-transparency log public keys
    async fn ct_log_keys(&self) -> std::result::Result<Vec<TransparencyKey>, BoxError>;

    /// Check the certificate's embedded SCTs against the CT keys
    fn verify_sct(
        &self,
        cert: &VerifiedCertificate,
        ct_log_keys: &[TransparencyKey],
    ) -> std::result::Result<(), BoxError>;
}

/// Inputs to the identity and inclusion stage
pub struct CheckOptions<'a> {
    pub pools: &'a CertificatePools,
    pub log: &'a dyn TransparencyLog,
    pub ct_log_keys: &'a [TransparencyKey],
    pub log_keys: &'a [TransparencyKey],
    pub identities: Vec<KeylessIdentity>,
}

impl CheckOptions<'_> {
    /// The certificate must carry one of the expected identities verbatim
    pub fn check_identity(
        &self,
        cert: &VerifiedCertificate,
    ) -> std::result::Result<(), BoxError> {
        let matches = |id: &KeylessIdentity| {
            cert.issuer.as_deref() == Some(id.issuer.as_str())
                && cert.subject.as_deref() == Some(id.subject.as_str())
        };
        if self.identities.iter().any(matches) {
            return Ok(());
        }
        Err(format!(
            "certificate identity {} (issuer {}) does not match expected {}",
            cert.subject.as_deref().unwrap_or("<none>"),
            cert.issuer.as_deref().unwrap_or("<none>"),
            self.identities
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )
        .into())
    }
}

/// Runs the keyless pipeline against a backend
#[derive(Clone)]
pub struct KeylessVerifier {
    backend: Arc<dyn KeylessBackend>,
}

impl KeylessVerifier {
    pub fn new(backend: Arc<dyn KeylessBackend>) -> Self {
        Self { backend }
    }

    #[tracing::instrument(skip_all, fields(subject = %identity.subject))]
    pub async fn verify(
        &self,
        ctx: &OperationContext,
        identity: &KeylessIdentity,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        // Stage 1: roots
        let pools = ctx
            .guard(self.backend.fetch_pools())
            .await
            .map_err(SignatureError::sigstore)?
            .map_err(SignatureError::sigstore)?;
        debug!(
            "Loaded {} root(s), {} intermediate(s)",
            pools.roots.len(),
            pools.intermediates.len()
        );

        // Stage 2: certificate and CMS signature
        let verifier = self
            .backend
            .certificate_verifier(&pools)
            .map_err(SignatureError::sigstore)?;
        let cert = verifier
            .verify(payload, signature, true)
            .map_err(SignatureError::incorrect_key)?;
        debug!("CMS signature verified");

        // Stage 3: transparency log
        let log = ctx
            .guard(self.backend.connect_log())
            .await
            .map_err(SignatureError::sigstore)?
            .map_err(SignatureError::sigstore)?;
        debug!("Connected to transparency log {}", log.url());

        // Stage 4: CT log keys
        let ct_log_keys = ctx
            .guard(self.backend.ct_log_keys())
            .await
            .map_err(SignatureError::sigstore)?
            .map_err(SignatureError::sigstore)?;

        // Stage 5: identity, SCT, inclusion
        let opts = CheckOptions {
            pools: &pools,
            log: log.as_ref(),
            ct_log_keys: &ct_log_keys,
            log_keys: log.public_keys(),
            identities: vec![identity.clone()],
        };
        opts.check_identity(&cert)
            .map_err(SignatureError::incorrect_key)?;
        self.backend
            .verify_sct(&cert, opts.ct_log_keys)
            .map_err(SignatureError::incorrect_key)?;
        ctx.guard(opts.log.verify_inclusion(&cert, payload))
            .await
            .map_err(|reason| SignatureError::Interrupted {
                stage: "transparency log inclusion",
                reason,
            })?
            .map_err(SignatureError::incorrect_key)?;

        info!("Keyless signature verified for {}", identity);
        Ok(())
    }
}

/// Run the keyless pipeline with `backend`
pub async fn verify_keyless(
    backend: Arc<dyn KeylessBackend>,
    ctx: &OperationContext,
    identity: &KeylessIdentity,
    payload: &[u8],
    signature: &[u8],
) -> Result<()> {
    KeylessVerifier::new(backend)
        .verify(ctx, identity, payload, signature)
        .await
}
