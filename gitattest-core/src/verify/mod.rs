//! Signature verification
//!
//! A [`TrustKey`] names the credential expected to have produced a signature.
//! Its variant selects the verification protocol; the signature's armor header
//! has to agree with it.

mod gpg;
mod ssh;

pub use gpg::verify_gpg;
pub use ssh::verify_ssh;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::OperationContext;
use crate::error::{Result, SignatureError};
use crate::keyless::{KeylessBackend, KeylessVerifier};

/// Expected keyless signer: OIDC issuer plus certificate subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylessIdentity {
    pub issuer: String,
    #[serde(rename = "identity")]
    pub subject: String,
}

impl KeylessIdentity {
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for KeylessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (issuer {})", self.subject, self.issuer)
    }
}

/// Verification credential
///
/// Serialized like a TUF key record: `{"keytype": ..., "keyval": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "keytype", content = "keyval")]
pub enum TrustKey {
    /// Armored OpenPGP certificate
    #[serde(rename = "gpg")]
    Gpg { public: String },
    /// OpenSSH public key line (`ssh-ed25519 AAAA...`)
    #[serde(rename = "ssh")]
    Ssh { public: String },
    /// Keyless identity checked against a Fulcio certificate
    #[serde(rename = "sigstore-oidc")]
    Keyless(KeylessIdentity),
}

impl TrustKey {
    pub fn gpg(public: impl Into<String>) -> Self {
        TrustKey::Gpg {
            public: public.into(),
        }
    }

    pub fn ssh(public: impl Into<String>) -> Self {
        TrustKey::Ssh {
            public: public.into(),
        }
    }

    pub fn keyless(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        TrustKey::Keyless(KeylessIdentity::new(issuer, subject))
    }

    /// Signature encoding this key can verify
    pub fn expected_encoding(&self) -> SignatureEncoding {
        match self {
            TrustKey::Gpg { .. } => SignatureEncoding::OpenPgp,
            TrustKey::Ssh { .. } => SignatureEncoding::Ssh,
            TrustKey::Keyless(_) => SignatureEncoding::SignedMessage,
        }
    }
}

/// Wire encoding of a signature, inferred from its armor header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// `-----BEGIN PGP SIGNATURE-----`
    OpenPgp,
    /// `-----BEGIN SSH SIGNATURE-----`
    Ssh,
    /// `-----BEGIN SIGNED MESSAGE-----` (CMS, as produced by gitsign and gpgsm)
    SignedMessage,
}

impl SignatureEncoding {
    const OPENPGP_HEADER: &'static [u8] = b"-----BEGIN PGP SIGNATURE-----";
    const SSH_HEADER: &'static [u8] = b"-----BEGIN SSH SIGNATURE-----";
    const SIGNED_MESSAGE_HEADER: &'static [u8] = b"-----BEGIN SIGNED MESSAGE-----";

    pub fn detect(signature: &[u8]) -> Option<Self> {
        let start = signature
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(signature.len());
        let signature = &signature[start..];

        if signature.starts_with(Self::OPENPGP_HEADER) {
            Some(SignatureEncoding::OpenPgp)
        } else if signature.starts_with(Self::SSH_HEADER) {
            Some(SignatureEncoding::Ssh)
        } else if signature.starts_with(Self::SIGNED_MESSAGE_HEADER) {
            Some(SignatureEncoding::SignedMessage)
        } else {
            None
        }
    }
}

impl fmt::Display for SignatureEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureEncoding::OpenPgp => f.write_str("OpenPGP"),
            SignatureEncoding::Ssh => f.write_str("SSH"),
            SignatureEncoding::SignedMessage => f.write_str("CMS signed message"),
        }
    }
}

/// Verifies signatures for any [`TrustKey`]
///
/// Keyless trust keys need a [`KeylessBackend`]; a verifier built with
/// [`Verifier::without_keyless`] handles GPG and SSH only.
#[derive(Clone)]
pub struct Verifier {
    keyless: Option<KeylessVerifier>,
}

impl Verifier {
    pub fn new(keyless_backend: Arc<dyn KeylessBackend>) -> Self {
        Self {
            keyless: Some(KeylessVerifier::new(keyless_backend)),
        }
    }

    pub fn without_keyless() -> Self {
        Self { keyless: None }
    }

    /// Verify `signature` over `payload` for `trust_key`
    #[tracing::instrument(skip_all, fields(encoding = tracing::field::Empty))]
    pub async fn verify(
        &self,
        ctx: &OperationContext,
        trust_key: &TrustKey,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let encoding =
            SignatureEncoding::detect(signature).ok_or(SignatureError::InvalidSignature)?;
        tracing::Span::current().record("encoding", tracing::field::display(encoding));

        let expected = trust_key.expected_encoding();
        if encoding != expected {
            return Err(SignatureError::incorrect_key(format!(
                "trust key verifies {expected} signatures, got {encoding} signature"
            )));
        }

        debug!("Dispatching {} signature verification", encoding);

        let result = match trust_key {
            TrustKey::Gpg { public } => verify_gpg(public, payload, signature),
            TrustKey::Ssh { public } => verify_ssh(public, payload, signature),
            TrustKey::Keyless(identity) => match &self.keyless {
                Some(keyless) => keyless.verify(ctx, identity, payload, signature).await,
                None => Err(SignatureError::sigstore("no keyless backend configured")),
            },
        };

        match &result {
            Ok(()) => info!("{} signature verified", encoding),
            Err(e) => e.log_if_security_critical(),
        }
        result
    }
}
