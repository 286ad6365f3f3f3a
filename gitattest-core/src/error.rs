//! Error taxonomy for signing and verification
//!
//! Every failure the library surfaces maps to exactly one variant, so callers
//! can branch on the category while the underlying diagnostic stays attached
//! through `source()`.

use std::process::ExitStatus;
use thiserror::Error;

/// Boxed low-level cause carried by the wrapping variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Signing and verification errors
#[derive(Error, Debug)]
pub enum SignatureError {
    /// SSH signing was selected but `user.signingkey` is empty
    #[error("signing key not specified in git config")]
    SigningKeyNotSpecified,

    /// `gpg.format` or a private-key block label names no supported scheme
    #[error("unknown signing method '{method}' (not one of gpg, ssh, x509)")]
    UnknownSigningMethod { method: String },

    /// The signing program exited successfully without printing a signature
    #[error("unable to sign Git object: signing program produced no output")]
    UnableToSign,

    /// A trust decision failed: wrong key, tampered data, untrusted certificate
    /// or identity/inclusion mismatch
    #[error("incorrect key provided to verify signature")]
    IncorrectVerificationKey {
        #[source]
        source: Option<BoxError>,
    },

    /// Infrastructure failure while assembling keyless verification inputs
    #[error("unable to verify Sigstore signature")]
    VerifyingSigstoreSignature {
        #[source]
        source: BoxError,
    },

    /// The SSH public key or signature envelope could not be parsed
    #[error("unable to verify SSH signature")]
    VerifyingSshSignature {
        #[source]
        source: BoxError,
    },

    /// The OpenPGP certificate or detached signature could not be parsed
    #[error("unable to verify GPG signature")]
    VerifyingGpgSignature {
        #[source]
        source: BoxError,
    },

    /// Signature bytes match none of the recognized armor headers
    #[error("unable to parse signature / signature has unexpected header")]
    InvalidSignature,

    /// `git config` could not be queried
    #[error("unable to read Git config: {stderr}")]
    ConfigRead {
        stderr: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// `git config --local` could not persist a value
    #[error("unable to set '{key}' to '{value}': {stderr}")]
    ConfigWrite {
        key: String,
        value: String,
        stderr: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The signing program could not be started
    #[error("failed to run signing program '{program}'")]
    SpawnSigningProgram {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The signing program exited with a failure status
    #[error("signing program '{program}' failed ({status}): {stderr}")]
    SigningProgramFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Streaming the payload to or from the signing program failed
    #[error("I/O error while talking to signing program '{program}'")]
    SigningIo {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Private key material could not be parsed or used for signing
    #[error("unable to sign with the provided key material")]
    KeyMaterial {
        #[source]
        source: BoxError,
    },

    /// The operation was cancelled or ran past its deadline
    #[error("{stage} interrupted: {reason}")]
    Interrupted {
        stage: &'static str,
        reason: crate::context::Interrupted,
    },
}

impl SignatureError {
    pub(crate) fn incorrect_key(source: impl Into<BoxError>) -> Self {
        SignatureError::IncorrectVerificationKey {
            source: Some(source.into()),
        }
    }

    pub(crate) fn sigstore(source: impl Into<BoxError>) -> Self {
        SignatureError::VerifyingSigstoreSignature {
            source: source.into(),
        }
    }

    pub(crate) fn ssh(source: impl Into<BoxError>) -> Self {
        SignatureError::VerifyingSshSignature {
            source: source.into(),
        }
    }

    pub(crate) fn gpg(source: impl Into<BoxError>) -> Self {
        SignatureError::VerifyingGpgSignature {
            source: source.into(),
        }
    }

    pub(crate) fn key_material(source: impl Into<BoxError>) -> Self {
        SignatureError::KeyMaterial {
            source: source.into(),
        }
    }

    /// True when the error is a trust decision rather than a systemic failure
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, SignatureError::IncorrectVerificationKey { .. })
    }

    /// Log trust violations on the `security` target
    pub fn log_if_security_critical(&self) {
        if let SignatureError::IncorrectVerificationKey { source } = self {
            match source {
                Some(cause) => {
                    tracing::error!(target: "security", "SIGNATURE REJECTED: {}: {}", self, cause)
                }
                None => tracing::error!(target: "security", "SIGNATURE REJECTED: {}", self),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SignatureError>;
