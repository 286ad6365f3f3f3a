//! Signing method resolution and signers
//!
//! Resolution is a pure function of a [`ConfigMap`]: it decides which scheme
//! to use, which key to sign with and which external program to run. The
//! signers consume that decision:
//!
//! - [`SubprocessSigner`] shells out to `gpg`, `ssh-keygen`, `gpgsm` or
//!   whatever program the configuration names
//! - [`sign_with_key`] signs in-process from raw private-key bytes

mod gpg;
mod key_material;
mod ssh;
mod subprocess;

pub use key_material::{sign_with_key, KeyBlockLabel};
pub use subprocess::SubprocessSigner;

use std::fmt;

use crate::config::ConfigMap;
use crate::error::{Result, SignatureError};

/// Namespace bound into every SSH signature envelope
pub const SSH_SIGNATURE_NAMESPACE: &str = "git";

pub const DEFAULT_SIGNING_PROGRAM_GPG: &str = "gpg";
pub const DEFAULT_SIGNING_PROGRAM_SSH: &str = "ssh-keygen";
pub const DEFAULT_SIGNING_PROGRAM_X509: &str = "gpgsm";

/// Configuration keys consulted by the resolver
pub mod keys {
    pub const FORMAT: &str = "gpg.format";
    pub const SIGNING_KEY: &str = "user.signingkey";
    pub const GPG_PROGRAM: &str = "gpg.program";
    pub const SSH_PROGRAM: &str = "gpg.ssh.program";
    pub const X509_PROGRAM: &str = "gpg.x509.program";
}

/// Signature scheme selected by `gpg.format`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMethod {
    Gpg,
    Ssh,
    X509,
}

impl SigningMethod {
    /// Resolve the method from configuration; an absent format means GPG
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        match config.get(keys::FORMAT).map(String::as_str) {
            None | Some("gpg") => Ok(SigningMethod::Gpg),
            Some("ssh") => Ok(SigningMethod::Ssh),
            Some("x509") => Ok(SigningMethod::X509),
            Some(other) => Err(SignatureError::UnknownSigningMethod {
                method: other.to_string(),
            }),
        }
    }

    /// Program to run when the configuration does not override it
    pub fn default_program(&self) -> &'static str {
        match self {
            SigningMethod::Gpg => DEFAULT_SIGNING_PROGRAM_GPG,
            SigningMethod::Ssh => DEFAULT_SIGNING_PROGRAM_SSH,
            SigningMethod::X509 => DEFAULT_SIGNING_PROGRAM_X509,
        }
    }

    fn program_key(&self) -> &'static str {
        match self {
            SigningMethod::Gpg => keys::GPG_PROGRAM,
            SigningMethod::Ssh => keys::SSH_PROGRAM,
            SigningMethod::X509 => keys::X509_PROGRAM,
        }
    }
}

impl fmt::Display for SigningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningMethod::Gpg => f.write_str("gpg"),
            SigningMethod::Ssh => f.write_str("ssh"),
            SigningMethod::X509 => f.write_str("x509"),
        }
    }
}

/// Resolved signing decision, rebuilt for every signing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningPlan {
    pub method: SigningMethod,
    /// Key identifier (`user.signingkey`), empty when not configured
    pub key: String,
    pub program: String,
}

/// Program and arguments for one signing invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SigningPlan {
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        let method = SigningMethod::from_config(config)?;
        let key = config.get(keys::SIGNING_KEY).cloned().unwrap_or_default();
        let program = config
            .get(method.program_key())
            .cloned()
            .unwrap_or_else(|| method.default_program().to_string());

        Ok(SigningPlan {
            method,
            key,
            program,
        })
    }

    /// Build the process invocation for this plan
    pub fn command(&self) -> Result<SigningCommand> {
        let args = match self.method {
            // b -> detach-sign, s -> sign, a -> armor, u -> local-user
            SigningMethod::Gpg | SigningMethod::X509 => {
                if self.key.is_empty() {
                    vec!["-bsa".to_string()]
                } else {
                    vec!["-bsau".to_string(), self.key.clone()]
                }
            }
            SigningMethod::Ssh => {
                if self.key.is_empty() {
                    return Err(SignatureError::SigningKeyNotSpecified);
                }
                vec![
                    "-Y".to_string(),
                    "sign".to_string(),
                    "-n".to_string(),
                    SSH_SIGNATURE_NAMESPACE.to_string(),
                    "-f".to_string(),
                    self.key.clone(),
                ]
            }
        };

        Ok(SigningCommand {
            program: self.program.clone(),
            args,
        })
    }
}

/// Resolve the signing command straight from configuration
pub fn signing_command(config: &ConfigMap) -> Result<SigningCommand> {
    SigningPlan::from_config(config)?.command()
}
