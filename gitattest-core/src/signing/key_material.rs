//! Signing from raw private-key bytes
//!
//! The key format is sniffed from its PEM label. OpenPGP armor is not valid
//! PEM (it carries headers and a CRC line), so a failed PEM decode is treated
//! as OpenPGP armor and handed to the OpenPGP signer, which rejects anything
//! it cannot parse.

use std::fmt;
use tracing::debug;

use super::{gpg, ssh};
use crate::error::{Result, SignatureError};

/// Private-key block labels this signer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBlockLabel {
    /// `PGP PRIVATE KEY BLOCK`
    OpenPgp,
    /// `OPENSSH PRIVATE KEY`
    OpenSsh,
    /// `RSA PRIVATE KEY` (PKCS#1)
    Rsa,
    /// `PRIVATE KEY` (PKCS#8)
    Pkcs8,
}

impl KeyBlockLabel {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "PGP PRIVATE KEY BLOCK" => Some(KeyBlockLabel::OpenPgp),
            "OPENSSH PRIVATE KEY" => Some(KeyBlockLabel::OpenSsh),
            "RSA PRIVATE KEY" => Some(KeyBlockLabel::Rsa),
            "PRIVATE KEY" => Some(KeyBlockLabel::Pkcs8),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyBlockLabel::OpenPgp => "PGP PRIVATE KEY BLOCK",
            KeyBlockLabel::OpenSsh => "OPENSSH PRIVATE KEY",
            KeyBlockLabel::Rsa => "RSA PRIVATE KEY",
            KeyBlockLabel::Pkcs8 => "PRIVATE KEY",
        }
    }

    fn is_ssh(&self) -> bool {
        !matches!(self, KeyBlockLabel::OpenPgp)
    }
}

impl fmt::Display for KeyBlockLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sign `payload` with the private key in `key_bytes`
///
/// Returns an ASCII-armored OpenPGP signature for OpenPGP keys and an armored
/// `SSHSIG` envelope for SSH-style keys.
pub fn sign_with_key(payload: &[u8], key_bytes: &[u8]) -> Result<String> {
    let block = match pem::parse(key_bytes) {
        Ok(block) => block,
        Err(e) => {
            debug!("Key is not plain PEM ({}), treating it as OpenPGP armor", e);
            return gpg::sign(key_bytes, payload);
        }
    };

    let label = KeyBlockLabel::parse(block.tag()).ok_or_else(|| {
        SignatureError::UnknownSigningMethod {
            method: block.tag().to_string(),
        }
    })?;

    debug!("Signing with {} key material", label);

    if label.is_ssh() {
        let key = ssh::parse_private_key(label, key_bytes, block.contents())?;
        ssh::sign(&key, payload)
    } else {
        gpg::sign(key_bytes, payload)
    }
}
