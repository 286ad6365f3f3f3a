//! Transparency and certificate-transparency log keys

use sha2::{Digest, Sha256};
use sigstore::crypto::{CosignVerificationKey, Signature};
use std::fmt;

use crate::error::BoxError;

/// Public key of a transparency or certificate-transparency log
///
/// Logs identify their keys by the SHA-256 of the `SubjectPublicKeyInfo` DER.
#[derive(Clone, PartialEq, Eq)]
pub struct TransparencyKey {
    id: [u8; 32],
    spki_der: Vec<u8>,
}

impl TransparencyKey {
    pub fn from_spki_der(spki_der: Vec<u8>) -> Self {
        let id = Sha256::digest(&spki_der).into();
        Self { id, spki_der }
    }

    /// Parse every `PUBLIC KEY` block in a PEM file
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Vec<Self>, BoxError> {
        let blocks = pem::parse_many(pem_bytes)?;
        if blocks.is_empty() {
            return Err("no PEM block found".into());
        }
        blocks
            .into_iter()
            .map(|block| {
                if block.tag() != "PUBLIC KEY" {
                    return Err(format!("expected PUBLIC KEY block, found {}", block.tag()).into());
                }
                Ok(Self::from_spki_der(block.into_contents()))
            })
            .collect()
    }

    pub fn id(&self) -> &[u8; 32] {
        &self.id
    }

    /// Hex log ID, as Rekor reports it
    pub fn hex_id(&self) -> String {
        hex::encode(self.id)
    }

    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Verify a DER signature made by this log
    ///
    /// The digest follows the key type: SHA-256 for P-256 logs.
    pub fn verify(&self, message: &[u8], signature_der: &[u8]) -> Result<(), BoxError> {
        let key = CosignVerificationKey::try_from_der(&self.spki_der)
            .map_err(|e| format!("unsupported log key {}: {e}", self.hex_id()))?;
        key.verify_signature(Signature::Raw(signature_der), message)
            .map_err(|e| format!("signature does not verify under log key {}: {e}", self.hex_id()))?;
        Ok(())
    }
}

impl fmt::Debug for TransparencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransparencyKey")
            .field("id", &self.hex_id())
            .finish()
    }
}
