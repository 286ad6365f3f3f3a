//! In-process SSH signing (`SSHSIG` envelopes)

use ed25519_dalek::pkcs8::DecodePrivateKey as _;
use rsa::pkcs1::DecodeRsaPrivateKey as _;
use ssh_key::private::{EcdsaKeypair, Ed25519Keypair, KeypairData, RsaKeypair};
use ssh_key::{HashAlg, LineEnding, PrivateKey};
use tracing::debug;

use super::key_material::KeyBlockLabel;
use super::SSH_SIGNATURE_NAMESPACE;
use crate::error::{Result, SignatureError};

/// Parse an SSH-usable private key from a PEM block
///
/// `OPENSSH PRIVATE KEY` is the native container. `RSA PRIVATE KEY` (PKCS#1)
/// and `PRIVATE KEY` (PKCS#8: RSA, ECDSA P-256 or Ed25519) are converted into the same
/// in-memory representation.
pub(crate) fn parse_private_key(
    label: KeyBlockLabel,
    pem_bytes: &[u8],
    der: &[u8],
) -> Result<PrivateKey> {
    let key = match label {
        KeyBlockLabel::OpenSsh => {
            PrivateKey::from_openssh(pem_bytes).map_err(SignatureError::key_material)?
        }
        KeyBlockLabel::Rsa => {
            let rsa_key =
                rsa::RsaPrivateKey::from_pkcs1_der(der).map_err(SignatureError::key_material)?;
            rsa_private_key(rsa_key)?
        }
        KeyBlockLabel::Pkcs8 => {
            if let Ok(rsa_key) = rsa::RsaPrivateKey::from_pkcs8_der(der) {
                rsa_private_key(rsa_key)?
            } else if let Ok(secret) = p256::SecretKey::from_pkcs8_der(der) {
                let keypair = EcdsaKeypair::NistP256 {
                    public: secret.public_key().into(),
                    private: secret.into(),
                };
                PrivateKey::new(KeypairData::Ecdsa(keypair), "")
                    .map_err(SignatureError::key_material)?
            } else {
                let signing_key = ed25519_dalek::SigningKey::from_pkcs8_der(der)
                    .map_err(SignatureError::key_material)?;
                let keypair = Ed25519Keypair::from_seed(&signing_key.to_bytes());
                PrivateKey::new(KeypairData::Ed25519(keypair), "")
                    .map_err(SignatureError::key_material)?
            }
        }
        KeyBlockLabel::OpenPgp => {
            return Err(SignatureError::UnknownSigningMethod {
                method: label.as_str().to_string(),
            })
        }
    };

    if key.is_encrypted() {
        return Err(SignatureError::key_material(
            "encrypted SSH private keys are not supported",
        ));
    }

    Ok(key)
}

fn rsa_private_key(rsa_key: rsa::RsaPrivateKey) -> Result<PrivateKey> {
    let keypair = RsaKeypair::try_from(rsa_key).map_err(SignatureError::key_material)?;
    PrivateKey::new(KeypairData::Rsa(keypair), "").map_err(SignatureError::key_material)
}

/// Sign `payload` with SHA-512 under the Git namespace and armor the envelope
pub(crate) fn sign(key: &PrivateKey, payload: &[u8]) -> Result<String> {
    debug!("Signing with SSH {} key", key.algorithm());

    let signature = key
        .sign(SSH_SIGNATURE_NAMESPACE, HashAlg::Sha512, payload)
        .map_err(SignatureError::key_material)?;

    signature
        .to_pem(LineEnding::LF)
        .map_err(SignatureError::key_material)
}
