//! SSH signature verification

use ssh_key::{PublicKey, SshSig};
use tracing::debug;

use crate::error::{Result, SignatureError};
use crate::signing::SSH_SIGNATURE_NAMESPACE;

/// Verify an armored `SSHSIG` envelope over `payload` against an OpenSSH
/// public key
///
/// Unparseable keys or envelopes are structural failures
/// ([`SignatureError::VerifyingSshSignature`]); a signature that parses but
/// does not verify is a trust failure
/// ([`SignatureError::IncorrectVerificationKey`]).
pub fn verify_ssh(public_key: &str, payload: &[u8], signature: &[u8]) -> Result<()> {
    let public_key = PublicKey::from_openssh(public_key.trim()).map_err(SignatureError::ssh)?;
    let envelope = SshSig::from_pem(signature).map_err(SignatureError::ssh)?;

    debug!(
        "Verifying SSH signature ({} key, {} hash)",
        public_key.algorithm(),
        envelope.hash_alg().as_str()
    );

    public_key
        .verify(SSH_SIGNATURE_NAMESPACE, payload, &envelope)
        .map_err(SignatureError::incorrect_key)
}
