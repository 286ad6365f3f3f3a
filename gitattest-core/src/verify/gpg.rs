//! OpenPGP detached signature verification

use sequoia_openpgp as openpgp;

use anyhow::anyhow;
use openpgp::cert::{Cert, CertParser};
use openpgp::parse::stream::{
    DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationHelper,
};
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::KeyHandle;
use tracing::debug;

use crate::error::{Result, SignatureError};

/// Supplies the trusted certificates and accepts the message only if at
/// least one signature in the first signature group is good
struct TrustedCerts {
    certs: Vec<Cert>,
}

impl VerificationHelper for TrustedCerts {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.certs.clone())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                if results.iter().any(|result| result.is_ok()) {
                    return Ok(());
                }
                return Err(anyhow!("no valid signature from the trusted key"));
            }
        }
        Err(anyhow!("no signature found"))
    }
}

/// Verify an ASCII-armored detached OpenPGP signature over `payload`
pub fn verify_gpg(public_key: &str, payload: &[u8], signature: &[u8]) -> Result<()> {
    let certs = CertParser::from_bytes(public_key.as_bytes())
        .map_err(SignatureError::gpg)?
        .collect::<openpgp::Result<Vec<Cert>>>()
        .map_err(SignatureError::gpg)?;
    if certs.is_empty() {
        return Err(SignatureError::gpg("no OpenPGP certificate in trust key"));
    }

    debug!("Verifying OpenPGP signature against {} certificate(s)", certs.len());

    let policy = StandardPolicy::new();
    let mut verifier = DetachedVerifierBuilder::from_bytes(signature)
        .map_err(SignatureError::gpg)?
        .with_policy(&policy, None, TrustedCerts { certs })
        .map_err(SignatureError::gpg)?;

    verifier
        .verify_bytes(payload)
        .map_err(SignatureError::incorrect_key)
}
