//! In-process OpenPGP signing

use sequoia_openpgp as openpgp;

use openpgp::armor;
use openpgp::cert::{Cert, CertParser};
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::stream::{Armorer, Message, Signer};
use std::io::Write;
use tracing::debug;

use crate::error::{Result, SignatureError};

/// Produce an ASCII-armored detached signature over `payload`
///
/// The key ring may hold several certificates. The first certificate in the
/// ring is used, together with its first unencrypted, currently valid
/// signing-capable key.
pub(crate) fn sign(armored_key_ring: &[u8], payload: &[u8]) -> Result<String> {
    let certs = CertParser::from_bytes(armored_key_ring)
        .map_err(SignatureError::key_material)?
        .collect::<openpgp::Result<Vec<Cert>>>()
        .map_err(SignatureError::key_material)?;

    let cert = certs
        .into_iter()
        .next()
        .ok_or_else(|| SignatureError::key_material("OpenPGP key ring is empty"))?;

    let policy = StandardPolicy::new();
    let keypair = cert
        .keys()
        .unencrypted_secret()
        .with_policy(&policy, None)
        .supported()
        .alive()
        .revoked(false)
        .for_signing()
        .next()
        .ok_or_else(|| {
            SignatureError::key_material(format!(
                "certificate {} has no usable unencrypted signing key",
                cert.fingerprint()
            ))
        })?
        .key()
        .clone()
        .into_keypair()
        .map_err(SignatureError::key_material)?;

    debug!("Signing with OpenPGP key {}", keypair.public().fingerprint());

    let mut sink = Vec::new();
    {
        let message = Message::new(&mut sink);
        let message = Armorer::new(message)
            .kind(armor::Kind::Signature)
            .build()
            .map_err(SignatureError::key_material)?;
        let mut signer = Signer::new(message, keypair)
            .detached()
            .build()
            .map_err(SignatureError::key_material)?;
        signer
            .write_all(payload)
            .map_err(SignatureError::key_material)?;
        signer.finalize().map_err(SignatureError::key_material)?;
    }

    String::from_utf8(sink).map_err(SignatureError::key_material)
}
