//! gitattest core library
//!
//! Signs Git objects with GPG, SSH or X.509 tooling and verifies detached
//! signatures made with OpenPGP keys, SSH keys or Sigstore keyless
//! certificates, reporting every failure through one error taxonomy.

pub mod config;
pub mod context;
pub mod error;
pub mod keyless;
pub mod signing;
pub mod verify;

pub use config::{ConfigMap, ConfigStore, GitConfigStore};
pub use context::OperationContext;
pub use error::{Result, SignatureError};
pub use signing::{sign_with_key, signing_command, SigningMethod, SigningPlan, SubprocessSigner};
pub use verify::{KeylessIdentity, TrustKey, Verifier};
