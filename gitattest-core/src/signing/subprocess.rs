//! Signing through an external program
//!
//! The payload goes to the program's stdin, the detached signature comes back
//! on stdout. Stdin is fed from its own task while stdout and stderr are
//! drained, so a payload larger than the pipe buffer cannot deadlock against a
//! program that starts writing before it has read everything.

use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{SigningCommand, SigningPlan};
use crate::config::ConfigStore;
use crate::context::OperationContext;
use crate::error::{Result, SignatureError};

/// Signs payloads with the program named by the current Git configuration
#[derive(Clone)]
pub struct SubprocessSigner {
    store: Arc<dyn ConfigStore>,
}

impl SubprocessSigner {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Re-read configuration and resolve a fresh plan
    pub async fn plan(&self) -> Result<SigningPlan> {
        let config = self.store.read_raw().await?;
        SigningPlan::from_config(&config)
    }

    /// Program and arguments the next `sign` call would run
    pub async fn signing_command(&self) -> Result<SigningCommand> {
        self.plan().await?.command()
    }

    /// Produce a detached signature over `payload`
    #[tracing::instrument(skip(self, ctx, payload), fields(payload_len = payload.len()))]
    pub async fn sign(&self, ctx: &OperationContext, payload: &[u8]) -> Result<String> {
        let plan = self.plan().await?;
        let command = plan.command()?;
        debug!(method = %plan.method, "Signing with {} {:?}", command.program, command.args);

        ctx.guard(run_signing_program(&command, payload))
            .await
            .map_err(|reason| SignatureError::Interrupted {
                stage: "signing program",
                reason,
            })?
    }
}

async fn run_signing_program(command: &SigningCommand, payload: &[u8]) -> Result<String> {
    let program = command.program.clone();

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SignatureError::SpawnSigningProgram {
            program: program.clone(),
            source,
        })?;

    let writer = child.stdin.take().map(|mut stdin| {
        let payload = payload.to_vec();
        tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
            // stdin dropped here: the program sees end of input
        })
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| SignatureError::SigningIo {
            program: program.clone(),
            source,
        })?;

    let write_result = match writer {
        Some(handle) => handle
            .await
            .map_err(std::io::Error::other)
            .and_then(|result| result),
        None => Ok(()),
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        return Err(SignatureError::SigningProgramFailed {
            program,
            status: output.status,
            stderr,
        });
    }

    // Some helpers (gitsign, pinentry wrappers) print status text on success
    if !stderr.is_empty() {
        warn!("{}: {}", program, stderr);
    }

    if output.stdout.is_empty() {
        return Err(SignatureError::UnableToSign);
    }

    write_result.map_err(|source| SignatureError::SigningIo {
        program: program.clone(),
        source,
    })?;

    info!("Signed {} bytes with {}", payload.len(), program);
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
