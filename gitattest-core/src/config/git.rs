//! `git config` backed store
//!
//! In-process parsing cannot reproduce Git's own merging of
//! system, global and local scopes (includes, conditional includes, env
//! overrides), so every read shells out to the Git binary.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{parse_config_output, ConfigMap, ConfigStore, KeyCase};
use crate::context::OperationContext;
use crate::error::{Result, SignatureError};

/// Configuration store that queries the `git` CLI
#[derive(Debug, Clone)]
pub struct GitConfigStore {
    git: PathBuf,
    repo_dir: Option<PathBuf>,
    ctx: OperationContext,
}

impl Default for GitConfigStore {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
            repo_dir: None,
            ctx: OperationContext::new(),
        }
    }
}

/// Captured result of one `git` invocation
struct GitOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl GitConfigStore {
    /// Store for the repository containing the current directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Store for the repository at `dir` (runs `git -C <dir>`)
    pub fn for_repository(dir: impl AsRef<Path>) -> Self {
        Self {
            repo_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Use a specific Git binary
    pub fn with_git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    /// Bound every query by `ctx`
    pub fn with_context(mut self, ctx: OperationContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Run git with `args`; spawn and pipe failures go through `io_error`
    async fn run_git(
        &self,
        args: &[&str],
        io_error: impl FnOnce(std::io::Error) -> SignatureError,
    ) -> Result<GitOutput> {
        let mut cmd = Command::new(&self.git);
        if let Some(dir) = &self.repo_dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {} {:?}", self.git.display(), args);

        let output = self
            .ctx
            .guard(cmd.output())
            .await
            .map_err(|reason| SignatureError::Interrupted {
                stage: "git config",
                reason,
            })?
            .map_err(io_error)?;

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn query(&self, case: KeyCase) -> Result<ConfigMap> {
        let output = self
            .run_git(&["config", "--get-regexp", ".*"], |e| {
                SignatureError::ConfigRead {
                    stderr: e.to_string(),
                    source: Some(e),
                }
            })
            .await?;

        if !output.success {
            // Exit code 1 with nothing on stderr means "no entries matched"
            if output.code == Some(1) && output.stderr.is_empty() && output.stdout.is_empty() {
                debug!("Git config is empty");
                return Ok(ConfigMap::new());
            }
            return Err(SignatureError::ConfigRead {
                stderr: output.stderr,
                source: None,
            });
        }

        let config = parse_config_output(&output.stdout, case);
        debug!("Read {} Git config entries", config.len());
        Ok(config)
    }
}

#[async_trait]
impl ConfigStore for GitConfigStore {
    async fn read(&self) -> Result<ConfigMap> {
        self.query(KeyCase::Lowercase).await
    }

    async fn read_raw(&self) -> Result<ConfigMap> {
        self.query(KeyCase::Verbatim).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        let write_error = |stderr: String, source: Option<std::io::Error>| SignatureError::ConfigWrite {
            key: key.to_string(),
            value: value.to_string(),
            stderr,
            source,
        };

        let output = self
            .run_git(&["config", "--local", key, value], |e| {
                write_error(e.to_string(), Some(e))
            })
            .await?;

        if !output.success {
            return Err(write_error(output.stderr, None));
        }

        debug!("Set Git config '{}' at local scope", key);
        Ok(())
    }
}
