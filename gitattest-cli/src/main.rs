//! gitattest - sign and verify Git objects
//!
//! `sign` reads an object from stdin (or a file) and prints a detached
//! signature; `verify` checks a signature against a trust-key record.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gitattest_core::keyless::{KeylessBackend, KeylessConfig, SigstoreBackend};
use gitattest_core::{
    sign_with_key, ConfigStore, GitConfigStore, OperationContext, SubprocessSigner, TrustKey,
    Verifier,
};

mod config_cli;

use config_cli::ConfigCommand;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "gitattest",
    about = "Sign and verify Git objects with GPG, SSH or Sigstore keyless identities",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,

    /// Repository whose Git configuration is used (default: current directory)
    #[clap(long, global = true)]
    repo: Option<PathBuf>,

    /// Give up on external programs and network calls after this many seconds
    #[clap(long, default_value = "60", global = true)]
    timeout: u64,
}

#[derive(Parser, Debug)]
enum Command {
    /// Produce a detached signature for an object
    Sign {
        /// Private key file to sign with in-process instead of the configured program
        #[clap(long)]
        key: Option<PathBuf>,

        /// Object to sign ("-" or omitted for stdin)
        input: Option<PathBuf>,
    },

    /// Verify a detached signature
    Verify {
        /// Trust-key record (JSON: {"keytype": ..., "keyval": {...}})
        #[clap(long)]
        trust_key: PathBuf,

        /// Signature file
        #[clap(long)]
        signature: PathBuf,

        /// Keyless settings (YAML)
        #[clap(long)]
        keyless_config: Option<PathBuf>,

        /// Signed object ("-" or omitted for stdin)
        input: Option<PathBuf>,
    },

    /// Read or write Git configuration
    Config {
        #[clap(subcommand)]
        command: ConfigCommand,
    },

    /// Print the signing program and arguments the configuration selects
    SigningCommand,
}

/// Initialize tracing with CLI flags
fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    // Logs go to stderr: stdout carries signatures
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.json_logs);

    let ctx = OperationContext::with_timeout(Duration::from_secs(cli.timeout));
    let store = config_store(cli.repo.as_deref(), &ctx);

    match cli.command {
        Command::Sign { key, input } => sign_command(&ctx, store, key, input).await,
        Command::Verify {
            trust_key,
            signature,
            keyless_config,
            input,
        } => verify_command(&ctx, &store, trust_key, signature, keyless_config, input).await,
        Command::Config { command } => command.execute(&store).await,
        Command::SigningCommand => signing_command(store).await,
    }
}

fn config_store(repo: Option<&Path>, ctx: &OperationContext) -> GitConfigStore {
    let store = match repo {
        Some(dir) => GitConfigStore::for_repository(dir),
        None => GitConfigStore::new(),
    };
    store.with_context(ctx.clone())
}

/// Read a file, or stdin for `None` / `-`
async fn read_input(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) if path != Path::new("-") => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn sign_command(
    ctx: &OperationContext,
    store: GitConfigStore,
    key: Option<PathBuf>,
    input: Option<PathBuf>,
) -> Result<()> {
    let payload = read_input(input.as_deref()).await?;

    let signature = match key {
        Some(key_path) => {
            let key_bytes = tokio::fs::read(&key_path)
                .await
                .with_context(|| format!("Failed to read key {}", key_path.display()))?;
            sign_with_key(&payload, &key_bytes)?
        }
        None => SubprocessSigner::new(Arc::new(store)).sign(ctx, &payload).await?,
    };

    print!("{signature}");
    Ok(())
}

async fn verify_command(
    ctx: &OperationContext,
    store: &GitConfigStore,
    trust_key_path: PathBuf,
    signature_path: PathBuf,
    keyless_config: Option<PathBuf>,
    input: Option<PathBuf>,
) -> Result<()> {
    let record = tokio::fs::read_to_string(&trust_key_path)
        .await
        .with_context(|| format!("Failed to read trust key {}", trust_key_path.display()))?;
    let trust_key: TrustKey =
        serde_json::from_str(&record).context("Failed to parse trust key record")?;
    let signature = tokio::fs::read(&signature_path)
        .await
        .with_context(|| format!("Failed to read signature {}", signature_path.display()))?;
    let payload = read_input(input.as_deref()).await?;

    let verifier = match &trust_key {
        TrustKey::Keyless(_) => {
            Verifier::new(keyless_backend(store, keyless_config.as_deref()).await?)
        }
        TrustKey::Gpg { .. } | TrustKey::Ssh { .. } => Verifier::without_keyless(),
    };
    verifier
        .verify(ctx, &trust_key, &payload, &signature)
        .await
        .context("Signature verification failed")?;

    println!("Good signature");
    Ok(())
}

/// Keyless backend from YAML settings, `gitsign.*` config and the environment
async fn keyless_backend(
    store: &GitConfigStore,
    config_path: Option<&Path>,
) -> Result<Arc<dyn KeylessBackend>> {
    let mut config = match config_path {
        Some(path) => KeylessConfig::load(path).await?,
        None => KeylessConfig::default(),
    };

    match store.read().await {
        Ok(map) => config.apply_config_map(&map),
        Err(e) => debug!("Git config unavailable for keyless settings: {}", e),
    }
    config.apply_env();

    Ok(Arc::new(SigstoreBackend::new(config)?))
}

async fn signing_command(store: GitConfigStore) -> Result<()> {
    let command = SubprocessSigner::new(Arc::new(store))
        .signing_command()
        .await?;
    info!("Resolved signing program {}", command.program);

    println!("{} {}", command.program, command.args.join(" "));
    Ok(())
}
