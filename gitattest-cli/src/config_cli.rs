//! `gitattest config` subcommands

use anyhow::Result;
use clap::Parser;

use gitattest_core::ConfigStore;

#[derive(Parser, Debug)]
pub enum ConfigCommand {
    /// Print merged configuration (keys lowercased), or a single key
    Get {
        /// Key to print
        key: Option<String>,
    },

    /// Set a value in the repository's local configuration
    Set { key: String, value: String },
}

impl ConfigCommand {
    pub async fn execute(self, store: &dyn ConfigStore) -> Result<()> {
        match self {
            ConfigCommand::Get { key: Some(key) } => {
                let config = store.read().await?;
                match config.get(&key.to_lowercase()) {
                    Some(value) => println!("{value}"),
                    None => anyhow::bail!("{key} is not set"),
                }
            }
            ConfigCommand::Get { key: None } => {
                for (key, value) in store.read().await? {
                    println!("{key} {value}");
                }
            }
            ConfigCommand::Set { key, value } => {
                store.write(&key, &value).await?;
            }
        }
        Ok(())
    }
}
