//! Client configuration commands

use anyhow::Result;
use clap::Subcommand;
use std::path::Path;

use driftless_common::ClientConfig;

use crate::output::{print_item, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn execute(
    cmd: ConfigCommands,
    path: &Path,
    effective: &ClientConfig,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let mut shown = effective.clone();
            if shown.token.is_some() {
                shown.token = Some("********".to_string());
            }
            print_item(&shown, format)?;
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ClientConfig::default().save(path)?;
            print_success(&format!("Wrote {}", path.display()));
        }
    }
    Ok(())
}
