//! CLI Commands
//!
//! Every resource kind shares the same verbs; the kind only picks the
//! [`Resource`] implementation the engine drives.

pub mod config;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use driftless_common::DeletePolicy;
use driftless_provider::{CreateOptions, Deleted, Engine, Resource};

use crate::output::{print_item, print_success, print_warnings, OutputFormat};

#[derive(Subcommand)]
pub enum ResourceCommands {
    /// Create a resource, or converge an existing one, from a TOML spec
    Apply {
        /// Desired state file
        #[arg(short, long)]
        spec: PathBuf,

        /// Existing resource id; omitted means create
        #[arg(long)]
        id: Option<u64>,

        /// Spec applied by the previous convergence
        #[arg(long)]
        prior: Option<PathBuf>,

        /// Keep a partially created resource when provisioning fails
        #[arg(long)]
        no_compensate: bool,
    },

    /// Show the observed state of a resource
    Get {
        /// Resource id
        id: u64,
    },

    /// Delete a resource
    Delete {
        /// Resource id
        id: u64,

        /// Skip the recycle bin
        #[arg(long)]
        permanently: bool,

        /// Leave attached disks and networks in place
        #[arg(long)]
        keep_dependents: bool,
    },
}

pub async fn execute<R>(cmd: ResourceCommands, engine: &Engine, format: OutputFormat) -> Result<()>
where
    R: Resource,
    R::Spec: DeserializeOwned,
{
    match cmd {
        ResourceCommands::Apply {
            spec,
            id,
            prior,
            no_compensate,
        } => {
            let desired: R::Spec = read_spec(&spec)?;
            let prior: Option<R::Spec> = prior.as_deref().map(read_spec::<R::Spec>).transpose()?;

            let converged = match id {
                Some(id) => engine.update::<R>(id, &desired, prior.as_ref()).await?,
                None => {
                    let options = CreateOptions {
                        compensate: !no_compensate,
                    };
                    engine.create::<R>(&desired, options).await?
                }
            };

            print_warnings(&converged.warnings);
            print_item(&converged.value, format)?;
        }

        ResourceCommands::Get { id } => match engine.read::<R>(id).await? {
            Some(observed) => print_item(&observed, format)?,
            None => anyhow::bail!("{} {} not found", R::KIND, id),
        },

        ResourceCommands::Delete {
            id,
            permanently,
            keep_dependents,
        } => {
            let policy = DeletePolicy {
                permanently,
                detach_dependents: !keep_dependents,
            };
            match engine.delete::<R>(id, policy).await? {
                Deleted::Removed => print_success(&format!("{} {} deleted", R::KIND, id)),
                Deleted::AlreadyAbsent => {
                    print_success(&format!("{} {} already absent", R::KIND, id))
                }
            }
        }
    }

    Ok(())
}

/// Parse a desired-state file
pub fn read_spec<S: DeserializeOwned>(path: &Path) -> Result<S> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid spec {}", path.display()))
}
