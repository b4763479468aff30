//! `galaxyctl register`, `deregister` and `rename`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use gravity_core::{deregister, register, rename, RegisterOutcome};

use super::App;
use crate::GlobalArgs;

/// Arguments for `galaxyctl register`.
#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Galaxy, Reports or Tool Shed config files.
    #[arg(required = true)]
    pub config_files: Vec<PathBuf>,

    /// Galaxy checkout to use when a config does not set `galaxy_root`.
    #[arg(long, value_name = "DIR")]
    pub galaxy_root: Option<PathBuf>,
}

impl RegisterArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let app = App::open(global)?;
        let outcomes = register(
            &app.store,
            &app.parser,
            &app.settings,
            &self.config_files,
            self.galaxy_root.as_deref(),
        )
        .context("registration failed")?;

        let mut invalid = 0;
        for outcome in &outcomes {
            match outcome {
                RegisterOutcome::Registered {
                    path,
                    config_type,
                    instance_name,
                } => println!(
                    "{} {} ({config_type}, instance {instance_name})",
                    "registered".green(),
                    path.display()
                ),
                RegisterOutcome::AlreadyRegistered { path } => {
                    println!("{} {}", "already registered".yellow(), path.display())
                }
                RegisterOutcome::Invalid { error, .. } => {
                    invalid += 1;
                    eprintln!("{} {error}", "error:".red());
                }
            }
        }
        if invalid == outcomes.len() && invalid > 0 {
            bail!("no config files registered");
        }
        Ok(())
    }
}

/// Arguments for `galaxyctl deregister`.
#[derive(Args, Debug)]
pub struct DeregisterArgs {
    /// Instance names or config file paths.
    #[arg(required = true)]
    pub targets: Vec<String>,
}

impl DeregisterArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let app = App::open(global)?;
        let removed = deregister(&app.store, &self.targets).context("deregistration failed")?;
        if removed.is_empty() {
            println!("Nothing to deregister.");
            return Ok(());
        }
        for path in &removed {
            println!("{} {}", "deregistered".green(), path.display());
        }
        println!("Run `galaxyctl update` to remove their services.");
        Ok(())
    }
}

/// Arguments for `galaxyctl rename`.
#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Currently registered config path.
    pub old: PathBuf,
    /// New config path.
    pub new: PathBuf,
}

impl RenameArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let app = App::open(global)?;
        let config = rename(&app.store, &app.parser, &self.old, &self.new).with_context(|| {
            format!(
                "failed to rename {} to {}",
                self.old.display(),
                self.new.display()
            )
        })?;
        println!(
            "{} {} (instance {})",
            "renamed to".green(),
            config.config_file.display(),
            config.instance_name
        );
        Ok(())
    }
}
