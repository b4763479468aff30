//! `galaxyctl list` and `galaxyctl show`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use gravity_core::{RegisteredConfig, StateDocument};
use gravity_renderer::{program_name, Renderer};

use super::App;
use crate::GlobalArgs;

/// Arguments for `galaxyctl list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "type")]
    config_type: String,
    #[tabled(rename = "instance")]
    instance: String,
    #[tabled(rename = "process manager")]
    process_manager: String,
    #[tabled(rename = "services")]
    services: usize,
    #[tabled(rename = "registered")]
    registered: String,
    #[tabled(rename = "config file")]
    config_file: String,
}

#[derive(Serialize)]
struct ConfigJson<'a> {
    config_file: &'a Path,
    config_type: String,
    instance_name: &'a str,
    process_manager: String,
    services: Vec<&'a str>,
    registered_at: Option<String>,
}

impl ListArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let app = App::open(global)?;
        let doc = app.store.load().context("failed to load gravity state")?;

        if self.json {
            let configs: Vec<ConfigJson> = doc
                .config_files
                .values()
                .map(|c| ConfigJson {
                    config_file: &c.config_file,
                    config_type: c.config_type.to_string(),
                    instance_name: c.instance_name.as_str(),
                    process_manager: c.process_manager.to_string(),
                    services: c.services.iter().map(|s| s.service_name.as_str()).collect(),
                    registered_at: c.registered_at.map(|t| t.to_rfc3339()),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&configs).context("failed to serialize config list")?
            );
            return Ok(());
        }

        if doc.config_files.is_empty() {
            println!("No config files registered.");
            println!("Run: galaxyctl register /path/to/galaxy.yml");
            return Ok(());
        }

        let rows: Vec<ConfigRow> = doc
            .config_files
            .values()
            .map(|c| ConfigRow {
                config_type: c.config_type.to_string(),
                instance: c.instance_name.to_string(),
                process_manager: c.process_manager.to_string(),
                services: c.services.len(),
                registered: c
                    .registered_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                config_file: c.config_file.display().to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");

        if !doc.remove_configs.is_empty() {
            println!(
                "{} deregistered config(s) pending removal; run `galaxyctl update`.",
                doc.remove_configs.len()
            );
        }
        Ok(())
    }
}

/// Arguments for `galaxyctl show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Instance name or config file path.
    pub target: String,
}

impl ShowArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let app = App::open(global)?;
        let doc = app.store.load().context("failed to load gravity state")?;
        let configs = select(&doc, &self.target)?;
        let renderer = Renderer::new().context("failed to load unit templates")?;

        for config in configs {
            print_config(&renderer, config, &app.settings.state_dir);
        }
        Ok(())
    }
}

/// Configs of instance `target`, else the config registered at path `target`.
fn select<'a>(doc: &'a StateDocument, target: &str) -> Result<Vec<&'a RegisteredConfig>> {
    let by_instance: Vec<&RegisteredConfig> = doc
        .config_files
        .values()
        .filter(|c| c.instance_name.as_str() == target)
        .collect();
    if !by_instance.is_empty() {
        return Ok(by_instance);
    }

    let mut path = PathBuf::from(target);
    if path.is_relative() {
        path = std::env::current_dir()
            .context("failed to read the current directory")?
            .join(path);
    }
    match doc.config_files.get(&path) {
        Some(config) => Ok(vec![config]),
        None => bail!("'{target}' is neither a registered instance nor a registered config file"),
    }
}

fn print_config(renderer: &Renderer, config: &RegisteredConfig, state_dir: &Path) {
    let attribs = &config.attribs;
    println!("{}", config.config_file.display().to_string().bold());
    println!("  type:            {}", config.config_type);
    println!("  instance:        {}", config.instance_name);
    println!("  process manager: {}", config.process_manager);
    if let Some(root) = &attribs.galaxy_root {
        println!("  galaxy root:     {}", root.display());
    }
    if let Some(venv) = &attribs.virtualenv {
        println!("  virtualenv:      {}", venv.display());
    }
    println!("  log dir:         {}", attribs.log_dir.display());
    println!(
        "  bind:            {}:{}",
        attribs.bind_address, attribs.bind_port
    );

    if config.services.is_empty() {
        println!("  services:        none yet (run `galaxyctl update`)");
        return;
    }
    println!("  services:");
    for service in &config.services {
        let name = program_name(config.config_type, &config.instance_name, &service.service_name);
        println!("    {} [{}]", name.cyan(), service.service_type);
        match renderer.command(config, service, state_dir) {
            Ok(command) => println!("      {command}"),
            Err(e) => println!("      {} {e}", "cannot render command:".red()),
        }
    }
}
