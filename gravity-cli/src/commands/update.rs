//! `galaxyctl update`: reconcile registrations, then converge the process
//! managers.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use gravity_core::{
    apply_changes, commit_changes, determine_changes, is_noop, ChangeSummary, ChangesByFile,
};
use gravity_pm::{Router, UpdateOptions, UpdateReport, WriteResult};

use super::App;
use crate::GlobalArgs;

/// Arguments for `galaxyctl update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Rewrite unit files and reload the process managers even if nothing
    /// changed.
    #[arg(long)]
    pub force: bool,

    /// Show what would change without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl UpdateArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let app = App::open(global)?;
        let router = app.router()?;
        let opts = UpdateOptions {
            force: self.force,
            dry_run: self.dry_run,
        };
        update(&app, &router, opts)
    }
}

/// determine → print → commit → converge. Dry runs converge against the
/// uncommitted preview.
pub fn update(app: &App, router: &Router, opts: UpdateOptions) -> Result<()> {
    let (changes, summary) =
        determine_changes(&app.store, &app.parser).context("failed to reconcile configs")?;
    print_changes(&changes, &summary, opts.dry_run);

    let dispatch = if opts.dry_run {
        let mut preview = app.store.load().context("failed to load gravity state")?;
        apply_changes(&mut preview, &changes, &summary);
        router.update_from(&preview, &[], opts)
    } else {
        if !is_noop(&changes, &summary) {
            commit_changes(&app.store, &changes, &summary)
                .context("failed to save reconciled state")?;
        }
        router.update(&[], opts)
    }
    .context("process manager update failed")?;

    for report in &dispatch.reports {
        print_report(report, opts.dry_run);
    }
    Ok(())
}

fn print_changes(changes: &ChangesByFile, summary: &ChangeSummary, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    for (path, change) in changes {
        if change.is_empty() {
            continue;
        }
        println!("{prefix}{} {}", "changed".yellow(), path.display());
        if let Some(name) = &change.update_instance_name {
            println!("    instance name: {} -> {name}", change.config.instance_name);
        }
        if change.update_attribs.is_some() {
            println!("    attributes updated");
        }
        if let Some(pm) = change.update_process_manager {
            println!("    process manager: {} -> {pm}", change.config.process_manager);
        }
        for service in &change.update_services {
            println!("    + {} [{}]", service.service_name, service.service_type);
        }
        for service in &change.remove_services {
            println!("    - {} [{}]", service.service_name, service.service_type);
        }
    }
    for path in summary.remove_configs.keys() {
        println!("{prefix}{} {}", "removing".red(), path.display());
    }
    for name in &summary.remove_instances {
        println!("{prefix}{} instance {name}", "removing".red());
    }
    for path in &summary.unreadable_configs {
        eprintln!("{} skipped unreadable config {}", "warning:".yellow(), path.display());
    }
}

fn print_report(report: &UpdateReport, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    if !report.changed() {
        tracing::debug!("{}: nothing to do", report.kind);
        return;
    }

    let written = report.writes.iter().filter(|w| w.is_change()).count();
    println!(
        "{prefix}✓ {} ({} written, {} unchanged, {} removed)",
        report.kind,
        written,
        report.writes.len() - written,
        report.removed.len()
    );
    for write in &report.writes {
        match write {
            WriteResult::Written { path } => println!("  ✎  {}", path.display()),
            WriteResult::WouldWrite { path } => println!("  ~  {}", path.display()),
            WriteResult::Unchanged { .. } => {}
        }
    }
    for path in &report.removed {
        println!("  ✗  {}", path.display());
    }
    for diff in &report.diffs {
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
    }
}
