//! `galaxyctl start|stop|restart|reload|graceful|status|shutdown`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use gravity_core::InstanceName;
use gravity_pm::{Operation, UpdateOptions};

use super::{update::update, App};
use crate::GlobalArgs;

/// Arguments shared by the lifecycle subcommands.
#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Instances to act on. Defaults to every registered instance.
    pub instances: Vec<String>,
}

impl ControlArgs {
    pub fn run(self, global: &GlobalArgs, op: Operation) -> Result<()> {
        let app = App::open(global)?;
        let router = app.router()?;
        let instances: Vec<InstanceName> =
            self.instances.into_iter().map(InstanceName::from).collect();

        if op == Operation::Start {
            update(&app, &router, UpdateOptions::default())?;
        }

        let dispatch = router
            .dispatch(op, &instances)
            .with_context(|| format!("{} failed", op.as_str()))?;

        for name in &dispatch.unknown {
            eprintln!("{} instance '{name}' is not registered", "warning:".yellow());
        }
        for (kind, output) in &dispatch.output {
            if dispatch.output.len() > 1 {
                println!("{}", kind.to_string().bold());
            }
            print!("{output}");
        }
        Ok(())
    }
}
