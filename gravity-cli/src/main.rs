//! galaxyctl: manage Galaxy server processes through systemd or supervisor.
//!
//! # Usage
//!
//! ```text
//! galaxyctl register <config>... [--galaxy-root <dir>]
//! galaxyctl deregister <instance|config>...
//! galaxyctl rename <old config> <new config>
//! galaxyctl list [--json]
//! galaxyctl show <instance|config>
//! galaxyctl update [--force] [--dry-run]
//! galaxyctl start|stop|restart|reload|graceful|status|shutdown [instance]...
//! ```
//!
//! Global flags: `--state-dir <dir>`, `--user`, `-v`, `-q`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{
    control::ControlArgs,
    info::{ListArgs, ShowArgs},
    registration::{DeregisterArgs, RegisterArgs, RenameArgs},
    update::UpdateArgs,
};
use gravity_pm::Operation;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "galaxyctl",
    version,
    about = "Manage Galaxy server processes",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Where registrations and supervisor files live.
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Manage systemd user units instead of system units.
    #[arg(long, global = true)]
    pub user: bool,

    /// Debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register config files.
    Register(RegisterArgs),

    /// Deregister configs by instance name or path.
    Deregister(DeregisterArgs),

    /// Move a registration to a new config path.
    Rename(RenameArgs),

    /// List registered configs.
    List(ListArgs),

    /// Show one registered config and its services.
    Show(ShowArgs),

    /// Reconcile registrations and converge process manager units.
    Update(UpdateArgs),

    /// Update, then start instances.
    Start(ControlArgs),

    /// Stop instances.
    Stop(ControlArgs),

    /// Restart instances.
    Restart(ControlArgs),

    /// Reload instances.
    Reload(ControlArgs),

    /// Gracefully reload instances.
    Graceful(ControlArgs),

    /// Show process status.
    Status(ControlArgs),

    /// Stop instances and the process manager daemon, if any.
    Shutdown(ControlArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(global: &GlobalArgs) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if global.verbose {
        "debug"
    } else if global.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.global);
    let global = cli.global;
    match cli.command {
        Commands::Register(args) => args.run(&global),
        Commands::Deregister(args) => args.run(&global),
        Commands::Rename(args) => args.run(&global),
        Commands::List(args) => args.run(&global),
        Commands::Show(args) => args.run(&global),
        Commands::Update(args) => args.run(&global),
        Commands::Start(args) => args.run(&global, Operation::Start),
        Commands::Stop(args) => args.run(&global, Operation::Stop),
        Commands::Restart(args) => args.run(&global, Operation::Restart),
        Commands::Reload(args) => args.run(&global, Operation::Reload),
        Commands::Graceful(args) => args.run(&global, Operation::Graceful),
        Commands::Status(args) => args.run(&global, Operation::Status),
        Commands::Shutdown(args) => args.run(&global, Operation::Shutdown),
    }
}
