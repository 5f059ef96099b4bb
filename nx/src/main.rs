//! nx: distributed terminal orchestration.
//!
//! A stateless CLI over a fleet of tmux nodes reached through
//! multiplexed SSH. Sessions are named `<node>/<session>`; most
//! commands also accept a bare session name and resolve it across the
//! fleet.

#![forbid(unsafe_code)]

mod attach;
mod commands;
mod dashboard;
mod nodes;
mod output;
mod resolve;
mod snapshot;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nexus_common::{CancelToken, FleetConfig, NxError, SshTransport};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "nx")]
#[command(author, version, about = "nx — distributed terminal orchestration")]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Path to the fleet config (default: ~/.config/nexus/fleet.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tmux sessions across all fleet nodes
    #[command(visible_alias = "l")]
    List,

    /// Create a new detached session
    New {
        /// Session name
        name: String,
        /// Target node (default: the fleet's default node)
        #[arg(long)]
        on: Option<String>,
        /// Working directory for the session
        #[arg(long)]
        dir: Option<String>,
        /// Command to run (default: the fleet's default command)
        #[arg(trailing_var_arg = true)]
        cmd: Vec<String>,
    },

    /// Attach to a session, aware of tmux nesting
    Attach {
        /// Session name (bare or node/session)
        name: String,
    },

    /// Print the last lines of a session's pane
    Peek {
        /// Session name (bare or node/session)
        name: String,
    },

    /// Print session scrollback
    Logs {
        /// Session name (bare or node/session)
        name: String,
        /// Lines of scrollback (default: 100 on a terminal, full when piped)
        #[arg(long)]
        lines: Option<u32>,
    },

    /// Send keys to a session
    Send {
        /// Pass keys verbatim without appending Enter
        #[arg(long)]
        raw: bool,
        /// Session name (bare or node/session)
        name: String,
        /// Keys to send
        #[arg(required = true, allow_hyphen_values = true)]
        keys: Vec<String>,
    },

    /// Kill a session
    Kill {
        /// Session name (bare or node/session)
        name: String,
    },

    /// Reap exited sessions across the fleet
    Gc {
        /// Show what would be reaped without reaping
        #[arg(long)]
        dry_run: bool,
        /// Only consider sessions with this name
        name: Option<String>,
    },

    /// Open a read-only dashboard of every live session
    Dash,

    /// Save or restore fleet state
    #[command(subcommand)]
    Snap(SnapCommands),

    /// Manage fleet nodes
    #[command(subcommand)]
    Nodes(NodesCommands),
}

#[derive(Subcommand)]
enum SnapCommands {
    /// Snapshot all live sessions to disk
    Save,
    /// Re-create sessions from the last snapshot
    Restore {
        /// Only restore sessions on this node
        #[arg(long)]
        node: Option<String>,
    },
}

#[derive(Subcommand)]
enum NodesCommands {
    /// Show fleet nodes with reachability, tmux version, and config drift
    Ls,
    /// Onboard an ssh host into the fleet
    Add {
        /// Host alias from ~/.ssh/config
        host: String,
    },
    /// Remove a host from the fleet
    Rm {
        /// Host alias to remove
        host: String,
    },
    /// List ssh hosts not yet in the fleet
    Discover,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err
            .downcast_ref::<NxError>()
            .map(NxError::exit_code)
            .unwrap_or(2);
        eprintln!("Error: {err}");
        std::process::exit(code);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Abort early when a required external tool is missing, rather than
/// failing mid-resolution with a spawn error.
fn ensure_dependencies() -> Result<(), NxError> {
    for tool in ["tmux", "fzf"] {
        which::which(tool).map_err(|_| {
            NxError::MissingDependency(format!("'{tool}' was not found on PATH; install it first."))
        })?;
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = FleetConfig::load(cli.config.as_deref())?;
    ensure_dependencies()?;

    let transport = SshTransport;
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::List => commands::list(&config, &transport, &cancel).await,
        Commands::New { name, on, dir, cmd } => {
            commands::new_session(&config, &transport, &name, on, dir, &cmd).await
        }
        Commands::Attach { name } => attach::run(&config, &transport, &cancel, &name).await,
        Commands::Peek { name } => commands::peek(&config, &transport, &cancel, &name).await,
        Commands::Logs { name, lines } => {
            commands::logs(&config, &transport, &cancel, &name, lines).await
        }
        Commands::Send { raw, name, keys } => {
            commands::send(&config, &transport, &cancel, &name, &keys, raw).await
        }
        Commands::Kill { name } => commands::kill(&config, &transport, &cancel, &name).await,
        Commands::Gc { dry_run, name } => {
            commands::gc(&config, &transport, &cancel, dry_run, name.as_deref()).await
        }
        Commands::Dash => dashboard::run(&config, &transport, &cancel).await,
        Commands::Snap(SnapCommands::Save) => {
            snapshot::run_save(&config, &transport, &cancel).await
        }
        Commands::Snap(SnapCommands::Restore { node }) => {
            snapshot::run_restore(&transport, node.as_deref()).await
        }
        Commands::Nodes(NodesCommands::Ls) => nodes::run_ls(&config, &transport).await,
        Commands::Nodes(NodesCommands::Add { host }) => {
            nodes::run_add(config, &transport, &host, cli.config.as_deref()).await
        }
        Commands::Nodes(NodesCommands::Rm { host }) => {
            nodes::run_rm(config, &host, cli.config.as_deref())
        }
        Commands::Nodes(NodesCommands::Discover) => nodes::run_discover(&config),
    }
}
