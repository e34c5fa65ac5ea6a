use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ra_panel::config::PanelConfig;
use ra_panel::telemetry::{self, LogFormat};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "ra-panel")]
#[command(version, about = "Repository analysis control panel")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding ra.toml, the catalog and the workspace (defaults to cwd)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Explicit config file instead of ra.toml discovery
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write daily-rotated logs to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the browser control panel
    Serve {
        /// Port to listen on (overrides ra.toml and RA_PANEL_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Do not open a browser
        #[arg(long)]
        no_open: bool,

        /// Development mode: bind all interfaces, permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Run one catalog command against a target and stream its output
    Run {
        /// Target directory name in the workspace
        target: String,
        /// Catalog entry name
        command: String,
    },
    /// List targets and their generated reports
    Targets,
    /// List catalog entries
    Catalog,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default ra.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = telemetry::init_tracing(cli.verbose, cli.log_format, cli.log_dir.as_deref())?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.config.as_deref(), command.clone())?
        }
        Commands::Serve { port, no_open, dev } => {
            let config = PanelConfig::load(&project_dir, cli.config.as_deref())?;
            cmd::cmd_serve(config, *port, !*no_open, *dev).await?;
        }
        Commands::Run { target, command } => {
            let config = PanelConfig::load(&project_dir, cli.config.as_deref())?;
            let code = cmd::cmd_run(config, target, command).await?;
            if code != 0 {
                drop(_log_guard);
                std::process::exit(code);
            }
        }
        Commands::Targets => {
            let config = PanelConfig::load(&project_dir, cli.config.as_deref())?;
            cmd::cmd_targets(&config)?;
        }
        Commands::Catalog => {
            let config = PanelConfig::load(&project_dir, cli.config.as_deref())?;
            cmd::cmd_catalog(&config)?;
        }
    }

    Ok(())
}
