//! Configuration view and validation commands: `ra-panel config`.

use std::path::Path;

use anyhow::Result;
use console::style;
use ra_panel::config::{CONFIG_FILE_NAME, PanelConfig, RaToml};

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dir.join(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = PanelConfig::load(project_dir, explicit)?;
            println!();
            println!("{}", style("RA Panel Configuration").bold());
            println!("======================");
            println!();
            match config.source() {
                Some(source) => println!("Config file: {}", source.display()),
                None => {
                    println!("No {} found. Using defaults.", CONFIG_FILE_NAME);
                    println!("Run 'ra-panel config init' to create one.");
                }
            }
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();
            println!("Effective paths (with env overrides):");
            println!("  workspace   = {}", config.workspace_root().display());
            println!("  command_dir = {}", config.command_dir().display());
            println!("  catalog     = {}", config.catalog_path().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = PanelConfig::load(project_dir, explicit)?;
            if config.source().is_none() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
                return Ok(());
            }

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("{}", style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            RaToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [workspace] root, command_dir, catalog");
            println!("  - [panel] host, port");
            println!("  - [docs] install, build, serve commands and base_port");
            println!();
        }
    }

    Ok(())
}
