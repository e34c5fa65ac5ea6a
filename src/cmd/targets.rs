//! Listing commands: `ra-panel targets` and `ra-panel catalog`.

use anyhow::Result;
use console::style;
use ra_panel::catalog::{Catalog, CommandCategory};
use ra_panel::config::PanelConfig;
use ra_panel::reports;
use ra_panel::workspace::{TargetKind, Workspace};

pub fn cmd_targets(config: &PanelConfig) -> Result<()> {
    let workspace = Workspace::new(config.workspace_root(), config.command_dir());
    let targets = workspace.targets()?;

    if targets.is_empty() {
        println!(
            "No targets found in {}",
            style(workspace.root().display()).dim()
        );
        return Ok(());
    }

    for target in targets {
        let kind = match target.kind {
            TargetKind::Repository => style("repository").cyan(),
            TargetKind::UseCase => style("use case").magenta(),
        };
        println!("{}  ({})", style(&target.name).bold(), kind);
        for report in reports::available_reports(&target) {
            println!("    {} {}", style("•").dim(), report.label);
        }
    }
    Ok(())
}

pub fn cmd_catalog(config: &PanelConfig) -> Result<()> {
    let path = config.catalog_path();
    let catalog = Catalog::load(&path)?;

    if catalog.is_empty() {
        println!("No valid commands found in {}", path.display());
        return Ok(());
    }

    for entry in catalog.entries() {
        let tag = match entry.category() {
            CommandCategory::Documentation => style("docs").yellow(),
            CommandCategory::Analysis => style("analysis").cyan(),
        };
        print!("{}  [{}]  {}", style(&entry.name).bold(), tag, style(&entry.template).dim());
        match &entry.output_file {
            Some(output) => println!("  -> {}", output),
            None => println!(),
        }
    }
    Ok(())
}
