//! One-shot terminal run: `ra-panel run <target> <command>`.
//!
//! Goes through the same context, session and driver as the panel, printing
//! output as it arrives instead of broadcasting it.

use std::io::Write;

use anyhow::Result;
use console::style;
use ra_panel::config::PanelConfig;
use ra_panel::orchestrator::{Completion, LaunchOutcome, PanelContext, RunEvent, drive};

/// Returns the exit code the process should end with.
pub async fn cmd_run(config: PanelConfig, target: &str, command: &str) -> Result<i32> {
    let ctx = PanelContext::new(config);

    let code = match ctx.launch(target, command).await? {
        LaunchOutcome::AlreadySatisfied { output } => {
            println!(
                "{} {}",
                style("Output already exists, skipping:").yellow(),
                output
            );
            0
        }
        LaunchOutcome::DocsRestarted(started) => {
            println!(
                "{} {}",
                style("Documentation server running at").green(),
                style(&started.url).bold()
            );
            wait_for_interrupt(&ctx).await;
            0
        }
        LaunchOutcome::Started { command, .. } => {
            println!("{} {}", style("Running:").bold(), style(&command).dim());

            let mut docs_running = false;
            let completion = drive(&ctx, |event| {
                if matches!(event, RunEvent::DocsStarted(_)) {
                    docs_running = true;
                }
                print_event(&event);
            })
            .await;

            if docs_running {
                wait_for_interrupt(&ctx).await;
            }
            completion.map(|c| c.exit_code()).unwrap_or(1)
        }
    };

    Ok(code)
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::Lines { lines, .. } => {
            let mut out = std::io::stdout().lock();
            for line in lines {
                let _ = out.write_all(line.as_bytes());
            }
            let _ = out.flush();
        }
        RunEvent::Finished { completion, .. } => match completion {
            Completion::Succeeded => println!("{}", style("Analysis complete!").green().bold()),
            Completion::Failed { exit_code } => println!(
                "{} {}",
                style("Analysis failed with exit code:").red().bold(),
                exit_code
            ),
        },
        RunEvent::DocsStarted(started) => println!(
            "{} {}",
            style("Documentation server running at").green(),
            style(&started.url).bold()
        ),
        RunEvent::DocsFailed { error, .. } => {
            println!("{} {}", style("Error:").red().bold(), error)
        }
    }
}

/// Keep documentation servers alive until Ctrl+C, then stop them.
async fn wait_for_interrupt(ctx: &PanelContext) {
    println!("{}", style("Press Ctrl+C to stop the documentation server.").dim());
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
    ctx.shutdown().await;
}
