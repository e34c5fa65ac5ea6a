//! Drives a running analysis to completion.
//!
//! The loop sleeps on the channel's notification rather than a timer, drains
//! with [`AnalysisSession::poll`], and forwards what it finds to a sink. Once
//! the terminal entry is seen it runs the post-completion step exactly once
//! (starting the documentation server after a successful documentation
//! command) and settles the session back to idle.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::context::PanelContext;
use super::session::{Completion, PollOutcome, RunInfo};
use super::supervisor::ServerStarted;
use crate::catalog::CommandCategory;
use crate::workspace::{Target, TargetKind};

/// Progress of a run, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Lines {
        run_id: Uuid,
        lines: Vec<String>,
    },
    Finished {
        run: RunInfo,
        completion: Completion,
    },
    DocsStarted(ServerStarted),
    DocsFailed {
        target: String,
        error: String,
    },
}

/// Follow the current run until it settles. Returns `None` when nothing was
/// running, otherwise how the command ended.
pub async fn drive<F>(ctx: &PanelContext, mut sink: F) -> Option<Completion>
where
    F: FnMut(RunEvent),
{
    let (notify, run_id) = {
        let session = ctx.session();
        (session.notifier()?, session.run()?.run_id)
    };

    let (run, completion) = loop {
        // Poll before waiting: a permit stored by an earlier send makes
        // `notified()` return immediately, so no wake-up is lost.
        let outcome = ctx.session().poll();
        match outcome {
            PollOutcome::Idle => return None,
            PollOutcome::Pending { new_lines } => {
                if !new_lines.is_empty() {
                    sink(RunEvent::Lines {
                        run_id,
                        lines: new_lines,
                    });
                }
                notify.notified().await;
            }
            PollOutcome::Finished {
                new_lines,
                completion,
                run,
            } => {
                if !new_lines.is_empty() {
                    sink(RunEvent::Lines {
                        run_id: run.run_id,
                        lines: new_lines,
                    });
                }
                sink(RunEvent::Finished {
                    run: run.clone(),
                    completion,
                });
                break (run, completion);
            }
        }
    };

    let note = after_completion(ctx, &run, completion, &mut sink).await;
    ctx.session().settle(note);
    Some(completion)
}

async fn after_completion<F>(
    ctx: &PanelContext,
    run: &RunInfo,
    completion: Completion,
    sink: &mut F,
) -> Option<String>
where
    F: FnMut(RunEvent),
{
    match completion {
        Completion::Failed { exit_code } => {
            warn!(command = %run.command_name, exit_code, "Analysis failed");
            Some(format!("Analysis failed with exit code: {}", exit_code))
        }
        Completion::Succeeded if run.category == CommandCategory::Documentation => {
            let target = Target {
                name: run.target.clone(),
                path: run.target_path.clone(),
                kind: TargetKind::Repository,
            };
            match ctx.restart_docs(&target).await {
                Ok(started) => {
                    let note = format!("Documentation server running at {}", started.url);
                    sink(RunEvent::DocsStarted(started));
                    Some(note)
                }
                Err(e) => {
                    warn!(target = %run.target, error = %e, "Documentation server did not start");
                    let error = e.to_string();
                    sink(RunEvent::DocsFailed {
                        target: run.target.clone(),
                        error: error.clone(),
                    });
                    Some(error)
                }
            }
        }
        Completion::Succeeded => {
            info!(command = %run.command_name, "Analysis complete");
            Some("Analysis complete!".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PanelConfig, RaToml};
    use crate::orchestrator::context::LaunchOutcome;
    use crate::orchestrator::session::SessionPhase;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(dir: &TempDir, catalog: &str) -> PanelContext {
        std::fs::write(dir.path().join("commands.md"), catalog).unwrap();
        std::fs::create_dir_all(dir.path().join("workspace").join("app")).unwrap();
        let mut toml = RaToml::default();
        toml.docs.release_delay_ms = 0;
        toml.docs.install = vec!["true".into()];
        toml.docs.build = vec!["true".into()];
        toml.docs.serve = vec!["sleep".into(), "30".into()];
        toml.docs.base_port = 19105;
        PanelContext::new(PanelConfig::from_toml(dir.path(), toml))
    }

    fn collect_lines(events: &[RunEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Lines { lines, .. } => Some(lines.concat()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_drive_without_run_returns_none() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "");
        assert_eq!(drive(&ctx, |_| {}).await, None);
    }

    #[tokio::test]
    async fn test_drive_streams_lines_then_finishes_once() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "Count, for i in 1 2 3; do echo $i; sleep 0.05; done\n");
        ctx.launch("app", "Count").await.unwrap();

        let mut events = Vec::new();
        let completion = drive(&ctx, |e| events.push(e)).await;

        assert_eq!(completion, Some(Completion::Succeeded));
        assert_eq!(collect_lines(&events), "1\n2\n3\n");
        let finished: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, RunEvent::Finished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
        assert!(matches!(events.last(), Some(RunEvent::Finished { .. })));

        let snapshot = ctx.session().snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.note.as_deref(), Some("Analysis complete!"));
        assert_eq!(snapshot.log, "1\n2\n3\n");
    }

    #[tokio::test]
    async fn test_failed_run_records_exit_code_note() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "Broken, echo nope; exit 2\n");
        ctx.launch("app", "Broken").await.unwrap();

        let completion = drive(&ctx, |_| {}).await;
        assert_eq!(completion, Some(Completion::Failed { exit_code: 2 }));
        assert_eq!(
            ctx.session().snapshot().note.as_deref(),
            Some("Analysis failed with exit code: 2")
        );
    }

    #[tokio::test]
    async fn test_successful_documentation_run_starts_server() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "Generate Documentation, mkdir -p $REPOSITORY/_ra\n");

        let outcome = ctx.launch("app", "Generate Documentation").await.unwrap();
        assert!(matches!(outcome, LaunchOutcome::Started { .. }));

        let mut events = Vec::new();
        drive(&ctx, |e| events.push(e)).await;

        let started = events.iter().find_map(|e| match e {
            RunEvent::DocsStarted(s) => Some(s.clone()),
            _ => None,
        });
        let started = started.expect("docs server event");
        assert_eq!(started.port, 19105);

        let target = ctx.workspace().target("app").unwrap();
        assert!(ctx.docs_status(&target).await.unwrap().alive);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_launch_during_docs_post_completion_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("commands.md"),
            "Generate Documentation, mkdir -p $REPOSITORY/_ra\nSide, touch side-effect.txt\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("workspace/app")).unwrap();
        let mut toml = RaToml::default();
        toml.docs.release_delay_ms = 0;
        toml.docs.install = vec!["sleep".into(), "1".into()];
        toml.docs.build = vec!["true".into()];
        toml.docs.serve = vec!["sleep".into(), "30".into()];
        toml.docs.base_port = 19110;
        let ctx = Arc::new(PanelContext::new(PanelConfig::from_toml(dir.path(), toml)));

        ctx.launch("app", "Generate Documentation").await.unwrap();
        let driver = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move { drive(&ctx, |_| {}).await }
        });

        let mut phase = ctx.session().phase();
        for _ in 0..200 {
            if phase == SessionPhase::Succeeded {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            phase = ctx.session().phase();
        }
        assert_eq!(phase, SessionPhase::Succeeded);

        let second = ctx.launch("app", "Side").await;
        assert!(matches!(second, Err(crate::errors::PanelError::Session(_))));

        assert_eq!(driver.await.unwrap(), Some(Completion::Succeeded));
        assert_eq!(ctx.session().phase(), SessionPhase::Idle);
        assert!(!dir.path().join("side-effect.txt").exists());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_line_split_across_writes_is_reassembled() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            "Chunky, printf 'ab'; sleep 0.1; printf 'c\\nd'; sleep 0.1; printf 'e\\n'\n",
        );
        ctx.launch("app", "Chunky").await.unwrap();

        let mut events = Vec::new();
        let completion = drive(&ctx, |e| events.push(e)).await;

        assert_eq!(completion, Some(Completion::Succeeded));
        let lines: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Lines { lines, .. } => Some(lines.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(lines, vec!["abc\n".to_string(), "de\n".to_string()]);
        assert_eq!(ctx.session().snapshot().exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_documentation_run_without_artifacts_reports_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "Generate Documentation, true\n");
        ctx.launch("app", "Generate Documentation").await.unwrap();

        let mut events = Vec::new();
        let completion = drive(&ctx, |e| events.push(e)).await;
        assert_eq!(completion, Some(Completion::Succeeded));
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::DocsFailed { error, .. } if error.contains("Directory not found")
        )));
        assert_eq!(ctx.session().phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_large_output_survives_small_channel() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("commands.md"), "Flood, seq 1 2000\n").unwrap();
        std::fs::create_dir_all(dir.path().join("workspace/app")).unwrap();
        let mut toml = RaToml::default();
        toml.session.channel_capacity = 4;
        let ctx = PanelContext::new(PanelConfig::from_toml(dir.path(), toml));

        ctx.launch("app", "Flood").await.unwrap();
        let mut events = Vec::new();
        drive(&ctx, |e| events.push(e)).await;

        let text = collect_lines(&events);
        let expected: String = (1..=2000).map(|i| format!("{}\n", i)).collect();
        assert_eq!(text, expected);
    }
}
