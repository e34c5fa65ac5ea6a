//! Analysis session state machine.
//!
//! `Idle → Running → Succeeded | Failed → Idle`. At most one command is
//! running at a time; [`AnalysisSession::begin`] refuses a second one. The
//! session owns the log receiver while running and accumulates its text;
//! callers drive it with [`AnalysisSession::poll`] and acknowledge the
//! post-completion step with [`AnalysisSession::settle`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use super::log_channel::LogReceiver;
use super::process::ProcessHandle;
use crate::catalog::CommandCategory;
use crate::errors::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Completion {
    Succeeded,
    Failed { exit_code: i32 },
}

impl Completion {
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Completion::Succeeded
        } else {
            Completion::Failed { exit_code: code }
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Completion::Succeeded => 0,
            Completion::Failed { exit_code } => *exit_code,
        }
    }
}

/// What is being run, fixed for the lifetime of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub command_name: String,
    pub category: CommandCategory,
    pub target: String,
    pub target_path: PathBuf,
}

/// Result of one polling iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing running, or the finished run awaits [`AnalysisSession::settle`].
    Idle,
    Pending { new_lines: Vec<String> },
    /// Reported exactly once per run.
    Finished {
        new_lines: Vec<String>,
        completion: Completion,
        run: RunInfo,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub run: Option<RunInfo>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub log: String,
    /// Outcome of the post-completion step, once settled.
    pub note: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct AnalysisSession {
    phase: SessionPhase,
    run: Option<RunInfo>,
    channel: Option<LogReceiver>,
    process: Option<ProcessHandle>,
    log: String,
    exit_code: Option<i32>,
    note: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            run: None,
            channel: None,
            process: None,
            log: String::new(),
            exit_code: None,
            note: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == SessionPhase::Running
    }

    pub fn run(&self) -> Option<&RunInfo> {
        self.run.as_ref()
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Enter `Running` for a freshly started process. Anything other than
    /// `Idle` is rejected, including a finished run that was never settled.
    pub fn begin(
        &mut self,
        command_name: &str,
        category: CommandCategory,
        target: &str,
        target_path: PathBuf,
        process: ProcessHandle,
        channel: LogReceiver,
    ) -> Result<Uuid, SessionError> {
        if self.phase != SessionPhase::Idle {
            let command = self
                .run
                .as_ref()
                .map(|r| r.command_name.clone())
                .unwrap_or_default();
            return Err(SessionError::AlreadyRunning { command });
        }

        let run_id = Uuid::new_v4();
        self.phase = SessionPhase::Running;
        self.run = Some(RunInfo {
            run_id,
            command_name: command_name.to_string(),
            category,
            target: target.to_string(),
            target_path,
        });
        self.channel = Some(channel);
        self.process = Some(process);
        self.log.clear();
        self.exit_code = None;
        self.note = None;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        tracing::info!(%run_id, command = command_name, target, "Analysis started");
        Ok(run_id)
    }

    /// Wake-up handle for the running command's channel.
    pub fn notifier(&self) -> Option<Arc<Notify>> {
        self.channel.as_ref().map(LogReceiver::notifier)
    }

    /// Drain whatever is available into the accumulated log.
    pub fn poll(&mut self) -> PollOutcome {
        if self.phase != SessionPhase::Running {
            return PollOutcome::Idle;
        }
        let Some(channel) = self.channel.as_mut() else {
            return PollOutcome::Idle;
        };

        let drain = channel.try_drain();
        for line in &drain.lines {
            self.log.push_str(line);
        }

        match drain.exit {
            None => PollOutcome::Pending {
                new_lines: drain.lines,
            },
            Some(code) => {
                let completion = Completion::from_exit_code(code);
                self.exit_code = Some(code);
                self.finished_at = Some(Utc::now());
                self.channel = None;
                self.phase = match completion {
                    Completion::Succeeded => SessionPhase::Succeeded,
                    Completion::Failed { .. } => SessionPhase::Failed,
                };
                tracing::info!(exit_code = code, "Analysis finished");
                match self.run.clone() {
                    Some(run) => PollOutcome::Finished {
                        new_lines: drain.lines,
                        completion,
                        run,
                    },
                    None => PollOutcome::Idle,
                }
            }
        }
    }

    /// Return to `Idle` after the post-completion step, recording its outcome.
    /// No-op unless the session is `Succeeded` or `Failed`.
    pub fn settle(&mut self, note: Option<String>) {
        if matches!(self.phase, SessionPhase::Succeeded | SessionPhase::Failed) {
            self.phase = SessionPhase::Idle;
            self.process = None;
            self.note = note;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            run: self.run.clone(),
            pid: self.process.as_ref().and_then(ProcessHandle::pid),
            exit_code: self.exit_code,
            log: self.log.clone(),
            note: self.note.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
