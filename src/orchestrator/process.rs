//! External command execution.
//!
//! [`ProcessRunner::run`] starts `sh -c <command>` in its own process group
//! with stderr joined onto stdout through a single pipe, and hands back a
//! [`ProcessHandle`] plus the [`LogReceiver`] end of a log channel. A
//! dedicated blocking task reads the pipe line by line, reaps the child and
//! pushes the terminal entry; it never fails outward, every error becomes a
//! log line followed by an exit code.

use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

use super::log_channel::{LogReceiver, LogSender, log_channel};
use crate::errors::RunnerError;

/// Exit code reported when a command could not be started or reaped.
pub const SPAWN_FAILURE_CODE: i32 = 1;

/// Convert an exit status to a single integer; signal deaths become `-signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(SPAWN_FAILURE_CODE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Exited { code: i32 },
    /// The command never started.
    Failed,
}

#[derive(Debug)]
struct HandleInner {
    command: String,
    working_dir: PathBuf,
    pid: Option<u32>,
    state: Mutex<ProcessState>,
}

/// Identifies one spawned command. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl ProcessHandle {
    fn new(command: &str, working_dir: &Path, pid: Option<u32>, state: ProcessState) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                command: command.to_string(),
                working_dir: working_dir.to_path_buf(),
                pid,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    pub fn working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// The command leads its own group, so the group id equals its pid.
    pub fn pgid(&self) -> Option<i32> {
        self.inner.pid.and_then(|pid| i32::try_from(pid).ok())
    }

    pub fn state(&self) -> ProcessState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_alive(&self) -> bool {
        self.state() == ProcessState::Running
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.state() {
            ProcessState::Exited { code } => Some(code),
            ProcessState::Failed => Some(SPAWN_FAILURE_CODE),
            ProcessState::Running => None,
        }
    }

    fn mark_exited(&self, code: i32) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) =
            ProcessState::Exited { code };
    }
}

/// Result of asking for a process tree to be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Terminated,
    /// Nothing was left to signal; the desired post-condition already holds.
    AlreadyGone,
}

/// Capability to terminate a whole process tree.
pub trait TreeTerminator: Send + Sync {
    fn terminate_tree(&self, pgid: i32) -> Result<Termination, RunnerError>;
}

/// Sends SIGKILL to an entire process group.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupKiller;

impl TreeTerminator for ProcessGroupKiller {
    fn terminate_tree(&self, pgid: i32) -> Result<Termination, RunnerError> {
        // 0 and 1 would address our own group and init.
        if pgid <= 1 {
            return Err(RunnerError::SignalFailed {
                pgid,
                source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
            });
        }
        // SAFETY: killpg takes plain integers and has no memory preconditions.
        let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
        if rc == 0 {
            return Ok(Termination::Terminated);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(Termination::AlreadyGone)
        } else {
            Err(RunnerError::SignalFailed { pgid, source: err })
        }
    }
}

/// Starts catalog commands and streams their output into log channels.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    capacity: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(super::log_channel::DEFAULT_CAPACITY)
    }
}

impl ProcessRunner {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Start `command` in `working_dir`. Never fails: a spawn error is
    /// delivered through the channel as a line plus [`SPAWN_FAILURE_CODE`].
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, command: &str, working_dir: &Path) -> (ProcessHandle, LogReceiver) {
        let (sender, receiver) = log_channel(self.capacity);

        match spawn_merged(command, working_dir) {
            Ok((child, reader)) => {
                let handle =
                    ProcessHandle::new(command, working_dir, Some(child.id()), ProcessState::Running);
                debug!(pid = child.id(), command, cwd = %working_dir.display(), "Spawned command");
                let task_handle = handle.clone();
                tokio::task::spawn_blocking(move || pump(child, reader, sender, task_handle));
                (handle, receiver)
            }
            Err(err) => {
                warn!(command, error = %err, "Command failed to start");
                let handle = ProcessHandle::new(command, working_dir, None, ProcessState::Failed);
                let message = format!("{}\n", err);
                tokio::task::spawn_blocking(move || {
                    sender.blocking_line(message);
                    sender.blocking_finish(SPAWN_FAILURE_CODE);
                });
                (handle, receiver)
            }
        }
    }
}

/// Spawn `sh -c command` as a group leader with stdout and stderr sharing one pipe.
fn spawn_merged(command: &str, working_dir: &Path) -> Result<(Child, std::io::PipeReader), RunnerError> {
    let (reader, writer) = std::io::pipe().map_err(RunnerError::PipeFailed)?;
    let err_writer = writer.try_clone().map_err(RunnerError::PipeFailed)?;

    // The Command owns the parent's copies of the write end; it must be
    // dropped before reading or EOF never arrives.
    let child = {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(err_writer)
            .process_group(0);
        cmd.spawn().map_err(|source| RunnerError::SpawnFailed {
            command: command.to_string(),
            source,
        })?
    };

    Ok((child, reader))
}

fn pump(mut child: Child, reader: std::io::PipeReader, sender: LogSender, handle: ProcessHandle) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                sender.blocking_line(String::from_utf8_lossy(&buf).into_owned());
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                sender.blocking_line(format!("Failed to read command output: {}\n", e));
                break;
            }
        }
    }
    drop(reader);

    let code = match child.wait() {
        Ok(status) => exit_code(status),
        Err(e) => {
            sender.blocking_line(format!("Failed to wait for command: {}\n", e));
            SPAWN_FAILURE_CODE
        }
    };
    debug!(pid = child.id(), code, "Command exited");
    handle.mark_exited(code);
    sender.blocking_finish(code);
}

/// Output of a command run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: i32,
    /// Interleaved stdout and stderr.
    pub output: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `program args..` in `cwd` to completion, capturing interleaved output.
pub async fn run_captured(
    program: &str,
    args: &[String],
    cwd: &Path,
) -> Result<CapturedOutput, RunnerError> {
    let (mut reader, writer) = std::io::pipe().map_err(RunnerError::PipeFailed)?;
    let err_writer = writer.try_clone().map_err(RunnerError::PipeFailed)?;

    let mut child = {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(err_writer)
            .process_group(0);
        cmd.spawn().map_err(|source| RunnerError::SpawnFailed {
            command: render_command(program, args),
            source,
        })?
    };
    let pid = child.id().unwrap_or_default();

    let collector = tokio::task::spawn_blocking(move || {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map(|_| bytes)
    });

    let status = child
        .wait()
        .await
        .map_err(|source| RunnerError::WaitFailed { pid, source })?;
    let bytes = collector
        .await
        .map_err(|e| RunnerError::WaitFailed {
            pid,
            source: std::io::Error::other(e),
        })?
        .map_err(|source| RunnerError::WaitFailed { pid, source })?;

    Ok(CapturedOutput {
        exit_code: exit_code(status),
        output: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

/// Human-readable command line for logs and errors.
pub fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::log_channel::LogEntry;
    use tempfile::TempDir;

    async fn collect(mut rx: LogReceiver) -> (String, i32) {
        let mut text = String::new();
        loop {
            match rx.recv().await {
                Some(LogEntry::Line(line)) => text.push_str(&line),
                Some(LogEntry::Exit(code)) => return (text, code),
                None => panic!("channel closed without exit"),
            }
        }
    }

    #[tokio::test]
    async fn test_run_streams_lines_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::new(16);
        let (handle, rx) = runner.run("echo one; echo two; exit 4", dir.path());
        assert!(handle.pid().is_some());

        let (text, code) = collect(rx).await;
        assert_eq!(text, "one\ntwo\n");
        assert_eq!(code, 4);
        assert_eq!(handle.state(), ProcessState::Exited { code: 4 });
        assert_eq!(handle.exit_code(), Some(4));
    }

    #[tokio::test]
    async fn test_run_merges_stderr_in_emission_order() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let (_, rx) = runner.run("echo out; echo err >&2; echo out2", dir.path());
        let (text, code) = collect(rx).await;
        assert_eq!(text, "out\nerr\nout2\n");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_run_keeps_trailing_partial_line() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let (_, rx) = runner.run("printf 'full\\npartial'", dir.path());
        let (text, code) = collect(rx).await;
        assert_eq!(text, "full\npartial");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_run_joins_lines_written_in_pieces() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let (_, mut rx) = runner.run(
            "printf 'ab'; sleep 0.1; printf 'c\\nd'; sleep 0.1; printf 'e\\n'",
            dir.path(),
        );

        let mut entries = Vec::new();
        while let Some(entry) = rx.recv().await {
            entries.push(entry);
        }
        assert_eq!(
            entries,
            vec![
                LogEntry::Line("abc\n".into()),
                LogEntry::Line("de\n".into()),
                LogEntry::Exit(0),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_uses_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let runner = ProcessRunner::default();
        let (_, rx) = runner.run("cat marker.txt", dir.path());
        let (text, _) = collect(rx).await;
        assert_eq!(text, "here");
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_error_and_code_one() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let runner = ProcessRunner::default();
        let (handle, rx) = runner.run("echo never", &missing);

        let (text, code) = collect(rx).await;
        assert_eq!(code, SPAWN_FAILURE_CODE);
        assert!(text.contains("Failed to spawn"));
        assert_eq!(handle.state(), ProcessState::Failed);
        assert!(handle.pid().is_none());
    }

    #[tokio::test]
    async fn test_command_runs_in_its_own_process_group() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let (handle, rx) = runner.run("ps -o pgid= -p $$", dir.path());
        let (text, code) = collect(rx).await;
        assert_eq!(code, 0);
        assert_eq!(text.trim().parse::<i32>().ok(), handle.pgid());
    }

    #[tokio::test]
    async fn test_group_kill_terminates_children_too() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let (handle, rx) = runner.run("sleep 30 & sleep 30; wait", dir.path());
        let pgid = handle.pgid().unwrap();

        let outcome = ProcessGroupKiller.terminate_tree(pgid).unwrap();
        assert_eq!(outcome, Termination::Terminated);

        let (_, code) = collect(rx).await;
        assert_eq!(code, -libc::SIGKILL);
        assert_eq!(
            ProcessGroupKiller.terminate_tree(pgid).unwrap(),
            Termination::AlreadyGone
        );
    }

    #[test]
    fn test_terminate_refuses_own_group_ids() {
        assert!(ProcessGroupKiller.terminate_tree(0).is_err());
        assert!(ProcessGroupKiller.terminate_tree(1).is_err());
    }

    #[tokio::test]
    async fn test_run_captured_interleaves_output() {
        let dir = TempDir::new().unwrap();
        let args = vec!["-c".to_string(), "echo a; echo b >&2; exit 2".to_string()];
        let out = run_captured("sh", &args, dir.path()).await.unwrap();
        assert_eq!(out.exit_code, 2);
        assert!(!out.success());
        assert_eq!(out.output, "a\nb\n");
    }

    #[tokio::test]
    async fn test_run_captured_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let err = run_captured("definitely-not-a-real-binary-ra", &[], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::SpawnFailed { .. }));
    }

    #[test]
    fn test_render_command_joins_arguments() {
        let args = vec!["build".to_string(), "--clean".to_string()];
        assert_eq!(render_command("mkdocs", &args), "mkdocs build --clean");
    }
}
