//! Lifecycle of long-lived documentation servers, one per port.
//!
//! Restarting is always stop-then-start: whatever occupies the port is killed
//! as a whole process group and reaped before the artifact check, the install
//! and build steps, and finally the serve command. A failure after the stop
//! leaves the port empty rather than serving stale output.

use std::collections::HashMap;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::process::{
    ProcessGroupKiller, Termination, TreeTerminator, exit_code, render_command, run_captured,
};
use crate::config::DocsSection;
use crate::errors::SupervisorError;

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// URL a documentation server on `port` answers on.
pub fn server_url(port: u16) -> String {
    format!("http://localhost:{}", port)
}

#[derive(Debug)]
struct RunningServer {
    child: Child,
    pid: u32,
    target: PathBuf,
    started_at: DateTime<Utc>,
}

impl RunningServer {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Successful outcome of [`ServiceSupervisor::ensure_running`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStarted {
    pub port: u16,
    pub pid: u32,
    pub url: String,
    /// Pid of the server that was torn down first, if any.
    pub replaced: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub port: u16,
    pub pid: u32,
    pub url: String,
    pub target: PathBuf,
    pub alive: bool,
    pub started_at: DateTime<Utc>,
}

/// A server removed by [`ServiceSupervisor::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedServer {
    pub pid: u32,
    /// Exit code observed on reaping, when one could be read.
    pub exit_code: Option<i32>,
}

pub struct ServiceSupervisor {
    settings: DocsSection,
    servers: HashMap<u16, RunningServer>,
    terminator: Arc<dyn TreeTerminator>,
}

impl std::fmt::Debug for ServiceSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSupervisor")
            .field("settings", &self.settings)
            .field("ports", &self.servers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceSupervisor {
    pub fn new(settings: DocsSection) -> Self {
        Self::with_terminator(settings, Arc::new(ProcessGroupKiller))
    }

    pub fn with_terminator(settings: DocsSection, terminator: Arc<dyn TreeTerminator>) -> Self {
        Self {
            settings,
            servers: HashMap::new(),
            terminator,
        }
    }

    pub fn settings(&self) -> &DocsSection {
        &self.settings
    }

    /// (Re)start the documentation server for `target` on `port`.
    pub async fn ensure_running(&mut self, target: &Path, port: u16) -> Result<ServerStarted> {
        let replaced = self.stop(port).await.map(|s| s.pid);
        // Best effort against TIME_WAIT on the listener socket.
        tokio::time::sleep(self.settings.release_delay()).await;

        let docs_dir = self.settings.artifact_dir_in(target);
        if !docs_dir.is_dir() {
            warn!(path = %docs_dir.display(), "Documentation artifacts missing");
            return Err(SupervisorError::MissingArtifacts { path: docs_dir });
        }

        let install = self.settings.install.clone();
        run_step("install documentation dependencies", &install, &docs_dir).await?;
        let build = self.settings.build.clone();
        run_step("build documentation", &build, &docs_dir).await?;

        let serve = self.settings.serve_command(port);
        let (program, args) = serve
            .split_first()
            .ok_or(SupervisorError::EmptyCommand { step: "serve" })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&docs_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .process_group(0);
        let child = cmd.spawn().map_err(|source| crate::errors::RunnerError::SpawnFailed {
            command: render_command(program, args),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        info!(port, pid, target = %target.display(), "Documentation server started");
        self.servers.insert(
            port,
            RunningServer {
                child,
                pid,
                target: target.to_path_buf(),
                started_at: Utc::now(),
            },
        );

        Ok(ServerStarted {
            port,
            pid,
            url: server_url(port),
            replaced,
        })
    }

    /// Kill and reap whatever runs on `port`. The entry is removed even when
    /// the process had already exited on its own.
    pub async fn stop(&mut self, port: u16) -> Option<StoppedServer> {
        let mut server = self.servers.remove(&port)?;

        if server.is_alive() {
            let outcome = i32::try_from(server.pid)
                .map_err(|_| ())
                .and_then(|pgid| self.terminator.terminate_tree(pgid).map_err(|e| {
                    warn!(port, pid = server.pid, error = %e, "Group termination failed");
                }));
            match outcome {
                Ok(Termination::Terminated) => debug!(port, pid = server.pid, "Server group killed"),
                Ok(Termination::AlreadyGone) => debug!(port, pid = server.pid, "Server already gone"),
                Err(()) => {
                    if let Err(e) = server.child.start_kill() {
                        debug!(port, error = %e, "Direct kill failed");
                    }
                }
            }
        }

        let exit_code = match server.child.wait().await {
            Ok(status) => Some(exit_code(status)),
            Err(e) => {
                debug!(port, error = %e, "Reaping server failed");
                None
            }
        };
        info!(port, pid = server.pid, "Documentation server stopped");
        Some(StoppedServer {
            pid: server.pid,
            exit_code,
        })
    }

    pub fn is_running(&mut self, port: u16) -> bool {
        self.servers.get_mut(&port).is_some_and(RunningServer::is_alive)
    }

    pub fn status(&mut self, port: u16) -> Option<ServerStatus> {
        let server = self.servers.get_mut(&port)?;
        let alive = server.is_alive();
        Some(ServerStatus {
            port,
            pid: server.pid,
            url: server_url(port),
            target: server.target.clone(),
            alive,
            started_at: server.started_at,
        })
    }

    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.servers.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Stop every server; used when the panel exits.
    pub async fn shutdown(&mut self) {
        for port in self.ports() {
            self.stop(port).await;
        }
    }
}

async fn run_step(step: &'static str, command: &[String], cwd: &Path) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        debug!(step, "Step has no command, skipping");
        return Ok(());
    };
    debug!(step, command = %render_command(program, args), "Running documentation step");
    let captured = match run_captured(program, args, cwd).await {
        Ok(captured) => captured,
        Err(e) => {
            return Err(SupervisorError::StepFailed {
                step,
                output: e.to_string(),
            });
        }
    };
    if captured.success() {
        Ok(())
    } else {
        warn!(step, exit_code = captured.exit_code, "Documentation step failed");
        Err(SupervisorError::StepFailed {
            step,
            output: captured.output,
        })
    }
}
