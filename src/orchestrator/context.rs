//! The panel's shared state, passed explicitly to every consumer.
//!
//! One `PanelContext` exists per panel process. Each piece of state has its
//! own lock: the session and port registry are short synchronous critical
//! sections, while the supervisor lock is held across a whole
//! `ensure_running` so restarts on a port are serialized.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use super::ports::PortRegistry;
use super::process::{ProcessRunner, TreeTerminator};
use super::session::{AnalysisSession, SessionPhase};
use super::supervisor::{ServerStarted, ServerStatus, ServiceSupervisor};
use crate::catalog::{Catalog, CommandCategory, Plan};
use crate::config::PanelConfig;
use crate::errors::{PanelError, SessionError};
use crate::workspace::{Target, Workspace};

/// What a launch request resulted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaunchOutcome {
    /// A process was spawned and the session is running.
    Started { run_id: Uuid, command: String },
    /// The entry's output file exists; nothing was spawned.
    AlreadySatisfied { output: String },
    /// A documentation command whose site already exists restarted its server.
    DocsRestarted(ServerStarted),
}

/// A target's documentation port and whether a server currently holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortUsage {
    pub target: PathBuf,
    pub port: u16,
    pub running: bool,
}

pub struct PanelContext {
    config: PanelConfig,
    workspace: Workspace,
    runner: ProcessRunner,
    session: Mutex<AnalysisSession>,
    ports: Mutex<PortRegistry>,
    supervisor: tokio::sync::Mutex<ServiceSupervisor>,
}

impl std::fmt::Debug for PanelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelContext")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl PanelContext {
    pub fn new(config: PanelConfig) -> Self {
        let supervisor = ServiceSupervisor::new(config.docs().clone());
        Self::with_supervisor(config, supervisor)
    }

    pub fn with_terminator(config: PanelConfig, terminator: Arc<dyn TreeTerminator>) -> Self {
        let supervisor = ServiceSupervisor::with_terminator(config.docs().clone(), terminator);
        Self::with_supervisor(config, supervisor)
    }

    fn with_supervisor(config: PanelConfig, supervisor: ServiceSupervisor) -> Self {
        let workspace = Workspace::new(config.workspace_root(), config.command_dir());
        Self {
            runner: ProcessRunner::new(config.channel_capacity()),
            ports: Mutex::new(PortRegistry::new(config.docs().base_port)),
            session: Mutex::new(AnalysisSession::new()),
            supervisor: tokio::sync::Mutex::new(supervisor),
            workspace,
            config,
        }
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Lock the session. Never hold the guard across an `.await`.
    pub fn session(&self) -> MutexGuard<'_, AnalysisSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh read of the catalog file.
    pub fn catalog(&self) -> Catalog {
        Catalog::load_or_fallback(&self.config.catalog_path())
    }

    /// Port for `target`, assigned on first use.
    pub fn port_for(&self, target: &Path) -> Result<u16, PanelError> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ports.assign(target)?)
    }

    /// Already-assigned port, without assigning one.
    pub fn assigned_port(&self, target: &Path) -> Option<u16> {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
    }

    /// Run catalog entry `command_name` against `target_name`.
    pub async fn launch(
        &self,
        target_name: &str,
        command_name: &str,
    ) -> Result<LaunchOutcome, PanelError> {
        let target = self.workspace.target(target_name)?;
        let catalog = self.catalog();
        let entry = catalog.get(command_name)?.clone();

        if entry.category() == CommandCategory::Documentation
            && self.config.docs().artifact_dir_in(&target.path).is_dir()
        {
            self.ensure_idle()?;
            let started = self.restart_docs(&target).await?;
            return Ok(LaunchOutcome::DocsRestarted(started));
        }

        let repository = self.workspace.relative_path(&target);
        let use_case = self.workspace.use_case_description(&target)?;

        let mut session = self.session();
        Self::check_idle(&session)?;
        match entry.plan(&target.path, &repository, use_case.as_deref()) {
            Plan::AlreadySatisfied { output } => {
                tracing::info!(command = command_name, output = %output.display(), "Output exists, skipping run");
                Ok(LaunchOutcome::AlreadySatisfied {
                    output: output.display().to_string(),
                })
            }
            Plan::Launch { command } => {
                let (handle, receiver) = self.runner.run(&command, self.workspace.command_dir());
                let run_id = session.begin(
                    &entry.name,
                    entry.category(),
                    &target.name,
                    target.path.clone(),
                    handle,
                    receiver,
                )?;
                Ok(LaunchOutcome::Started { run_id, command })
            }
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        Self::check_idle(&self.session())
    }

    /// A finished run still owns the session until its post-completion step
    /// settles it, so only `Idle` accepts a new launch.
    fn check_idle(session: &AnalysisSession) -> Result<(), SessionError> {
        if session.phase() == SessionPhase::Idle {
            return Ok(());
        }
        Err(SessionError::AlreadyRunning {
            command: session
                .run()
                .map(|r| r.command_name.clone())
                .unwrap_or_default(),
        })
    }

    /// (Re)start the documentation server for `target` on its port.
    pub async fn restart_docs(&self, target: &Target) -> Result<ServerStarted, PanelError> {
        let port = self.port_for(&target.path)?;
        let mut supervisor = self.supervisor.lock().await;
        Ok(supervisor.ensure_running(&target.path, port).await?)
    }

    /// Server status for `target`, if one was ever started on its port.
    pub async fn docs_status(&self, target: &Target) -> Option<ServerStatus> {
        let port = self.assigned_port(&target.path)?;
        self.supervisor.lock().await.status(port)
    }

    /// Every assigned port, in port order, with whether its server is up.
    pub async fn docs_overview(&self) -> Vec<PortUsage> {
        let assignments = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .assignments();
        let mut supervisor = self.supervisor.lock().await;
        assignments
            .into_iter()
            .map(|(target, port)| PortUsage {
                running: supervisor.is_running(port),
                target,
                port,
            })
            .collect()
    }

    /// Stop every documentation server.
    pub async fn shutdown(&self) {
        self.supervisor.lock().await.shutdown().await;
    }
}
