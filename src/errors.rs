//! Typed error hierarchy for the analysis panel.
//!
//! One enum per subsystem:
//! - `RunnerError`: spawning and reaping external commands
//! - `SupervisorError`: documentation server lifecycle
//! - `SessionError`: analysis session state transitions
//! - `CatalogError`: command catalog loading
//! - `WorkspaceError`: targets, cloning and use-case folders
//! - `PortError`: port allocation
//! - `PanelError`: anything a panel operation can fail with

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the process runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create output pipe: {0}")]
    PipeFailed(#[source] std::io::Error),

    #[error("Failed to signal process group {pgid}: {source}")]
    SignalFailed {
        pgid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for process {pid}: {source}")]
    WaitFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the documentation server supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Directory not found: {path}. Cannot start documentation server.")]
    MissingArtifacts { path: PathBuf },

    #[error("Failed to {step}:\n{output}")]
    StepFailed { step: &'static str, output: String },

    #[error("Documentation command for step '{step}' is empty")]
    EmptyCommand { step: &'static str },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Errors from the analysis session state machine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Analysis `{command}` is already running")]
    AlreadyRunning { command: String },
}

/// Errors from loading the command catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),
}

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Target '{0}' not found in workspace")]
    TargetNotFound(String),

    #[error("Invalid target name '{0}'")]
    InvalidName(String),

    #[error("Use case '{0}' already exists")]
    UseCaseExists(String),

    #[error("Could not derive a repository name from '{0}'")]
    InvalidSource(String),

    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("Report '{0}' is not an allowed report file")]
    ReportNotAllowed(String),

    #[error("Workspace I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the port registry.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("No ports left to assign above {last}")]
    Exhausted { last: u16 },
}

/// Errors surfaced by panel operations that span several subsystems.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}
