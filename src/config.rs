//! Configuration for the analysis panel.
//!
//! Settings are read from `ra.toml` in the project directory, falling back to
//! `~/.ra.toml`, then to built-in defaults. Layering is file → environment →
//! CLI, matching how the binary resolves every other setting.
//!
//! # Configuration File Format
//!
//! ```toml
//! [workspace]
//! root = "workspace"
//! command_dir = "."
//! catalog = "commands.md"
//!
//! [panel]
//! host = "127.0.0.1"
//! port = 8501
//!
//! [session]
//! channel_capacity = 1024
//!
//! [docs]
//! artifact_dir = "_ra"
//! base_port = 8005
//! release_delay_ms = 2000
//! install = ["pip", "install", "mkdocs>=1.5.0"]
//! build = ["mkdocs", "build", "--clean"]
//! serve = ["mkdocs", "serve", "--dev-addr=127.0.0.1:{port}"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "ra.toml";

/// Placeholder replaced with the assigned port in `docs.serve`.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Where targets live and where catalog commands run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Directory holding one sub-directory per target
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Working directory for catalog commands
    #[serde(default = "default_command_dir")]
    pub command_dir: PathBuf,
    /// Command catalog file
    #[serde(default = "default_catalog")]
    pub catalog: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_command_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_catalog() -> PathBuf {
    PathBuf::from("commands.md")
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            command_dir: default_command_dir(),
            catalog: default_catalog(),
        }
    }
}

/// HTTP listener for the panel itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSection {
    #[serde(default = "default_panel_host")]
    pub host: String,
    #[serde(default = "default_panel_port")]
    pub port: u16,
}

fn default_panel_host() -> String {
    "127.0.0.1".to_string()
}

fn default_panel_port() -> u16 {
    8501
}

impl Default for PanelSection {
    fn default() -> Self {
        Self {
            host: default_panel_host(),
            port: default_panel_port(),
        }
    }
}

/// Analysis session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Lines buffered between the output reader and the consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    crate::orchestrator::log_channel::DEFAULT_CAPACITY
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Documentation server commands and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsSection {
    /// Generated-artifact directory inside a target; must exist before serving
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
    /// First port handed out by the port registry
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Pause between stopping an old server and starting a new one
    #[serde(default = "default_release_delay_ms")]
    pub release_delay_ms: u64,
    /// Dependency installation step (empty to skip)
    #[serde(default = "default_install")]
    pub install: Vec<String>,
    /// Build step (empty to skip)
    #[serde(default = "default_build")]
    pub build: Vec<String>,
    /// Long-lived serve command; `{port}` is substituted
    #[serde(default = "default_serve")]
    pub serve: Vec<String>,
}

fn default_artifact_dir() -> String {
    "_ra".to_string()
}

fn default_base_port() -> u16 {
    crate::orchestrator::ports::DEFAULT_BASE_PORT
}

fn default_release_delay_ms() -> u64 {
    2000
}

fn default_install() -> Vec<String> {
    [
        "pip",
        "install",
        "mkdocs>=1.5.0",
        "mkdocs-material>=9.0.0",
        "mkdocs-mermaid2-plugin>=1.0.0",
        "pymdown-extensions>=10.0.0",
        "mkdocs-awesome-pages-plugin>=2.8.0",
        "mkdocs-minify-plugin>=0.7.0",
        "mkdocs-git-revision-date-localized-plugin>=1.2.0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_build() -> Vec<String> {
    vec!["mkdocs".into(), "build".into(), "--clean".into()]
}

fn default_serve() -> Vec<String> {
    vec![
        "mkdocs".into(),
        "serve".into(),
        format!("--dev-addr=127.0.0.1:{}", PORT_PLACEHOLDER),
    ]
}

impl Default for DocsSection {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            base_port: default_base_port(),
            release_delay_ms: default_release_delay_ms(),
            install: default_install(),
            build: default_build(),
            serve: default_serve(),
        }
    }
}

impl DocsSection {
    /// Generated-artifact directory inside `target`.
    pub fn artifact_dir_in(&self, target: &Path) -> PathBuf {
        target.join(&self.artifact_dir)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }

    /// Serve arguments with the port substituted.
    pub fn serve_command(&self, port: u16) -> Vec<String> {
        self.serve
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port.to_string()))
            .collect()
    }
}

/// Root of `ra.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaToml {
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub panel: PanelSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub docs: DocsSection,
}

impl RaToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ra.toml")
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize ra.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Non-fatal problems worth reporting to the operator.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.docs.serve.is_empty() {
            warnings.push("docs.serve is empty: documentation servers cannot start".to_string());
        } else if !self.docs.serve.iter().any(|a| a.contains(PORT_PLACEHOLDER)) {
            warnings.push(format!(
                "docs.serve does not mention {}: every server would bind the same address",
                PORT_PLACEHOLDER
            ));
        }
        if self.docs.base_port < 1024 {
            warnings.push(format!(
                "docs.base_port {} is a privileged port",
                self.docs.base_port
            ));
        }
        if self.docs.base_port == self.panel.port {
            warnings.push(format!(
                "docs.base_port {} collides with panel.port",
                self.docs.base_port
            ));
        }
        if self.session.channel_capacity == 0 {
            warnings.push("session.channel_capacity 0 is raised to 1".to_string());
        }
        if self.docs.artifact_dir.trim().is_empty() {
            warnings.push("docs.artifact_dir is empty".to_string());
        }

        warnings
    }
}

/// Resolved runtime configuration: the file contents anchored to a project
/// directory, with environment overrides applied.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    project_dir: PathBuf,
    source: Option<PathBuf>,
    pub toml: RaToml,
}

impl PanelConfig {
    /// Load `ra.toml` for `project_dir`, or `explicit` when given.
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let source = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(project_dir),
        };
        let toml = match &source {
            Some(path) => RaToml::load(path)?,
            None => RaToml::default(),
        };
        let mut config = Self {
            project_dir: project_dir.to_path_buf(),
            source,
            toml,
        };
        config.apply_env();
        Ok(config)
    }

    /// Build a configuration from an in-memory file, without env overrides.
    pub fn from_toml(project_dir: &Path, toml: RaToml) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            source: None,
            toml,
        }
    }

    fn discover(project_dir: &Path) -> Option<PathBuf> {
        let local = project_dir.join(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        dirs::home_dir()
            .map(|home| home.join(format!(".{}", CONFIG_FILE_NAME)))
            .filter(|p| p.is_file())
    }

    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("RA_WORKSPACE") {
            self.toml.workspace.root = PathBuf::from(root);
        }
        if let Ok(catalog) = std::env::var("RA_CATALOG") {
            self.toml.workspace.catalog = PathBuf::from(catalog);
        }
        if let Ok(port) = std::env::var("RA_PANEL_PORT") {
            match port.parse() {
                Ok(port) => self.toml.panel.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid RA_PANEL_PORT"),
            }
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Config file the settings came from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.resolve(&self.toml.workspace.root)
    }

    pub fn command_dir(&self) -> PathBuf {
        self.resolve(&self.toml.workspace.command_dir)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.resolve(&self.toml.workspace.catalog)
    }

    pub fn channel_capacity(&self) -> usize {
        self.toml.session.channel_capacity.max(1)
    }

    pub fn docs(&self) -> &DocsSection {
        &self.toml.docs
    }

    pub fn panel(&self) -> &PanelSection {
        &self.toml.panel
    }
}
