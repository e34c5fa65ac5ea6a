//! Targets on disk: one directory per cloned repository or saved use case.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::WorkspaceError;

/// Marker file identifying a use-case target; holds its description.
pub const USE_CASE_MARKER: &str = "usecase.md";

/// Risk graph written by the analysis tools.
pub const RISK_GRAPH_FILE: &str = "ra-risk.svg";

const SLUG_MAX_LEN: usize = 60;

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Convert a title to a URL-safe slug, limited to `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..slug.floor_char_boundary(max_len)]
            .trim_end_matches('-')
            .to_string()
    } else {
        slug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Repository,
    UseCase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: String,
    pub path: PathBuf,
    pub kind: TargetKind,
}

/// Where to clone from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CloneSource {
    Url {
        url: String,
    },
    AzureDevOps {
        organization: String,
        project: String,
        repository: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRequest {
    #[serde(flatten)]
    pub source: CloneSource,
    #[serde(default)]
    pub branch: Option<String>,
    /// Azure DevOps personal access token; only applied to dev.azure.com URLs.
    #[serde(default)]
    pub token: Option<String>,
}

impl CloneRequest {
    /// Directory name the clone lands in.
    pub fn repository_name(&self) -> Result<String> {
        let name = match &self.source {
            CloneSource::Url { url } => url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .replace(".git", ""),
            CloneSource::AzureDevOps { repository, .. } => repository.trim().to_string(),
        };
        validate_name(&name).map_err(|_| WorkspaceError::InvalidSource(self.display_url()))?;
        Ok(name)
    }

    /// URL passed to git, with the token injected when applicable.
    pub fn clone_url(&self) -> String {
        let url = self.display_url();
        match self.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) if url.contains("dev.azure.com") => {
                url.replacen("https://", &format!("https://{}@", token), 1)
            }
            _ => url,
        }
    }

    /// URL without credentials.
    pub fn display_url(&self) -> String {
        match &self.source {
            CloneSource::Url { url } => url.trim().to_string(),
            CloneSource::AzureDevOps {
                organization,
                project,
                repository,
            } => format!(
                "https://dev.azure.com/{}/{}/_git/{}",
                organization.trim(),
                project.trim(),
                repository.trim()
            ),
        }
    }

    fn redact(&self, text: &str) -> String {
        match self.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => text.replace(token, "***"),
            None => text.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOutcome {
    Cloned(Target),
    /// The directory existed already; nothing was fetched.
    AlreadyPresent(Target),
}

impl CloneOutcome {
    pub fn target(&self) -> &Target {
        match self {
            CloneOutcome::Cloned(t) | CloneOutcome::AlreadyPresent(t) => t,
        }
    }
}

/// Names must be a single normal path component.
fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('/') => Ok(()),
        _ => Err(WorkspaceError::InvalidName(name.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    command_dir: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, command_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            command_dir: command_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn command_dir(&self) -> &Path {
        &self.command_dir
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
        move |source| WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn describe(&self, name: &str) -> Target {
        let path = self.root.join(name);
        let kind = if path.join(USE_CASE_MARKER).is_file() {
            TargetKind::UseCase
        } else {
            TargetKind::Repository
        };
        Target {
            name: name.to_string(),
            path,
            kind,
        }
    }

    /// All targets, sorted by name. A missing root yields none.
    pub fn targets(&self) -> Result<Vec<Target>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(Self::io_err(&self.root))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Self::io_err(&self.root))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names.iter().map(|n| self.describe(n)).collect())
    }

    pub fn target(&self, name: &str) -> Result<Target> {
        validate_name(name)?;
        let target = self.describe(name);
        if target.path.is_dir() {
            Ok(target)
        } else {
            Err(WorkspaceError::TargetNotFound(name.to_string()))
        }
    }

    /// Value for `$REPOSITORY`: the target relative to the command directory,
    /// with a trailing separator. Falls back to the full path.
    pub fn relative_path(&self, target: &Target) -> String {
        let rel = target
            .path
            .strip_prefix(&self.command_dir)
            .unwrap_or(&target.path);
        format!("{}{}", rel.display(), std::path::MAIN_SEPARATOR)
    }

    /// Value for `$USE_CASE`, if `target` is a use case.
    pub fn use_case_description(&self, target: &Target) -> Result<Option<String>> {
        if target.kind != TargetKind::UseCase {
            return Ok(None);
        }
        let marker = target.path.join(USE_CASE_MARKER);
        std::fs::read_to_string(&marker)
            .map(Some)
            .map_err(Self::io_err(&marker))
    }

    /// Create a use-case target. Existing targets are never overwritten.
    pub fn save_use_case(&self, title: &str, description: &str) -> Result<Target> {
        let name = slugify(title, SLUG_MAX_LEN);
        if name.is_empty() {
            return Err(WorkspaceError::InvalidName(title.to_string()));
        }
        let path = self.root.join(&name);
        if path.exists() {
            return Err(WorkspaceError::UseCaseExists(name));
        }
        std::fs::create_dir_all(&path).map_err(Self::io_err(&path))?;
        let marker = path.join(USE_CASE_MARKER);
        std::fs::write(&marker, description).map_err(Self::io_err(&marker))?;
        info!(name = %name, "Saved use case");
        Ok(self.describe(&name))
    }

    /// SVG risk graph for `target`, if the analysis produced one.
    pub fn risk_graph(&self, target: &Target) -> Result<Option<String>> {
        let path = target.path.join(RISK_GRAPH_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(Self::io_err(&path))
    }

    /// Clone into the workspace with the git CLI.
    pub async fn clone_repository(&self, request: &CloneRequest) -> Result<CloneOutcome> {
        let name = request.repository_name()?;
        let dest = self.root.join(&name);
        if dest.is_dir() {
            warn!(path = %dest.display(), "Clone target exists, skipping");
            return Ok(CloneOutcome::AlreadyPresent(self.describe(&name)));
        }
        std::fs::create_dir_all(&self.root).map_err(Self::io_err(&self.root))?;

        let mut cmd = tokio::process::Command::new("git");
        cmd.arg("clone");
        if let Some(branch) = request.branch.as_deref().filter(|b| !b.trim().is_empty()) {
            cmd.args(["--branch", branch.trim()]);
        }
        cmd.arg(request.clone_url())
            .arg(&dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        info!(url = %request.display_url(), dest = %dest.display(), "Cloning repository");
        let output = cmd
            .output()
            .await
            .map_err(|e| WorkspaceError::CloneFailed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkspaceError::CloneFailed(request.redact(stderr.trim())));
        }
        Ok(CloneOutcome::Cloned(self.describe(&name)))
    }
}
