//! The analysis command catalog.
//!
//! A plain text file with one command per non-blank line:
//!
//! ```text
//! Overview, analyze.sh $REPOSITORY, ra-overview.md
//! Generate Documentation, docs.sh $REPOSITORY
//! Use Case Review, review.sh "$USE_CASE"
//! ```
//!
//! The optional third field names a file inside the target; when it already
//! exists the command is considered done and is not run again. The file is
//! re-read on every lookup so edits take effect without a restart.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::CatalogError;

/// Replaced with the target path relative to the command directory.
pub const REPOSITORY_PLACEHOLDER: &str = "$REPOSITORY";

/// Replaced with the description text of a use-case target.
pub const USE_CASE_PLACEHOLDER: &str = "$USE_CASE";

/// Entry name substituted when the catalog file cannot be read.
pub const FALLBACK_ENTRY_NAME: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    /// Produces the documentation site; a docs server starts after success.
    Documentation,
    Analysis,
}

impl CommandCategory {
    pub fn of(name: &str) -> Self {
        if name.to_lowercase().contains("documentation") {
            CommandCategory::Documentation
        } else {
            CommandCategory::Analysis
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub template: String,
    pub output_file: Option<String>,
}

/// What invoking an entry against a target amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Launch { command: String },
    /// `output_file` already exists; nothing is spawned.
    AlreadySatisfied { output: PathBuf },
}

impl CatalogEntry {
    pub fn category(&self) -> CommandCategory {
        CommandCategory::of(&self.name)
    }

    /// Substitute placeholders. Purely textual: no quoting is applied.
    pub fn render(&self, repository: &str, use_case: Option<&str>) -> String {
        self.template
            .replace(REPOSITORY_PLACEHOLDER, repository)
            .replace(USE_CASE_PLACEHOLDER, use_case.unwrap_or_default())
    }

    /// Decide whether to run. An existing output file counts as done
    /// regardless of its age or completeness.
    pub fn plan(&self, target_path: &Path, repository: &str, use_case: Option<&str>) -> Plan {
        if let Some(output_file) = &self.output_file {
            let output = target_path.join(output_file);
            if output.exists() {
                return Plan::AlreadySatisfied { output };
            }
        }
        Plan::Launch {
            command: self.render(repository, use_case),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

/// Separate a trailing `, file` from the command. The last field only counts
/// as an output file when it follows `, ` and is a bare relative path;
/// anything else, such as `grep -E 'a,b'` or `--opt,value`, stays part of
/// the command.
fn split_output_file(rest: &str) -> (&str, Option<&str>) {
    let Some((command, raw_tail)) = rest.rsplit_once(',') else {
        return (rest, None);
    };
    let tail = raw_tail.trim();
    if raw_tail.starts_with(char::is_whitespace) && is_bare_file_name(tail) {
        (command.trim(), Some(tail))
    } else {
        if tail.contains(char::is_whitespace) {
            debug!(field = tail, "Trailing catalog field is not a file name; keeping it in the command");
        }
        (rest, None)
    }
}

fn is_bare_file_name(field: &str) -> bool {
    !field.is_empty()
        && !field.starts_with('/')
        && !field.split('/').any(|part| part == "..")
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Load `path`, or a single entry that reports the missing file when run.
    pub fn load_or_fallback(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Command catalog unavailable");
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Self {
                    entries: vec![CatalogEntry {
                        name: FALLBACK_ENTRY_NAME.to_string(),
                        template: format!("echo '{} not found'", file_name),
                        output_file: None,
                    }],
                }
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<CatalogEntry> = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let (name, rest) = line.split_once(',').unwrap_or((line, ""));
            let name = name.trim();
            let (template, output_file) = split_output_file(rest.trim());
            if name.is_empty() || template.is_empty() {
                warn!(line = lineno + 1, "Skipping catalog line without a command");
                continue;
            }
            let output_file = output_file.map(str::to_string);

            let entry = CatalogEntry {
                name: name.to_string(),
                template: template.to_string(),
                output_file,
            };
            // Later lines win, keeping the first position.
            match entries.iter_mut().find(|e| e.name == entry.name) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Result<&CatalogEntry, CatalogError> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| CatalogError::UnknownCommand(name.to_string()))
    }
}
