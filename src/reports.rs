//! Generated Markdown reports and their diagram blocks.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::errors::WorkspaceError;
use crate::workspace::Target;

/// Report files the panel will show, in display order, with their labels.
pub const ALLOWED_REPORTS: &[(&str, &str)] = &[
    ("ra-overview.md", "Architecture Overview"),
    ("ra-obsolescence.md", "Obsolescence Report"),
    ("ra-migrate.md", "Migration Plan"),
    ("ra-secutiry.md", "Security Report"),
];

static MERMAID_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```mermaid\n(.*?)\n```").expect("mermaid pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportInfo {
    pub file: String,
    pub label: String,
}

pub fn label_for(file: &str) -> Option<&'static str> {
    ALLOWED_REPORTS
        .iter()
        .find(|(name, _)| *name == file)
        .map(|(_, label)| *label)
}

/// Allowed reports present in `target`, in allow-list order.
pub fn available_reports(target: &Target) -> Vec<ReportInfo> {
    ALLOWED_REPORTS
        .iter()
        .filter(|(file, _)| target.path.join(file).is_file())
        .map(|(file, label)| ReportInfo {
            file: file.to_string(),
            label: label.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum Segment {
    Markdown(String),
    Diagram(String),
}

/// Split Markdown into prose and mermaid diagram sources, in document order.
/// Whitespace-only prose between blocks is dropped.
pub fn segment(markdown: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for caps in MERMAID_BLOCK.captures_iter(markdown) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_markdown(&mut segments, &markdown[cursor..whole.start()]);
        segments.push(Segment::Diagram(body.as_str().to_string()));
        cursor = whole.end();
    }
    push_markdown(&mut segments, &markdown[cursor..]);
    segments
}

fn push_markdown(segments: &mut Vec<Segment>, text: &str) {
    if !text.trim().is_empty() {
        segments.push(Segment::Markdown(text.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub file: String,
    pub label: String,
    pub segments: Vec<Segment>,
}

/// Read and segment one report. Files outside the allow-list are refused.
pub fn load_report(target: &Target, file: &str) -> Result<Report, WorkspaceError> {
    let label = label_for(file).ok_or_else(|| WorkspaceError::ReportNotAllowed(file.to_string()))?;
    let path = target.path.join(file);
    let text = std::fs::read_to_string(&path).map_err(|source| WorkspaceError::Io { path, source })?;
    Ok(Report {
        file: file.to_string(),
        label: label.to_string(),
        segments: segment(&text),
    })
}
