//! Stable per-target port assignment for documentation servers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::PortError;

/// First port handed out.
pub const DEFAULT_BASE_PORT: u16 = 8005;

/// Maps targets to ports. Assignment is idempotent per target and ports are
/// never reused within a process lifetime, even after a server stops.
#[derive(Debug, Clone)]
pub struct PortRegistry {
    next: u16,
    exhausted: bool,
    assignments: HashMap<PathBuf, u16>,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

impl PortRegistry {
    pub fn new(base: u16) -> Self {
        Self {
            next: base,
            exhausted: false,
            assignments: HashMap::new(),
        }
    }

    /// Port for `target`, assigning the next free one on first request.
    pub fn assign(&mut self, target: &Path) -> Result<u16, PortError> {
        if let Some(port) = self.assignments.get(target) {
            return Ok(*port);
        }
        if self.exhausted {
            return Err(PortError::Exhausted { last: u16::MAX });
        }
        let port = self.next;
        match self.next.checked_add(1) {
            Some(next) => self.next = next,
            None => self.exhausted = true,
        }
        self.assignments.insert(target.to_path_buf(), port);
        tracing::debug!(port, target = %target.display(), "Assigned documentation port");
        Ok(port)
    }

    pub fn get(&self, target: &Path) -> Option<u16> {
        self.assignments.get(target).copied()
    }

    /// All assignments ordered by port.
    pub fn assignments(&self) -> Vec<(PathBuf, u16)> {
        let mut all: Vec<_> = self
            .assignments
            .iter()
            .map(|(path, port)| (path.clone(), *port))
            .collect();
        all.sort_by_key(|(_, port)| *port);
        all
    }
}
