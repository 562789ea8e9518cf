//! Durable read-state for notifications.
//!
//! One JSON array of acknowledged notification ids, read fully on open and
//! rewritten fully on every change. The local set is the tie-breaker over
//! whatever "unread" flags the server reports; ids are never implicitly
//! removed. Single-process assumption, no locking.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const READ_STATE_FILE: &str = "read_notifications.json";

#[derive(Debug)]
pub struct ReadStateStore {
    path: PathBuf,
    // Insertion order is kept so the file stays diffable across rewrites.
    ids: Vec<String>,
    index: HashSet<String>,
}

impl ReadStateStore {
    /// Open the store at `<data_dir>/read_notifications.json`. A missing
    /// file starts empty; an unreadable or corrupt file is treated the same
    /// way rather than failing the whole agent.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(READ_STATE_FILE);
        let ids: Vec<String> = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(?err, path = %path.display(), "corrupt read-state file; starting empty");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!(?err, path = %path.display(), "unreadable read-state file; starting empty");
                Vec::new()
            }
        };
        let index = ids.iter().cloned().collect();
        Ok(Self { path, ids, index })
    }

    pub fn has(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Record an id as read. Idempotent: re-adding a present id leaves the
    /// stored content untouched.
    pub fn add(&mut self, id: &str) -> Result<()> {
        if self.index.contains(id) {
            return Ok(());
        }
        self.ids.push(id.to_string());
        self.index.insert(id.to_string());
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let content = serde_json::to_string(&self.ids).context("serialize read-state")?;
        fs::write(&self.path, content)
            .with_context(|| format!("write read-state file {}", self.path.display()))
    }
}
