//! Schema-free store of values watched during a run.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use super::error::{Result, RunlogError};

/// File name the watch store is persisted under, inside the run directory.
pub const WATCHES_FILE: &str = "watches.json";

/// Open mapping from watch name to accumulated value.
///
/// The store imposes no schema: a watch can be a growable sequence, a
/// nested mapping, or a counter. Persisted exactly once, at end of run,
/// as pretty JSON with sorted keys, which is the only format
/// [`WatchStore::load`] accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchStore {
    entries: BTreeMap<String, Value>,
}

impl WatchStore {
    /// Empty store, in-memory only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a watch to a value, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.entries.get_mut(name)
    }

    /// Push a value onto a sequence watch, creating the sequence on first
    /// use. A non-sequence value under the same name is restarted as a
    /// sequence holding only `value`.
    pub fn append(&mut self, name: &str, value: Value) {
        let slot = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value),
            other => *other = Value::Array(vec![value]),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// The full mapping of entries.
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Write the whole store to `<directory>/watches.json`, reflecting
    /// exactly the entries present at call time. Atomic write: temp file
    /// in the target directory, then rename. Returns the path written.
    pub fn persist(&self, directory: &Path) -> Result<PathBuf> {
        let path = directory.join(WATCHES_FILE);
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RunlogError::Format(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(directory)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| RunlogError::Io(e.error))?;

        debug!(event = "watches.written", path = %path.display(), entries = self.entries.len());
        Ok(path)
    }

    /// Reconstruct a store from a previously persisted file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RunlogError::Format(format!("invalid watch file {}: {e}", path.display())))
    }
}
