//! Run session lifecycle: directory creation, config persistence, watch
//! persistence.
//!
//! A session moves `Created → Active → Closed`:
//! 1. [`RunSession::open`] creates the run directory (collision is fatal),
//!    optionally attaches a source snapshot to the config, then persists
//!    the config.
//! 2. The caller mutates its [`WatchStore`] freely during the run.
//! 3. [`RunSession::close`] persists the watch store in its final state.

use std::fs;
use std::io::ErrorKind;

use serde_json::Value;
use tracing::info;

use crate::domain::error::{Result, RunlogError};
use crate::domain::params::RunConfig;
use crate::domain::watches::WatchStore;
use crate::snapshot::SnapshotSource;

/// File name the working-tree diff is written under when a snapshot is
/// captured and the tree is dirty.
pub const DIFF_FILE: &str = "git_diff.patch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Active,
    Closed,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Created => "Created",
            SessionState::Active => "Active",
            SessionState::Closed => "Closed",
        }
    }
}

/// Orchestrates one run: borrows the caller's [`RunConfig`] for the
/// session's duration and enforces the persistence order (directory, then
/// config at open, then watches at close).
pub struct RunSession<'a> {
    config: &'a mut RunConfig,
    state: SessionState,
}

impl<'a> RunSession<'a> {
    pub fn new(config: &'a mut RunConfig) -> Self {
        Self {
            config,
            state: SessionState::Created,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &*self.config
    }

    /// Open the session: create the run directory, capture an optional
    /// source snapshot, persist the config.
    ///
    /// An existing directory at the derived output path is a hard failure
    /// ([`RunlogError::DirectoryExists`]) and aborts before any write. A
    /// failure after directory creation leaves the directory on disk with
    /// the session failed-open; nothing is rolled back.
    pub fn open(&mut self, snapshot: Option<&dyn SnapshotSource>) -> Result<()> {
        self.expect_state(SessionState::Created)?;

        match fs::create_dir(self.config.output_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RunlogError::DirectoryExists(
                    self.config.output_path().to_path_buf(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(source) = snapshot {
            self.capture_snapshot(source)?;
        }

        self.config.serialize(None)?;
        self.state = SessionState::Active;
        info!(
            event = "session.opened",
            run_id = %self.config.run_id(),
            output_path = %self.config.output_path().display(),
        );
        Ok(())
    }

    /// Close the session, persisting the watch store into the run
    /// directory. Valid only once, from an open session.
    pub fn close(&mut self, watches: &WatchStore) -> Result<()> {
        self.expect_state(SessionState::Active)?;
        watches.persist(self.config.output_path())?;
        self.state = SessionState::Closed;
        info!(
            event = "session.closed",
            run_id = %self.config.run_id(),
            watches = watches.len(),
        );
        Ok(())
    }

    /// Capture branch/revision/diff against the config's base path (the
    /// repository the experiment code lives in) and attach the results to
    /// the config as ad-hoc fields. The diff is written to a sibling file
    /// only when non-empty.
    fn capture_snapshot(&mut self, source: &dyn SnapshotSource) -> Result<()> {
        let snap = source.capture(self.config.base_path())?;
        info!(
            event = "session.snapshot_captured",
            run_id = %self.config.run_id(),
            branch = %snap.branch,
            revision = %snap.short_revision,
            dirty = !snap.diff.is_empty(),
        );

        if !snap.diff.is_empty() {
            fs::write(self.config.output_path().join(DIFF_FILE), &snap.diff)?;
        }
        self.config.insert("git_branch", Value::String(snap.branch))?;
        self.config
            .insert("git_commit", Value::String(snap.short_revision))?;
        Ok(())
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(RunlogError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }
}
