//! runlog Core Library
//!
//! Experiment run bookkeeping: a per-run output directory derived from a
//! name prefix and a timestamp, run parameters persisted as sorted JSON,
//! an optional git snapshot for reproducibility, and a schema-free store
//! of watched values persisted at run end.
//!
//! ```no_run
//! use runlog_core::{RunConfig, RunSession, WatchStore};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> runlog_core::Result<()> {
//! let mut fields = BTreeMap::new();
//! fields.insert("lr".to_string(), serde_json::json!(0.1));
//! let mut config = RunConfig::new("exp", "/tmp/runs", fields)?;
//!
//! let mut watches = WatchStore::new();
//! let mut session = RunSession::new(&mut config);
//! session.open(None)?;
//!
//! // ... run the experiment ...
//! watches.append("losses", serde_json::json!(0.42));
//!
//! session.close(&watches)?;
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod session;
pub mod snapshot;
pub mod telemetry;

pub use domain::{
    derive_identity, Result, RunConfig, RunIdentity, RunlogError, WatchStore, PARAMS_FILE,
    WATCHES_FILE,
};

pub use session::{RunSession, DIFF_FILE};

pub use snapshot::{is_git_repo, GitSnapshotSource, SnapshotSource, SourceSnapshot};

pub use telemetry::init_tracing;

/// runlog version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
