//! Run parameters, identity derivation, and params-file persistence.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde_json::Value;
use tracing::debug;

use super::error::{Result, RunlogError};

/// File name the run parameters are persisted under, inside the run directory.
pub const PARAMS_FILE: &str = "params.json";

/// Timestamp format used both in the run directory name and in the
/// persisted `created_at` field. Second resolution.
const TIME_FORMAT: &str = "%d_%m_%Y__%H_%M_%S";

/// Field names owned by the system; user fields may not shadow them.
const RESERVED_FIELDS: [&str; 5] = [
    "base_path",
    "created_at",
    "name_prefix",
    "output_path",
    "run_id",
];

/// Identity fields derived from a name prefix, a parent directory, and one
/// clock reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub run_id: String,
    pub output_path: PathBuf,
}

/// Derive the run identity for a config.
///
/// Pure: the same inputs always produce the same identity. Timestamps at
/// least one second apart produce distinct `run_id`s for the same prefix;
/// readings within the same second can collide, which surfaces as
/// [`RunlogError::DirectoryExists`] when the session is opened.
pub fn derive_identity(name_prefix: &str, base_path: &Path, at: DateTime<Local>) -> RunIdentity {
    let run_id = format!("{}_{}", name_prefix, at.format(TIME_FORMAT));
    let output_path = base_path.join(&run_id);
    RunIdentity {
        run_id,
        output_path,
    }
}

/// Configuration of one experiment run.
///
/// Holds a small set of reserved fields (identity and output location,
/// derived exactly once at construction) plus an open mapping of
/// caller-defined fields. Extra fields can be attached after construction
/// with [`RunConfig::insert`]; they survive the serialize/deserialize
/// round trip alongside everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    name_prefix: String,
    base_path: PathBuf,
    created_at: DateTime<Local>,
    run_id: String,
    output_path: PathBuf,
    extras: BTreeMap<String, Value>,
}

impl RunConfig {
    /// Create a new run config. Pure in-memory construction, no I/O.
    ///
    /// Reads the wall clock once at second resolution, then derives
    /// `run_id` and `output_path` from it; neither is ever recomputed
    /// afterward, so every persistence call during this config's lifetime
    /// targets the same location.
    pub fn new(
        name_prefix: impl Into<String>,
        base_path: impl Into<PathBuf>,
        user_fields: BTreeMap<String, Value>,
    ) -> Result<Self> {
        let name_prefix = name_prefix.into();
        let base_path = base_path.into();
        validate_required(&name_prefix, &base_path)?;

        for key in user_fields.keys() {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                return Err(RunlogError::InvalidConfig(format!(
                    "user field shadows reserved field: {key}"
                )));
            }
        }

        let created_at = clock_now();
        let RunIdentity {
            run_id,
            output_path,
        } = derive_identity(&name_prefix, &base_path, created_at);

        Ok(Self {
            name_prefix,
            base_path,
            created_at,
            run_id,
            output_path,
            extras: user_fields,
        })
    }

    /// Reconstruct a config from an in-memory mapping.
    ///
    /// Reserved keys are bound to their typed fields; persisted
    /// `created_at`/`run_id`/`output_path` values take precedence over
    /// re-derivation. Every unrecognized key is kept as an extra field,
    /// never discarded or rejected.
    pub fn from_mapping(mut mapping: BTreeMap<String, Value>) -> Result<Self> {
        let name_prefix = take_string(&mut mapping, "name_prefix")?;
        let base_path = PathBuf::from(take_string(&mut mapping, "base_path")?);
        validate_required(&name_prefix, &base_path)?;

        let created_at = match mapping.remove("created_at") {
            Some(Value::String(s)) => parse_timestamp(&s)?,
            Some(other) => {
                return Err(RunlogError::Format(format!(
                    "created_at must be a string, was: {other}"
                )))
            }
            None => clock_now(),
        };

        let derived = derive_identity(&name_prefix, &base_path, created_at);
        let run_id = match mapping.remove("run_id") {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(RunlogError::Format(format!(
                    "run_id must be a string, was: {other}"
                )))
            }
            None => derived.run_id,
        };
        let output_path = match mapping.remove("output_path") {
            Some(Value::String(s)) => PathBuf::from(s),
            Some(other) => {
                return Err(RunlogError::Format(format!(
                    "output_path must be a string, was: {other}"
                )))
            }
            None => derived.output_path,
        };

        Ok(Self {
            name_prefix,
            base_path,
            created_at,
            run_id,
            output_path,
            extras: mapping,
        })
    }

    /// Read a persisted params file back into a config.
    pub fn deserialize(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| RunlogError::Format(format!("invalid JSON in {}: {e}", path.display())))?;
        match value {
            Value::Object(map) => Self::from_mapping(map.into_iter().collect()),
            other => Err(RunlogError::Format(format!(
                "params file must hold a mapping, was: {other}"
            ))),
        }
    }

    /// Snapshot of every field, reserved and user-defined, as one mapping.
    pub fn to_mapping(&self) -> BTreeMap<String, Value> {
        let mut mapping = self.extras.clone();
        mapping.insert(
            "name_prefix".to_string(),
            Value::String(self.name_prefix.clone()),
        );
        mapping.insert(
            "base_path".to_string(),
            Value::String(self.base_path.to_string_lossy().into_owned()),
        );
        mapping.insert(
            "created_at".to_string(),
            Value::String(self.created_at.format(TIME_FORMAT).to_string()),
        );
        mapping.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        mapping.insert(
            "output_path".to_string(),
            Value::String(self.output_path.to_string_lossy().into_owned()),
        );
        mapping
    }

    /// Write the config as pretty JSON with lexicographically sorted keys.
    ///
    /// Defaults to `<output_path>/params.json`. Output is byte-stable for
    /// identical field values. Returns the path written.
    pub fn serialize(&self, target: Option<&Path>) -> Result<PathBuf> {
        let path = match target {
            Some(p) => p.to_path_buf(),
            None => self.output_path.join(PARAMS_FILE),
        };
        let content = serde_json::to_string_pretty(&self.to_mapping())
            .map_err(|e| RunlogError::Format(e.to_string()))?;
        fs::write(&path, content)?;
        debug!(event = "params.written", run_id = %self.run_id, path = %path.display());
        Ok(path)
    }

    /// Attach an ad-hoc field after construction (e.g. a value learned
    /// mid-run). Reserved field names are rejected.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if RESERVED_FIELDS.contains(&key.as_str()) {
            return Err(RunlogError::InvalidConfig(format!(
                "cannot overwrite reserved field: {key}"
            )));
        }
        self.extras.insert(key, value);
        Ok(())
    }

    /// Look up a user-defined field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

fn validate_required(name_prefix: &str, base_path: &Path) -> Result<()> {
    if name_prefix.is_empty() {
        return Err(RunlogError::InvalidConfig(
            "name_prefix cannot be empty".to_string(),
        ));
    }
    if base_path.as_os_str().is_empty() {
        return Err(RunlogError::InvalidConfig(
            "base_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn take_string(mapping: &mut BTreeMap<String, Value>, field: &'static str) -> Result<String> {
    match mapping.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(RunlogError::Format(format!(
            "{field} must be a string, was: {other}"
        ))),
        None => Err(RunlogError::Schema(field)),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| RunlogError::Format(format!("bad created_at timestamp {s:?}: {e}")))?;
    naive
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| RunlogError::Format(format!("created_at not a valid local time: {s:?}")))
}

/// Wall clock at second resolution.
fn clock_now() -> DateTime<Local> {
    let now = Local::now();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_time(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 6, h, m, s).unwrap()
    }

    #[test]
    fn derive_identity_formats_prefix_and_timestamp() {
        let id = derive_identity("exp", Path::new("/tmp/runs"), fixed_time(13, 45, 7));
        assert_eq!(id.run_id, "exp_06_08_2026__13_45_07");
        assert_eq!(id.output_path, PathBuf::from("/tmp/runs/exp_06_08_2026__13_45_07"));
    }

    #[test]
    fn derive_identity_distinct_across_one_second() {
        let a = derive_identity("exp", Path::new("/tmp/runs"), fixed_time(13, 45, 7));
        let b = derive_identity("exp", Path::new("/tmp/runs"), fixed_time(13, 45, 8));
        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.output_path, b.output_path);
    }

    #[test]
    fn derive_identity_same_second_collides() {
        let a = derive_identity("exp", Path::new("/tmp/runs"), fixed_time(13, 45, 7));
        let b = derive_identity("exp", Path::new("/tmp/runs"), fixed_time(13, 45, 7));
        assert_eq!(a, b);
    }

    #[test]
    fn new_derives_identity_once() {
        let config = RunConfig::new("exp", "/tmp/runs", BTreeMap::new()).unwrap();
        assert!(config.run_id().starts_with("exp_"));
        assert_eq!(
            config.output_path(),
            Path::new("/tmp/runs").join(config.run_id())
        );
        let expected = derive_identity("exp", Path::new("/tmp/runs"), config.created_at());
        assert_eq!(config.run_id(), expected.run_id);
    }

    #[test]
    fn new_rejects_empty_required_fields() {
        assert!(matches!(
            RunConfig::new("", "/tmp/runs", BTreeMap::new()),
            Err(RunlogError::InvalidConfig(_))
        ));
        assert!(matches!(
            RunConfig::new("exp", "", BTreeMap::new()),
            Err(RunlogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn new_rejects_shadowed_reserved_field() {
        let mut fields = BTreeMap::new();
        fields.insert("run_id".to_string(), json!("sneaky"));
        assert!(matches!(
            RunConfig::new("exp", "/tmp/runs", fields),
            Err(RunlogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn insert_and_get_user_fields() {
        let mut config = RunConfig::new("exp", "/tmp/runs", BTreeMap::new()).unwrap();
        config.insert("lr", json!(0.01)).unwrap();
        assert_eq!(config.get("lr"), Some(&json!(0.01)));
        assert!(matches!(
            config.insert("output_path", json!("/elsewhere")),
            Err(RunlogError::InvalidConfig(_))
        ));
    }

    #[test]
    fn to_mapping_contains_reserved_and_user_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("lr".to_string(), json!(0.1));
        let config = RunConfig::new("exp", "/tmp/runs", fields).unwrap();
        let mapping = config.to_mapping();
        for key in ["base_path", "created_at", "lr", "name_prefix", "output_path", "run_id"] {
            assert!(mapping.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn from_mapping_prefers_persisted_derived_fields() {
        let mut mapping = BTreeMap::new();
        mapping.insert("name_prefix".to_string(), json!("exp"));
        mapping.insert("base_path".to_string(), json!("/tmp/runs"));
        mapping.insert("created_at".to_string(), json!("06_08_2026__13_45_07"));
        mapping.insert("run_id".to_string(), json!("exp_custom"));
        mapping.insert("output_path".to_string(), json!("/tmp/runs/exp_custom"));

        let config = RunConfig::from_mapping(mapping).unwrap();
        assert_eq!(config.run_id(), "exp_custom");
        assert_eq!(config.output_path(), Path::new("/tmp/runs/exp_custom"));
        assert_eq!(config.created_at(), fixed_time(13, 45, 7));
    }

    #[test]
    fn from_mapping_derives_missing_identity_from_created_at() {
        let mut mapping = BTreeMap::new();
        mapping.insert("name_prefix".to_string(), json!("exp"));
        mapping.insert("base_path".to_string(), json!("/tmp/runs"));
        mapping.insert("created_at".to_string(), json!("06_08_2026__13_45_07"));

        let config = RunConfig::from_mapping(mapping).unwrap();
        assert_eq!(config.run_id(), "exp_06_08_2026__13_45_07");
    }

    #[test]
    fn from_mapping_keeps_unknown_keys_as_extras() {
        let mut mapping = BTreeMap::new();
        mapping.insert("name_prefix".to_string(), json!("exp"));
        mapping.insert("base_path".to_string(), json!("/tmp/runs"));
        mapping.insert("git_branch".to_string(), json!("main"));
        mapping.insert("notes".to_string(), json!({"seed": 42}));

        let config = RunConfig::from_mapping(mapping).unwrap();
        assert_eq!(config.get("git_branch"), Some(&json!("main")));
        assert_eq!(config.get("notes"), Some(&json!({"seed": 42})));
    }

    #[test]
    fn from_mapping_missing_required_field_is_schema_error() {
        let mut mapping = BTreeMap::new();
        mapping.insert("name_prefix".to_string(), json!("exp"));
        assert!(matches!(
            RunConfig::from_mapping(mapping),
            Err(RunlogError::Schema("base_path"))
        ));
    }

    #[test]
    fn from_mapping_wrong_type_is_format_error() {
        let mut mapping = BTreeMap::new();
        mapping.insert("name_prefix".to_string(), json!(7));
        mapping.insert("base_path".to_string(), json!("/tmp/runs"));
        assert!(matches!(
            RunConfig::from_mapping(mapping),
            Err(RunlogError::Format(_))
        ));
    }

    #[test]
    fn serialize_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("zeta".to_string(), json!(1));
        fields.insert("alpha".to_string(), json!("a"));
        let config = RunConfig::new("exp", dir.path(), fields).unwrap();

        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        config.serialize(Some(&first)).unwrap();
        config.serialize(Some(&second)).unwrap();
        assert_eq!(
            fs::read(&first).unwrap(),
            fs::read(&second).unwrap(),
            "same mapping must serialize byte-identically"
        );
    }

    #[test]
    fn serialize_sorts_keys_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("zeta".to_string(), json!(1));
        fields.insert("alpha".to_string(), json!(2));
        let config = RunConfig::new("exp", dir.path(), fields).unwrap();

        let path = dir.path().join("params.json");
        config.serialize(Some(&path)).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let alpha = content.find("\"alpha\"").unwrap();
        let base = content.find("\"base_path\"").unwrap();
        let zeta = content.find("\"zeta\"").unwrap();
        assert!(alpha < base && base < zeta);
    }

    #[test]
    fn serialize_into_missing_directory_is_io_error() {
        let config = RunConfig::new("exp", "/nonexistent-parent-dir", BTreeMap::new()).unwrap();
        assert!(matches!(
            config.serialize(None),
            Err(RunlogError::Io(_))
        ));
    }

    #[test]
    fn deserialize_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            RunConfig::deserialize(&path),
            Err(RunlogError::Format(_))
        ));
    }

    #[test]
    fn deserialize_rejects_non_mapping_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(matches!(
            RunConfig::deserialize(&path),
            Err(RunlogError::Format(_))
        ));
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("lr".to_string(), json!(0.1));
        fields.insert("layers".to_string(), json!([64, 64, 10]));
        let mut config = RunConfig::new("exp", dir.path(), fields).unwrap();
        config.insert("git_commit", json!("ab12cd3")).unwrap();

        let path = dir.path().join("params.json");
        config.serialize(Some(&path)).unwrap();
        let restored = RunConfig::deserialize(&path).unwrap();

        assert_eq!(restored.to_mapping(), config.to_mapping());
        assert_eq!(restored, config);
    }
}
