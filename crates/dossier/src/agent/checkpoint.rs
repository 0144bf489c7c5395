//! Checkpoint and resume.
//!
//! State is persisted at suspension points (end of every acting step, end
//! of a direction, after each bundle queue advance) under a hierarchical
//! [`Namespace`]:
//!
//! ```text
//! {bundle_id}/{DIRECTION}/{run_id}   one direction agent
//! {bundle_id}/_bundle/{run_id}       the bundle orchestrator
//! ```
//!
//! Stores keep every record with a monotonically increasing sequence
//! number; [`CheckpointStore::load`] returns the latest one, or `None` for a
//! namespace that was never saved.
//!
//! The store is an explicitly passed handle (`Arc<dyn CheckpointStore>`)
//! threaded from the orchestrator into each agent.

use crate::bundle::DirectionType;
use crate::error::{ResearchError, Result};
use crate::tools::artifacts::{content_hash, sanitize_segment};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::warn;

/// Segment used in place of a direction for bundle-level state.
const BUNDLE_SCOPE: &str = "_bundle";

// ── Namespace ──────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub bundle_id: String,
    /// `None` for the bundle orchestrator's own state.
    pub direction: Option<DirectionType>,
    pub run_id: String,
}

impl Namespace {
    pub fn direction(
        bundle_id: impl Into<String>,
        direction: DirectionType,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            direction: Some(direction),
            run_id: run_id.into(),
        }
    }

    pub fn bundle(bundle_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            direction: None,
            run_id: run_id.into(),
        }
    }

    /// Relative path with sanitized segments. Also the artifact prefix for
    /// a direction namespace.
    pub fn path(&self) -> String {
        let scope = self.direction.map_or(BUNDLE_SCOPE, |d| d.as_str());
        format!(
            "{}/{scope}/{}",
            path_segment(&self.bundle_id),
            path_segment(&self.run_id)
        )
    }
}

/// Ids that sanitize to themselves are used as-is; any other id gets a
/// hash of the raw value appended so distinct ids never share a directory.
fn path_segment(raw: &str) -> String {
    let sanitized = sanitize_segment(raw);
    if sanitized == raw {
        sanitized
    } else {
        format!("{sanitized}-{:08x}", content_hash(raw) as u32)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

// ── Records and stores ─────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckpointRecord {
    pub namespace: Namespace,
    /// 1-based, increasing per namespace.
    pub sequence: u64,
    /// Which boundary produced this record (`acting`, `done`, ...).
    pub label: String,
    pub saved_at: DateTime<Utc>,
    pub state: serde_json::Value,
}

/// Persistence collaborator for checkpoints.
pub trait CheckpointStore: Send + Sync {
    fn save(
        &self,
        namespace: &Namespace,
        label: &str,
        state: serde_json::Value,
    ) -> std::result::Result<CheckpointRecord, String>;

    /// Latest record for `namespace`; `Ok(None)` when nothing was saved.
    fn load(&self, namespace: &Namespace) -> std::result::Result<Option<CheckpointRecord>, String>;
}

/// Serialize `state` and save it.
pub fn save_state<T: Serialize>(
    store: &dyn CheckpointStore,
    namespace: &Namespace,
    label: &str,
    state: &T,
) -> Result<CheckpointRecord> {
    let value = serde_json::to_value(state).map_err(|e| {
        ResearchError::Checkpoint(format!("Failed to serialize state for {namespace}: {e}"))
    })?;
    store
        .save(namespace, label, value)
        .map_err(ResearchError::Checkpoint)
}

/// Load and deserialize the latest state for `namespace`.
pub fn load_state<T: DeserializeOwned>(
    store: &dyn CheckpointStore,
    namespace: &Namespace,
) -> Result<Option<T>> {
    let Some(record) = store.load(namespace).map_err(ResearchError::Checkpoint)? else {
        return Ok(None);
    };
    serde_json::from_value(record.state).map(Some).map_err(|e| {
        ResearchError::Checkpoint(format!("Failed to parse checkpoint for {namespace}: {e}"))
    })
}

/// Unique id for one bundle run.
pub fn generate_run_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{ts:x}-{count:04x}")
}

// ── FileCheckpointStore ────────────────────────────────────────────

/// Checkpoints as JSON files, one per save.
///
/// ```text
/// root/
///   bundle-7/
///     _bundle/run-18f.../seq-0003.json
///     PRODUCT/run-18f.../seq-0001.json
///     PRODUCT/run-18f.../seq-0002.json
/// ```
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &Namespace) -> PathBuf {
        self.root.join(namespace.path())
    }

    fn seq_filename(sequence: u64) -> String {
        format!("seq-{sequence:04}.json")
    }

    fn latest(&self, dir: &Path) -> std::result::Result<Option<(u64, PathBuf)>, String> {
        if !dir.exists() {
            return Ok(None);
        }
        let entries =
            std::fs::read_dir(dir).map_err(|e| format!("Failed to read checkpoint dir: {e}"))?;

        let mut latest: Option<(u64, PathBuf)> = None;
        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {e}"))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(seq_str) = name
                .strip_prefix("seq-")
                .and_then(|s| s.strip_suffix(".json"))
                && let Ok(seq) = seq_str.parse::<u64>()
                && latest.as_ref().is_none_or(|(s, _)| seq > *s)
            {
                latest = Some((seq, entry.path()));
            }
        }
        Ok(latest)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(
        &self,
        namespace: &Namespace,
        label: &str,
        state: serde_json::Value,
    ) -> std::result::Result<CheckpointRecord, String> {
        let dir = self.namespace_dir(namespace);
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create checkpoint dir: {e}"))?;

        let sequence = self.latest(&dir)?.map_or(1, |(s, _)| s + 1);
        let record = CheckpointRecord {
            namespace: namespace.clone(),
            sequence,
            label: label.to_string(),
            saved_at: Utc::now(),
            state,
        };

        let filename = Self::seq_filename(sequence);
        let tmp_path = dir.join(format!(".{filename}.tmp"));
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| format!("Failed to serialize checkpoint: {e}"))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("Failed to write temp checkpoint: {e}"))?;
        std::fs::rename(&tmp_path, dir.join(filename))
            .map_err(|e| format!("Failed to rename checkpoint: {e}"))?;

        Ok(record)
    }

    fn load(&self, namespace: &Namespace) -> std::result::Result<Option<CheckpointRecord>, String> {
        let Some((_, path)) = self.latest(&self.namespace_dir(namespace))? else {
            return Ok(None);
        };
        let json =
            std::fs::read_to_string(&path).map_err(|e| format!("Failed to read checkpoint: {e}"))?;
        match serde_json::from_str(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Malformed checkpoint at {}: {e}", path.display());
                Err(format!("Failed to parse checkpoint: {e}"))
            }
        }
    }
}

// ── MemoryCheckpointStore ──────────────────────────────────────────

/// In-process store, for tests and single-shot runs that never resume.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<Namespace, Vec<CheckpointRecord>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record saved under `namespace`, oldest first.
    pub fn history(&self, namespace: &Namespace) -> Vec<CheckpointRecord> {
        self.records
            .lock()
            .map(|records| records.get(namespace).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Drop everything after the first `keep` records of `namespace`,
    /// as if the process had died right after that save.
    pub fn truncate(&self, namespace: &Namespace, keep: usize) {
        if let Ok(mut records) = self.records.lock()
            && let Some(list) = records.get_mut(namespace)
        {
            list.truncate(keep);
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(
        &self,
        namespace: &Namespace,
        label: &str,
        state: serde_json::Value,
    ) -> std::result::Result<CheckpointRecord, String> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| "Failed to lock checkpoint store".to_string())?;
        let list = records.entry(namespace.clone()).or_default();
        let record = CheckpointRecord {
            namespace: namespace.clone(),
            sequence: list.len() as u64 + 1,
            label: label.to_string(),
            saved_at: Utc::now(),
            state,
        };
        list.push(record.clone());
        Ok(record)
    }

    fn load(&self, namespace: &Namespace) -> std::result::Result<Option<CheckpointRecord>, String> {
        let records = self
            .records
            .lock()
            .map_err(|_| "Failed to lock checkpoint store".to_string())?;
        Ok(records.get(namespace).and_then(|list| list.last().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns() -> Namespace {
        Namespace::direction("bundle-7", DirectionType::Product, "run-1")
    }

    #[test]
    fn namespace_paths() {
        assert_eq!(ns().path(), "bundle-7/PRODUCT/run-1");
        assert_eq!(Namespace::bundle("b", "r").to_string(), "b/_bundle/r");
        assert_ne!(
            Namespace::direction("b", DirectionType::Guest, "r").path(),
            Namespace::direction("b", DirectionType::Product, "r").path()
        );
    }

    #[test]
    fn altered_ids_do_not_collide() {
        let spaced = Namespace::bundle("ep 1", "r").path();
        let dashed = Namespace::bundle("ep-1", "r").path();
        assert_eq!(dashed, "ep-1/_bundle/r");
        assert_ne!(spaced, dashed);
        assert!(spaced.starts_with("ep-1-"));
        assert!(!spaced.contains(' '));

        let traversal = Namespace::direction("b", DirectionType::Guest, "../r").path();
        assert!(!traversal.contains(".."));
        assert_eq!(traversal, Namespace::direction("b", DirectionType::Guest, "../r").path());
    }

    #[test]
    fn file_store_returns_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        assert!(store.load(&ns()).unwrap().is_none());

        store.save(&ns(), "acting", json!({"step": 1})).unwrap();
        let second = store.save(&ns(), "acting", json!({"step": 2})).unwrap();
        assert_eq!(second.sequence, 2);

        let loaded = store.load(&ns()).unwrap().unwrap();
        assert_eq!(loaded.sequence, 2);
        assert_eq!(loaded.state["step"], 2);
        assert!(dir.path().join("bundle-7/PRODUCT/run-1/seq-0002.json").exists());
        assert!(!dir.path().join("bundle-7/PRODUCT/run-1/.seq-0002.json.tmp").exists());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileCheckpointStore::new(dir.path())
            .unwrap()
            .save(&ns(), "done", json!({"phase": "done"}))
            .unwrap();
        let reopened = FileCheckpointStore::new(dir.path()).unwrap();
        let record = reopened.load(&ns()).unwrap().unwrap();
        assert_eq!(record.label, "done");
    }

    #[test]
    fn memory_store_history_and_truncate() {
        let store = MemoryCheckpointStore::new();
        for step in 1..=3 {
            store.save(&ns(), "acting", json!({"step": step})).unwrap();
        }
        assert_eq!(store.history(&ns()).len(), 3);
        store.truncate(&ns(), 1);
        assert_eq!(store.load(&ns()).unwrap().unwrap().state["step"], 1);
        assert!(
            store
                .load(&Namespace::bundle("other", "r"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn typed_helpers_roundtrip() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Progress {
            index: usize,
        }
        let store = MemoryCheckpointStore::new();
        let namespace = Namespace::bundle("b", "r");
        assert!(load_state::<Progress>(&store, &namespace).unwrap().is_none());
        save_state(&store, &namespace, "queue", &Progress { index: 2 }).unwrap();
        let loaded: Progress = load_state(&store, &namespace).unwrap().unwrap();
        assert_eq!(loaded, Progress { index: 2 });
    }

    #[test]
    fn incompatible_state_is_a_checkpoint_error() {
        let store = MemoryCheckpointStore::new();
        store.save(&ns(), "acting", json!("not a struct")).unwrap();
        let err = load_state::<HashMap<String, u32>>(&store, &ns()).unwrap_err();
        assert!(matches!(err, ResearchError::Checkpoint(_)));
    }

    #[test]
    fn run_ids_are_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }
}
