//! Durable, path-addressed artifacts: raw tool output, compressed summaries,
//! notes and final reports.
//!
//! Artifacts are append-only. Paths are namespaced
//! `{bundleId}/{DIRECTION}/{runId}/...`, so concurrently running directions
//! never write the same path and the store needs no coordination beyond
//! what the filesystem gives it.
//!
//! Writing is idempotent by content:
//!
//! | Existing at `path` | Result |
//! |--------------------|--------|
//! | nothing | written at `path` |
//! | same content | no write, existing reference returned |
//! | different content | written at `{stem}-{hash}.{ext}` (same check applies there) |
//!
//! A step replayed after a resume therefore never duplicates an artifact and
//! never overwrites one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Reference to a stored artifact. Opaque outside the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct FileRef {
    pub path: String,
}

impl FileRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Durable artifact storage shared by every direction of every bundle.
pub trait ArtifactStore: Send + Sync {
    /// Store `content` at `path` (or a content-hash sibling, see module docs).
    fn write_artifact(&self, path: &str, content: &str) -> Result<FileRef, String>;

    fn read_artifact(&self, file: &FileRef) -> Result<String, String>;

    /// All artifacts whose path starts with `prefix`, sorted by path.
    fn list(&self, prefix: &str) -> Result<Vec<FileRef>, String>;
}

/// Reject paths that could escape the store root or alias another path.
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("Artifact path is empty".into());
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(format!("Artifact path must be relative: {path}"));
    }
    if path
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(format!("Artifact path has an invalid segment: {path}"));
    }
    Ok(())
}

/// Replace characters that are unsafe in a path segment.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.');
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

/// FNV-1a hash of the content, used to name sibling versions.
pub(crate) fn content_hash(content: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in content.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn sibling_path(path: &str, content: &str) -> String {
    let tag = format!("{:08x}", content_hash(content) as u32);
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{tag}.{ext}"),
        _ => format!("{file}-{tag}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

enum WritePlan {
    Existing(FileRef),
    Write(String),
}

/// Apply the dedup policy given a lookup of current content by path.
fn plan_write(
    path: &str,
    content: &str,
    existing: impl Fn(&str) -> Result<Option<String>, String>,
) -> Result<WritePlan, String> {
    validate_path(path)?;
    match existing(path)? {
        None => Ok(WritePlan::Write(path.to_string())),
        Some(current) if current == content => Ok(WritePlan::Existing(FileRef::new(path))),
        Some(_) => {
            let alt = sibling_path(path, content);
            match existing(&alt)? {
                Some(current) if current == content => Ok(WritePlan::Existing(FileRef::new(alt))),
                _ => Ok(WritePlan::Write(alt)),
            }
        }
    }
}

// ── Filesystem store ───────────────────────────────────────────────

/// Stores artifacts as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    fn read_optional(&self, path: &str) -> Result<Option<String>, String> {
        let full = self.full_path(path);
        if !full.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&full)
            .map(Some)
            .map_err(|e| format!("Failed to read artifact {path}: {e}"))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<FileRef>) -> Result<(), String> {
        let entries =
            std::fs::read_dir(dir).map_err(|e| format!("Failed to read artifact dir: {e}"))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {e}"))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if !name.starts_with('.')
                && let Ok(rel) = path.strip_prefix(&self.root)
            {
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                out.push(FileRef::new(rel.join("/")));
            }
        }
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    /// Atomic write: content goes to a hidden temp file, then is renamed into place.
    fn write_artifact(&self, path: &str, content: &str) -> Result<FileRef, String> {
        let target = match plan_write(path, content, |p| self.read_optional(p))? {
            WritePlan::Existing(file) => {
                debug!("Artifact {file} already stored, skipping write");
                return Ok(file);
            }
            WritePlan::Write(target) => target,
        };

        let full = self.full_path(&target);
        let dir = full
            .parent()
            .ok_or_else(|| format!("Artifact path has no parent: {target}"))?;
        std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create artifact dir: {e}"))?;

        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{file_name}.tmp"));
        std::fs::write(&tmp, content).map_err(|e| format!("Failed to write artifact: {e}"))?;
        std::fs::rename(&tmp, &full).map_err(|e| format!("Failed to rename artifact: {e}"))?;

        debug!("Wrote artifact {target} ({} bytes)", content.len());
        Ok(FileRef::new(target))
    }

    fn read_artifact(&self, file: &FileRef) -> Result<String, String> {
        validate_path(&file.path)?;
        self.read_optional(&file.path)?
            .ok_or_else(|| format!("Artifact not found: {file}"))
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileRef>, String> {
        let mut out = Vec::new();
        if self.root.exists() {
            self.collect(&self.root, &mut out)?;
        }
        out.retain(|f| f.path.starts_with(prefix));
        out.sort();
        Ok(out)
    }
}

// ── In-memory store ────────────────────────────────────────────────

/// Keeps artifacts in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.lock().map_or(0, |f| f.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn write_artifact(&self, path: &str, content: &str) -> Result<FileRef, String> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| "Artifact store lock poisoned".to_string())?;
        let plan = plan_write(path, content, |p| Ok(files.get(p).cloned()))?;
        match plan {
            WritePlan::Existing(file) => Ok(file),
            WritePlan::Write(target) => {
                files.insert(target.clone(), content.to_string());
                Ok(FileRef::new(target))
            }
        }
    }

    fn read_artifact(&self, file: &FileRef) -> Result<String, String> {
        let files = self
            .files
            .lock()
            .map_err(|_| "Artifact store lock poisoned".to_string())?;
        files
            .get(&file.path)
            .cloned()
            .ok_or_else(|| format!("Artifact not found: {file}"))
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileRef>, String> {
        let files = self
            .files
            .lock()
            .map_err(|_| "Artifact store lock poisoned".to_string())?;
        Ok(files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .map(FileRef::new)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fs_write_read_and_list() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path()).unwrap();
        let a = store
            .write_artifact("b1/PRODUCT/r1/notes/step-001.md", "price: $39")
            .unwrap();
        store
            .write_artifact("b1/GUEST/r1/notes/step-001.md", "bio")
            .unwrap();

        assert_eq!(store.read_artifact(&a).unwrap(), "price: $39");
        let product = store.list("b1/PRODUCT/").unwrap();
        assert_eq!(product, vec![a]);
        assert_eq!(store.list("b1/").unwrap().len(), 2);
    }

    #[test]
    fn same_content_is_not_duplicated() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path()).unwrap();
        let first = store.write_artifact("b/GUEST/r/report.md", "report").unwrap();
        let second = store.write_artifact("b/GUEST/r/report.md", "report").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list("b/").unwrap().len(), 1);
    }

    #[test]
    fn different_content_goes_to_sibling_path() {
        let store = MemoryArtifactStore::new();
        let first = store.write_artifact("b/GUEST/r/report.md", "v1").unwrap();
        let second = store.write_artifact("b/GUEST/r/report.md", "v2").unwrap();
        assert_ne!(first, second);
        assert!(second.path.starts_with("b/GUEST/r/report-"));
        assert!(second.path.ends_with(".md"));
        assert_eq!(store.read_artifact(&first).unwrap(), "v1");

        // Replaying v2 resolves to the same sibling.
        let again = store.write_artifact("b/GUEST/r/report.md", "v2").unwrap();
        assert_eq!(again, second);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn rejects_escaping_paths() {
        let store = MemoryArtifactStore::new();
        assert!(store.write_artifact("../etc/passwd", "x").is_err());
        assert!(store.write_artifact("/abs/path", "x").is_err());
        assert!(store.write_artifact("a//b", "x").is_err());
        assert!(store.write_artifact("", "x").is_err());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(tmp.path()).unwrap();
        store.write_artifact("b/PRODUCT/r/raw/a.txt", "raw").unwrap();
        assert!(!tmp.path().join("b/PRODUCT/r/raw/.a.txt.tmp").exists());
        assert!(tmp.path().join("b/PRODUCT/r/raw/a.txt").exists());
    }

    #[test]
    fn sanitize_segment_replaces_separators() {
        assert_eq!(sanitize_segment("ep 42/guest"), "ep-42-guest");
        assert_eq!(sanitize_segment("../"), "_");
        assert_eq!(sanitize_segment("Price & Ingredients"), "Price---Ingredients");
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let store = MemoryArtifactStore::new();
        assert!(store.read_artifact(&FileRef::new("nope.md")).is_err());
    }
}
