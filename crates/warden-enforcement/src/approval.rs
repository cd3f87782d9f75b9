use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

// ---------------------------------------------------------------------------
// WriteApproval
// ---------------------------------------------------------------------------

/// Approval state of one file path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteApproval {
    pub path: PathBuf,
    pub approved: bool,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("path escapes the workspace root: {0}")]
    OutsideWorkspace(String),
}

pub type Result<T> = std::result::Result<T, ApprovalError>;

// ---------------------------------------------------------------------------
// WriteApprovalStore
// ---------------------------------------------------------------------------

/// File-write approvals for one job, keyed by normalised path.
#[derive(Debug, Clone)]
pub struct WriteApprovalStore {
    root: PathBuf,
    entries: HashMap<PathBuf, WriteApproval>,
}

impl WriteApprovalStore {
    /// A relative `root` is resolved against the current directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let absolute = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("/"))
                .join(root)
        };
        Self {
            root: normalize_lexically(&absolute),
            entries: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the root without touching the filesystem.
    pub fn normalize(&self, path: &str) -> Result<PathBuf> {
        let joined = self.root.join(path);
        let normalized = normalize_lexically(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(ApprovalError::OutsideWorkspace(path.to_string()));
        }
        Ok(normalized)
    }

    pub fn approve(&mut self, path: &str) -> Result<PathBuf> {
        self.set(path, true)
    }

    /// Keep the entry but mark it unapproved.
    pub fn revoke(&mut self, path: &str) -> Result<PathBuf> {
        self.set(path, false)
    }

    fn set(&mut self, path: &str, approved: bool) -> Result<PathBuf> {
        let key = self.normalize(path)?;
        self.entries.insert(
            key.clone(),
            WriteApproval {
                path: key.clone(),
                approved,
                timestamp: Utc::now(),
            },
        );
        tracing::debug!(path = %key.display(), approved, "write approval updated");
        Ok(key)
    }

    /// False for unknown paths and for paths outside the root.
    pub fn is_approved(&self, path: &str) -> bool {
        self.get(path).map(|a| a.approved).unwrap_or(false)
    }

    pub fn get(&self, path: &str) -> Option<&WriteApproval> {
        let key = self.normalize(path).ok()?;
        self.entries.get(&key)
    }

    /// All entries, sorted by path.
    pub fn list(&self) -> Vec<&WriteApproval> {
        let mut all: Vec<&WriteApproval> = self.entries.values().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }
}

/// Resolve `.` and `..` components. `..` never climbs above the path's root;
/// leading `..` of a relative path are kept.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                None | Some(Component::ParentDir) => out.push(".."),
                Some(Component::RootDir | Component::Prefix(_) | Component::CurDir) => {}
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_parent_dirs_are_kept() {
        assert_eq!(
            normalize_lexically(Path::new("../../etc/passwd")),
            PathBuf::from("../../etc/passwd")
        );
        assert_eq!(normalize_lexically(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize_lexically(Path::new("/../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_relative_root_is_made_absolute_and_confines() {
        let cwd = std::env::current_dir().unwrap();
        let mut store = WriteApprovalStore::new(".");
        assert!(store.root().is_absolute());
        assert_eq!(store.root(), normalize_lexically(&cwd));

        assert!(matches!(
            store.approve("../../etc/passwd"),
            Err(ApprovalError::OutsideWorkspace(_))
        ));
        assert!(store.approve("/etc/passwd").is_err());

        let key = store.approve("src/lib.rs").unwrap();
        assert!(key.starts_with(store.root()));
        assert!(store.is_approved("./src/lib.rs"));
    }

    #[test]
    fn test_relative_and_dotted_paths_share_a_key() {
        let mut store = WriteApprovalStore::new("/work");
        store.approve("src/lib.rs").unwrap();
        assert!(store.is_approved("./src/lib.rs"));
        assert!(store.is_approved("src/../src/lib.rs"));
        assert!(store.is_approved("/work/src/lib.rs"));
        assert!(!store.is_approved("src/main.rs"));
    }

    #[test]
    fn test_escaping_the_root_is_rejected() {
        let mut store = WriteApprovalStore::new("/work");
        assert!(matches!(
            store.approve("../etc/passwd"),
            Err(ApprovalError::OutsideWorkspace(_))
        ));
        assert!(store.approve("/etc/passwd").is_err());
        assert!(!store.is_approved("../etc/passwd"));
    }

    #[test]
    fn test_revoke_keeps_entry() {
        let mut store = WriteApprovalStore::new("/work");
        store.approve("a.txt").unwrap();
        store.revoke("a.txt").unwrap();
        assert!(!store.is_approved("a.txt"));
        let entry = store.get("a.txt").unwrap();
        assert!(!entry.approved);
        assert_eq!(store.list().len(), 1);
    }
}
