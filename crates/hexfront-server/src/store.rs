//! Snapshot persistence for committed world versions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use hexfront_protocol::wire::{snapshot_hash, WireError};
use hexfront_protocol::{Snapshot, StateHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Wire(#[from] WireError),
    #[error("snapshot encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("snapshot decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("corrupt snapshot {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of committed snapshots. `persist` must not return before the write is durable.
pub trait SnapshotStore: Send + Sync {
    fn persist(&self, version: u64, snapshot: &Snapshot) -> Result<(), StoreError>;
    fn load_latest(&self) -> Result<Option<Snapshot>, StoreError>;
}

/// On-disk record: the snapshot plus the hash it had when written.
#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
    version: u64,
    hash: StateHash,
    snapshot: Snapshot,
}

/// Writes `snapshot-<version>.msgpack` files, each through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, version: u64) -> PathBuf {
        self.dir.join(format!("snapshot-{version}.msgpack"))
    }

    fn versions(&self) -> Result<Vec<u64>, StoreError> {
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let version = name
                .strip_prefix("snapshot-")
                .and_then(|rest| rest.strip_suffix(".msgpack"))
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(version) = version {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn read(&self, version: u64) -> Result<Snapshot, StoreError> {
        let path = self.path_for(version);
        let bytes = std::fs::read(&path)?;
        let stored: StoredSnapshot = rmp_serde::from_slice(&bytes)?;
        let corrupt = |reason: String| StoreError::Corrupt {
            path: path.display().to_string(),
            reason,
        };
        if stored.version != version || stored.snapshot.version != version {
            return Err(corrupt(format!(
                "holds version {} (snapshot {})",
                stored.version, stored.snapshot.version
            )));
        }
        let hash = snapshot_hash(&stored.snapshot)?;
        if hash != stored.hash {
            return Err(corrupt(format!("hash {hash} but recorded {}", stored.hash)));
        }
        Ok(stored.snapshot)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn persist(&self, version: u64, snapshot: &Snapshot) -> Result<(), StoreError> {
        let record = StoredSnapshot {
            version,
            hash: snapshot_hash(snapshot)?,
            snapshot: snapshot.clone(),
        };
        let bytes = rmp_serde::to_vec_named(&record)?;

        let path = self.path_for(version);
        let tmp = self.dir.join(format!(".snapshot-{version}.tmp"));
        std::fs::write(&tmp, &bytes)?;
        std::fs::File::open(&tmp)?.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        info!(version, hash = %record.hash, path = %path.display(), "snapshot persisted");
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<Snapshot>, StoreError> {
        match self.versions()?.last() {
            Some(&version) => {
                debug!(version, dir = %self.dir.display(), "loading snapshot");
                self.read(version).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// In-process store. Writes can be made to fail to exercise persistence errors.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<BTreeMap<u64, Snapshot>>,
    failing: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn versions(&self) -> Vec<u64> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn get(&self, version: u64) -> Option<Snapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&version)
            .cloned()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn persist(&self, version: u64, snapshot: &Snapshot) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "write of version {version} refused"
            )));
        }
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(version, snapshot.clone());
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .next_back()
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexfront_core::{load_rules, starter_world, RulesSource, StarterMap, WorldView};

    fn snapshot(version: u64) -> Snapshot {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let mut snapshot = starter_world(&rules, &StarterMap::default(), 11)
            .unwrap()
            .snapshot();
        snapshot.version = version;
        snapshot
    }

    #[test]
    fn file_store_returns_the_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snaps")).unwrap();
        assert!(store.load_latest().unwrap().is_none());

        for version in [1, 10, 2] {
            store.persist(version, &snapshot(version)).unwrap();
        }
        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest, snapshot(10));
        assert!(store.path_for(2).exists());
        // No temp files are left behind.
        let leftovers = std::fs::read_dir(store.dir())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn tampered_file_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path()).unwrap();
        store.persist(3, &snapshot(3)).unwrap();

        let mut tampered = snapshot(3);
        tampered.turn = 99;
        let record = StoredSnapshot {
            version: 3,
            hash: snapshot_hash(&snapshot(3)).unwrap(),
            snapshot: tampered,
        };
        std::fs::write(store.path_for(3), rmp_serde::to_vec_named(&record).unwrap()).unwrap();

        assert!(matches!(
            store.load_latest(),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn memory_store_can_refuse_writes() {
        let store = MemorySnapshotStore::new();
        store.persist(1, &snapshot(1)).unwrap();
        store.set_failing(true);
        assert!(matches!(
            store.persist(2, &snapshot(2)),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.versions(), vec![1]);
        assert_eq!(store.load_latest().unwrap().map(|s| s.version), Some(1));
    }
}
