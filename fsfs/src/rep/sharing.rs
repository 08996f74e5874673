//! The representation-sharing dedup side-store (`spec.md` §4.4.3): a
//! SHA-1-keyed map from fulltext digest to the first representation that
//! stored it, consulted before writing a new one so identical content is
//! stored exactly once across the whole repository.
//!
//! Persisted at `db/rep-cache.db` as a flat bincode blob guarded by a
//! mutex; `spec.md` §7 treats the whole file as disposable, so a missing
//! or corrupt file is recovered by starting empty rather than erroring.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_derive::{Deserialize, Serialize};

use crate::error::CResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepLocation {
    pub revision: u64,
    pub item_offset: u64,
    pub size: u64,
    pub expanded_size: u64,
}

pub struct RepSharingStore {
    path: PathBuf,
    entries: Mutex<HashMap<[u8; 20], RepLocation>>,
}

impl RepSharingStore {
    /// Loads the side-store from `path`. A missing or unreadable file
    /// yields an empty store rather than an error.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read(&path)
            .ok()
            .and_then(|bytes| bincode::deserialize::<HashMap<[u8; 20], RepLocation>>(&bytes).ok())
            .unwrap_or_default();
        if entries.is_empty() {
            log::debug!("starting rep-sharing store fresh at {}", path.display());
        }
        RepSharingStore { path, entries: Mutex::new(entries) }
    }

    pub fn lookup(&self, sha1: &[u8; 20]) -> Option<RepLocation> {
        self.entries.lock().unwrap().get(sha1).copied()
    }

    /// Records a new digest-to-location mapping and persists the whole
    /// store. The first recorded location for a digest wins; later
    /// insertions of the same digest are no-ops, since every caller
    /// should have consulted [`RepSharingStore::lookup`] first.
    pub fn record(&self, sha1: [u8; 20], location: RepLocation) -> CResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&sha1) {
            return Ok(());
        }
        entries.insert(sha1, location);
        self.persist(&entries)
    }

    /// Overwrites any existing entry for `sha1`, unlike [`RepSharingStore::record`].
    /// Used to correct an entry that pointed at a representation which no
    /// longer reads back as the digest it was recorded under.
    pub fn replace(&self, sha1: [u8; 20], location: RepLocation) -> CResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(sha1, location);
        self.persist(&entries)
    }

    fn persist(&self, entries: &HashMap<[u8; 20], RepLocation>) -> CResult<()> {
        let bytes = bincode::serialize(entries)
            .map_err(|e| crate::error::Error::corrupt_with_cause("failed to serialize rep-cache", *e))?;
        crate::paths::write_atomic(&self.path, &bytes)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_empty_store() {
        let dir = tempdir().unwrap();
        let store = RepSharingStore::load(dir.path().join("rep-cache.db"));
        assert_eq!(store.len(), 0);
        assert!(store.lookup(&[0u8; 20]).is_none());
    }

    #[test]
    fn records_and_persists_across_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rep-cache.db");
        let store = RepSharingStore::load(&path);
        let loc = RepLocation { revision: 3, item_offset: 128, size: 40, expanded_size: 100 };
        store.record([7u8; 20], loc).unwrap();
        assert_eq!(store.lookup(&[7u8; 20]), Some(loc));

        let reloaded = RepSharingStore::load(&path);
        assert_eq!(reloaded.lookup(&[7u8; 20]), Some(loc));
    }

    #[test]
    fn replace_overwrites_an_existing_entry() {
        let dir = tempdir().unwrap();
        let store = RepSharingStore::load(dir.path().join("rep-cache.db"));
        let stale = RepLocation { revision: 1, item_offset: 0, size: 5, expanded_size: 5 };
        let fresh = RepLocation { revision: 4, item_offset: 64, size: 5, expanded_size: 5 };
        store.record([9u8; 20], stale).unwrap();
        store.replace([9u8; 20], fresh).unwrap();
        assert_eq!(store.lookup(&[9u8; 20]), Some(fresh));
    }

    #[test]
    fn first_recorded_location_wins() {
        let dir = tempdir().unwrap();
        let store = RepSharingStore::load(dir.path().join("rep-cache.db"));
        let first = RepLocation { revision: 1, item_offset: 0, size: 5, expanded_size: 5 };
        let second = RepLocation { revision: 2, item_offset: 0, size: 5, expanded_size: 5 };
        store.record([1u8; 20], first).unwrap();
        store.record([1u8; 20], second).unwrap();
        assert_eq!(store.lookup(&[1u8; 20]), Some(first));
    }
}
