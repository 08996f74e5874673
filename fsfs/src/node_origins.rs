//! The node-origins cache (`spec.md` §3, supplemental): a side-store from
//! node id to the revision and path at which that node was first created,
//! letting history queries find a node's origin without walking the
//! predecessor chain all the way back. Disposable, like the rep-sharing
//! store it mirrors in shape.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_derive::{Deserialize, Serialize};

use crate::error::CResult;
use crate::id::NodeId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOrigin {
    pub revision: u64,
    pub path: String,
}

pub struct NodeOriginsCache {
    path: PathBuf,
    entries: Mutex<HashMap<u64, NodeOrigin>>,
}

impl NodeOriginsCache {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read(&path)
            .ok()
            .and_then(|bytes| bincode::deserialize::<HashMap<u64, NodeOrigin>>(&bytes).ok())
            .unwrap_or_default();
        NodeOriginsCache { path, entries: Mutex::new(entries) }
    }

    pub fn lookup(&self, node: NodeId) -> Option<NodeOrigin> {
        self.entries.lock().unwrap().get(&node.0).cloned()
    }

    /// Records the origin of `node`, if not already known. Origins never
    /// change once recorded, since a node id is assigned exactly once.
    pub fn record(&self, node: NodeId, origin: NodeOrigin) -> CResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&node.0) {
            return Ok(());
        }
        entries.insert(node.0, origin);
        let bytes = bincode::serialize(&*entries)
            .map_err(|e| crate::error::Error::corrupt_with_cause("failed to serialize node-origins cache", *e))?;
        crate::paths::write_atomic(&self.path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_empty_cache() {
        let dir = tempdir().unwrap();
        let cache = NodeOriginsCache::load(dir.path().join("node-origins.db"));
        assert!(cache.lookup(NodeId(1)).is_none());
    }

    #[test]
    fn records_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node-origins.db");
        let cache = NodeOriginsCache::load(&path);
        cache.record(NodeId(9), NodeOrigin { revision: 3, path: "/a/b.txt".to_string() }).unwrap();

        let reloaded = NodeOriginsCache::load(&path);
        assert_eq!(reloaded.lookup(NodeId(9)), Some(NodeOrigin { revision: 3, path: "/a/b.txt".to_string() }));
    }
}
