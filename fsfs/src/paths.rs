//! Pure functions computing on-disk paths within a repository (`spec.md`
//! §4.1, §6.1). Nothing here touches locks or caches; callers that need
//! pack-awareness combine these with `min-unpacked-rev` themselves.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::CResult;
use crate::format::Layout;

/// Computes on-disk paths rooted at a repository directory.
#[derive(Clone, Debug)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Paths { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // --- repository-level files ---

    pub fn repo_format(&self) -> PathBuf {
        self.root.join("format")
    }

    pub fn uuid(&self) -> PathBuf {
        self.root.join("uuid")
    }

    pub fn current(&self) -> PathBuf {
        self.root.join("current")
    }

    pub fn write_lock(&self) -> PathBuf {
        self.root.join("write-lock")
    }

    // --- db/ (filesystem layer) files ---

    pub fn db_root(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn db_format(&self) -> PathBuf {
        self.db_root().join("format")
    }

    pub fn txn_current(&self) -> PathBuf {
        self.db_root().join("txn-current")
    }

    pub fn txn_current_lock(&self) -> PathBuf {
        self.db_root().join("txn-current-lock")
    }

    pub fn min_unpacked_rev(&self) -> PathBuf {
        self.db_root().join("min-unpacked-rev")
    }

    pub fn fsfs_conf(&self) -> PathBuf {
        self.db_root().join("fsfs.conf")
    }

    pub fn rep_cache(&self) -> PathBuf {
        self.db_root().join("rep-cache.db")
    }

    pub fn node_origins_cache(&self) -> PathBuf {
        self.db_root().join("node-origins.db")
    }

    /// The repository-wide next-node-id/next-copy-id counters. Kept apart
    /// from `current` (`spec.md` §6.1), which for a modern-format repository
    /// holds only the decimal youngest revision number.
    pub fn next_ids(&self) -> PathBuf {
        self.db_root().join("next-ids")
    }

    // --- revisions ---

    pub fn revs_root(&self) -> PathBuf {
        self.db_root().join("revs")
    }

    fn shard_of(rev: u64, layout: Layout) -> Option<u64> {
        match layout {
            Layout::Linear => None,
            Layout::Sharded(size) => Some(rev / size as u64),
        }
    }

    /// Path to revision `rev`'s own file, assuming it is not packed.
    pub fn rev_path(&self, rev: u64, layout: Layout) -> PathBuf {
        match Self::shard_of(rev, layout) {
            Some(shard) => self.revs_root().join(shard.to_string()).join(rev.to_string()),
            None => self.revs_root().join(rev.to_string()),
        }
    }

    pub fn rev_shard_dir(&self, rev: u64, layout: Layout) -> PathBuf {
        match Self::shard_of(rev, layout) {
            Some(shard) => self.revs_root().join(shard.to_string()),
            None => self.revs_root(),
        }
    }

    pub fn pack_dir(&self, shard: u64) -> PathBuf {
        self.revs_root().join(format!("{shard}.pack"))
    }

    pub fn pack_file(&self, shard: u64) -> PathBuf {
        self.pack_dir(shard).join("pack")
    }

    pub fn pack_manifest(&self, shard: u64) -> PathBuf {
        self.pack_dir(shard).join("manifest")
    }

    // --- revision properties ---

    pub fn revprops_root(&self) -> PathBuf {
        self.db_root().join("revprops")
    }

    pub fn revprop_path(&self, rev: u64, layout: Layout) -> PathBuf {
        match Self::shard_of(rev, layout) {
            Some(shard) => self.revprops_root().join(shard.to_string()).join(rev.to_string()),
            None => self.revprops_root().join(rev.to_string()),
        }
    }

    pub fn revprop_shard_dir(&self, rev: u64, layout: Layout) -> PathBuf {
        match Self::shard_of(rev, layout) {
            Some(shard) => self.revprops_root().join(shard.to_string()),
            None => self.revprops_root(),
        }
    }

    pub fn revprops_pack_dir(&self, shard: u64) -> PathBuf {
        self.revprops_root().join(format!("{shard}.pack"))
    }

    pub fn revprops_pack_manifest(&self, shard: u64) -> PathBuf {
        self.revprops_pack_dir(shard).join("manifest")
    }

    pub fn revprops_pack_file(&self, shard: u64, chunk: u64) -> PathBuf {
        self.revprops_pack_dir(shard).join(chunk.to_string())
    }

    // --- transactions ---

    pub fn transactions_root(&self) -> PathBuf {
        self.db_root().join("transactions")
    }

    pub fn txn_dir(&self, txn_id: &str) -> PathBuf {
        self.transactions_root().join(format!("{txn_id}.txn"))
    }

    pub fn txn_changes(&self, txn_id: &str) -> PathBuf {
        self.txn_dir(txn_id).join("changes")
    }

    pub fn txn_props(&self, txn_id: &str) -> PathBuf {
        self.txn_dir(txn_id).join("props")
    }

    pub fn txn_next_ids(&self, txn_id: &str) -> PathBuf {
        self.txn_dir(txn_id).join("next-ids")
    }

    pub fn txn_protorevs_root(&self) -> PathBuf {
        self.db_root().join("txn-protorevs")
    }

    pub fn txn_protorev(&self, txn_id: &str) -> PathBuf {
        self.txn_protorevs_root().join(format!("{txn_id}.rev"))
    }
}

/// Atomically writes `contents` to `path`: write a temp file in the same
/// directory, `fsync` it, then rename over the destination and `fsync` the
/// directory. Used for every mutable on-disk pointer (`current`,
/// `min-unpacked-rev`, revprops, `format`) per the commit procedure of
/// `spec.md` §4.9.
pub fn write_atomic(path: &Path, contents: &[u8]) -> CResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("atomic"),
        std::process::id()
    ));
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(contents)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    if let Ok(dir_handle) = File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}

/// Ensures the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> CResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
