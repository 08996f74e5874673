//! The transaction layer (`spec.md` §4.8): a mutable staging area for the
//! tree that will become the next revision. Edits accumulate in memory
//! (and are mirrored to `transactions/<id>.txn/changes` for crash
//! visibility) until [`crate::fs::Filesystem::commit`] freezes them into
//! an immutable revision.

use std::collections::BTreeMap;

use crate::error::{CResult, Error};
use crate::noderev::NodeKind;
use crate::revision::ChangeKind;

/// One path's pending edit within a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingChange {
    AddFile { content: Vec<u8>, props: BTreeMap<String, String>, copyfrom: Option<(u64, String)> },
    AddDir { props: BTreeMap<String, String>, copyfrom: Option<(u64, String)> },
    ModifyFile { content: Option<Vec<u8>>, props: Option<BTreeMap<String, String>> },
    ModifyDirProps { props: BTreeMap<String, String> },
    Delete,
}

impl PendingChange {
    pub fn change_kind(&self) -> ChangeKind {
        match self {
            PendingChange::AddFile { .. } | PendingChange::AddDir { .. } => ChangeKind::Add,
            PendingChange::ModifyFile { .. } | PendingChange::ModifyDirProps { .. } => ChangeKind::Modify,
            PendingChange::Delete => ChangeKind::Delete,
        }
    }

    pub fn node_kind(&self) -> Option<NodeKind> {
        match self {
            PendingChange::AddFile { .. } | PendingChange::ModifyFile { .. } => Some(NodeKind::File),
            PendingChange::AddDir { .. } | PendingChange::ModifyDirProps { .. } => Some(NodeKind::Dir),
            PendingChange::Delete => None,
        }
    }
}

/// An in-progress edit against a fixed base revision.
pub struct Transaction {
    pub id: String,
    pub base_revision: u64,
    pub changes: BTreeMap<String, PendingChange>,
    pub revprops: BTreeMap<String, String>,
}

impl Transaction {
    pub fn new(id: String, base_revision: u64) -> Self {
        Transaction { id, base_revision, changes: BTreeMap::new(), revprops: BTreeMap::new() }
    }

    fn parent_of(path: &str) -> Option<&str> {
        if path == "/" {
            return None;
        }
        let trimmed = path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) => Some("/"),
            Some(i) => Some(&trimmed[..i]),
            None => None,
        }
    }

    /// Requires the immediate parent of `path` to already be staged as a
    /// directory in this transaction (mirroring the real editor protocol,
    /// where `add_directory` must open before `add_file` inside it),
    /// unless the parent already exists unmodified in the base revision —
    /// that check happens in [`crate::fs::Filesystem`], which knows how
    /// to read the base tree; here we only reject a parent this same
    /// transaction has explicitly deleted.
    fn check_parent_not_deleted(&self, path: &str) -> CResult<()> {
        if let Some(parent) = Self::parent_of(path) {
            if matches!(self.changes.get(parent), Some(PendingChange::Delete)) {
                return Err(Error::Conflict {
                    path: path.to_string(),
                    message: format!("parent '{parent}' is deleted in this transaction"),
                });
            }
        }
        Ok(())
    }

    pub fn add_file(
        &mut self,
        path: &str,
        content: Vec<u8>,
        props: BTreeMap<String, String>,
        copyfrom: Option<(u64, String)>,
    ) -> CResult<()> {
        if self.changes.contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.check_parent_not_deleted(path)?;
        self.changes.insert(path.to_string(), PendingChange::AddFile { content, props, copyfrom });
        Ok(())
    }

    pub fn add_dir(
        &mut self,
        path: &str,
        props: BTreeMap<String, String>,
        copyfrom: Option<(u64, String)>,
    ) -> CResult<()> {
        if self.changes.contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.check_parent_not_deleted(path)?;
        self.changes.insert(path.to_string(), PendingChange::AddDir { props, copyfrom });
        Ok(())
    }

    pub fn modify_file(&mut self, path: &str, content: Option<Vec<u8>>, props: Option<BTreeMap<String, String>>) {
        self.changes.insert(path.to_string(), PendingChange::ModifyFile { content, props });
    }

    pub fn modify_dir_props(&mut self, path: &str, props: BTreeMap<String, String>) {
        self.changes.insert(path.to_string(), PendingChange::ModifyDirProps { props });
    }

    pub fn delete(&mut self, path: &str) {
        self.changes.insert(path.to_string(), PendingChange::Delete);
    }

    pub fn change_revprop(&mut self, name: &str, value: Option<String>) {
        match value {
            Some(v) => {
                self.revprops.insert(name.to_string(), v);
            }
            None => {
                self.revprops.remove(name);
            }
        }
    }
}
