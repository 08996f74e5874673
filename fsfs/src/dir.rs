//! Directory listings (`spec.md` §3.4, §4.6): an ordered map from entry
//! name to `(kind, node-revision-id)`, serialized as the fulltext of a
//! directory node's `text` representation.
//!
//! Two distinct orderings matter here. A listing is always serialized in
//! lexicographic name order when it is itself the delta *target* (so
//! lookups by name can binary-search it once decoded); the delta *base*
//! chosen when deltifying directories is picked by `(revision DESC,
//! item_offset ASC)` over a node's representation history, per §4.6 — that
//! ordering is implemented by callers walking the predecessor chain, not
//! by this module.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::{CResult, Error};
use crate::id::NodeRevisionId;
use crate::noderev::NodeKind;

/// One child of a directory: the `entry_name -> (kind, id)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
    pub id: NodeRevisionId,
}

/// An ordered directory listing. Always stored sorted by name, so two
/// listings with the same entries serialize identically regardless of
/// insertion order — a precondition for rep-sharing to find duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirListing {
    entries: BTreeMap<String, DirEntry>,
}

impl DirListing {
    pub fn new() -> Self {
        DirListing::default()
    }

    pub fn insert(&mut self, entry: DirEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<DirEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&DirEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the listing in lexicographic name order. An empty
    /// directory serializes as exactly `END\n`, matching the four-byte
    /// fulltext of the root directory seeded at revision 0 (`spec.md`
    /// §6.3).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in self.entries.values() {
            write_entry(&mut out, entry);
        }
        out.extend_from_slice(b"END\n");
        out
    }

    pub fn parse(bytes: &[u8]) -> CResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::corrupt_with_cause("directory fulltext is not valid UTF-8", e))?;
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            if line == "END" {
                return Ok(DirListing { entries });
            }
            let entry = parse_entry(line)?;
            entries.insert(entry.name.clone(), entry);
        }
        Err(Error::corrupt("directory fulltext missing END terminator"))
    }
}

fn write_entry(out: &mut Vec<u8>, entry: &DirEntry) {
    let _ = writeln!(out, "{} {} {} {}", entry.name.len(), entry.name, entry.kind, entry.id);
}

fn parse_entry(line: &str) -> CResult<DirEntry> {
    let bad = || Error::corrupt(format!("malformed directory entry line '{line}'"));
    let (len_str, rest) = line.split_once(' ').ok_or_else(bad)?;
    let name_len: usize = len_str.parse()?;
    if rest.len() < name_len || rest.as_bytes().get(name_len) != Some(&b' ') {
        return Err(bad());
    }
    let name = rest[..name_len].to_string();
    let rest = &rest[name_len + 1..];
    let (kind_str, id_str) = rest.split_once(' ').ok_or_else(bad)?;
    let kind: NodeKind = kind_str.parse().map_err(|_| Error::corrupt(format!("unrecognized node kind '{kind_str}'")))?;
    let id = NodeRevisionId::parse(id_str)?;
    Ok(DirEntry { name, kind, id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CopyId, NodeId, TxnId};

    fn sample_id(n: u64) -> NodeRevisionId {
        NodeRevisionId::new(NodeId(n), CopyId(0), TxnId::Committed { revision: 1, offset: n * 10 })
    }

    #[test]
    fn empty_directory_serializes_to_end_sentinel() {
        let listing = DirListing::new();
        assert_eq!(listing.serialize(), b"END\n");
    }

    #[test]
    fn round_trips_through_text_format() {
        let mut listing = DirListing::new();
        listing.insert(DirEntry { name: "b.txt".to_string(), kind: NodeKind::File, id: sample_id(2) });
        listing.insert(DirEntry { name: "a".to_string(), kind: NodeKind::Dir, id: sample_id(1) });

        let bytes = listing.serialize();
        let parsed = DirListing::parse(&bytes).unwrap();
        assert_eq!(parsed, listing);
    }

    #[test]
    fn serializes_in_lexicographic_name_order() {
        let mut listing = DirListing::new();
        listing.insert(DirEntry { name: "zeta".to_string(), kind: NodeKind::File, id: sample_id(1) });
        listing.insert(DirEntry { name: "alpha".to_string(), kind: NodeKind::File, id: sample_id(2) });
        let bytes = listing.serialize();
        let text = String::from_utf8(bytes).unwrap();
        let alpha_pos = text.find("alpha").unwrap();
        let zeta_pos = text.find("zeta").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn rejects_truncated_listing() {
        assert!(DirListing::parse(b"5 alpha file 1.0.r1/0\n").is_err());
    }
}
