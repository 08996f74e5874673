//! Node-revision records (`spec.md` §3.2, §4.5): kind, predecessor chain,
//! representation references, copy bookkeeping, and mergeinfo aggregate
//! counts. Serialized as `key: value` lines terminated by a blank line,
//! per `spec.md` §4.5 and the literal revision-0 seed of §6.3.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::{CResult, Error};
use crate::id::NodeRevisionId;
use crate::rep::Representation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    File,
    Dir,
}

/// One historical snapshot of one logical node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRevision {
    pub id: NodeRevisionId,
    pub kind: NodeKind,
    pub predecessor: Option<NodeRevisionId>,
    pub predecessor_count: u32,
    pub copyfrom: Option<(u64, String)>,
    pub copyroot: (u64, String),
    pub data_rep: Option<Representation>,
    pub props_rep: Option<Representation>,
    pub cpath: String,
    pub mergeinfo_count: u64,
    pub has_mergeinfo: bool,
}

impl NodeRevision {
    /// Checks the chain-length invariant of `spec.md` §4.5: `count = 1 +
    /// predecessor.count`, or 0 absent a predecessor.
    pub fn check_predecessor_count(&self, predecessor_count: Option<u32>) -> CResult<()> {
        let expected = predecessor_count.map(|c| c + 1).unwrap_or(0);
        if self.predecessor_count != expected {
            return Err(Error::corrupt(format!(
                "node-revision {} has predecessor_count {} but expected {}",
                self.id, self.predecessor_count, expected
            )));
        }
        Ok(())
    }

    pub fn serialize(&self, out: &mut impl Write) -> CResult<()> {
        writeln!(out, "id: {}", self.id)?;
        writeln!(out, "type: {}", self.kind)?;
        if let Some(pred) = &self.predecessor {
            writeln!(out, "pred: {pred}")?;
        }
        writeln!(out, "count: {}", self.predecessor_count)?;
        if let Some(rep) = &self.data_rep {
            writeln!(out, "text: {}", rep.format_tuple())?;
        }
        if let Some(rep) = &self.props_rep {
            writeln!(out, "props: {}", rep.format_tuple())?;
        }
        writeln!(out, "cpath: {}", self.cpath)?;
        if let Some((rev, path)) = &self.copyfrom {
            writeln!(out, "copyfrom: {rev} {path}")?;
        }
        writeln!(out, "copyroot: {} {}", self.copyroot.0, self.copyroot.1)?;
        if self.mergeinfo_count > 0 {
            writeln!(out, "minfo-cnt: {}", self.mergeinfo_count)?;
        }
        if self.has_mergeinfo {
            writeln!(out, "minfo-here: y")?;
        }
        writeln!(out)?;
        Ok(())
    }

    pub fn parse(text: &str) -> CResult<Self> {
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| Error::corrupt(format!("malformed node-revision line '{line}'")))?;
            fields.insert(key, value);
        }

        let id = NodeRevisionId::parse(
            fields.get("id").ok_or_else(|| Error::corrupt("node-revision missing 'id'"))?,
        )?;
        let kind: NodeKind = fields
            .get("type")
            .ok_or_else(|| Error::corrupt("node-revision missing 'type'"))?
            .parse()
            .map_err(|_| Error::corrupt("node-revision has invalid 'type'"))?;
        let predecessor = fields.get("pred").map(|s| NodeRevisionId::parse(s)).transpose()?;
        let predecessor_count: u32 = fields.get("count").unwrap_or(&"0").parse()?;
        let data_rep = fields.get("text").map(|s| Representation::parse_tuple(s)).transpose()?;
        let props_rep = fields.get("props").map(|s| Representation::parse_tuple(s)).transpose()?;
        let cpath = fields
            .get("cpath")
            .ok_or_else(|| Error::corrupt("node-revision missing 'cpath'"))?
            .to_string();
        let copyfrom = fields
            .get("copyfrom")
            .map(|s| {
                let (rev, path) = s
                    .split_once(' ')
                    .ok_or_else(|| Error::corrupt("malformed 'copyfrom' field"))?;
                Ok::<_, Error>((rev.parse()?, path.to_string()))
            })
            .transpose()?;
        let copyroot = match fields.get("copyroot") {
            Some(s) => {
                let (rev, path) = s
                    .split_once(' ')
                    .ok_or_else(|| Error::corrupt("malformed 'copyroot' field"))?;
                (rev.parse()?, path.to_string())
            }
            None => (0, "/".to_string()),
        };
        let mergeinfo_count: u64 = fields.get("minfo-cnt").unwrap_or(&"0").parse()?;
        let has_mergeinfo = fields.get("minfo-here").map(|s| *s == "y").unwrap_or(false);

        Ok(NodeRevision {
            id,
            kind,
            predecessor,
            predecessor_count,
            copyfrom,
            copyroot,
            data_rep,
            props_rep,
            cpath,
            mergeinfo_count,
            has_mergeinfo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CopyId, NodeId, TxnId};

    fn sample() -> NodeRevision {
        NodeRevision {
            id: NodeRevisionId::new(NodeId(0), CopyId(0), TxnId::Committed { revision: 0, offset: 17 }),
            kind: NodeKind::Dir,
            predecessor: None,
            predecessor_count: 0,
            copyfrom: None,
            copyroot: (0, "/".to_string()),
            data_rep: Some(Representation {
                revision: 0,
                item_offset: 0,
                size: 4,
                expanded_size: 4,
                md5_digest: [
                    0x2d, 0x29, 0x77, 0xd1, 0xc9, 0x6f, 0x48, 0x7a, 0xbe, 0x4a, 0x1e, 0x20, 0x2d,
                    0xd0, 0x3b, 0x4e,
                ],
                sha1_digest: None,
                uniquifier: None,
            }),
            props_rep: None,
            cpath: "/".to_string(),
            mergeinfo_count: 0,
            has_mergeinfo: false,
        }
    }

    #[test]
    fn round_trips_through_text_format() {
        let nr = sample();
        let mut buf = Vec::new();
        nr.serialize(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let parsed = NodeRevision::parse(&text).unwrap();
        assert_eq!(parsed, nr);
    }

    #[test]
    fn matches_revision_zero_seed_shape() {
        let nr = sample();
        let mut buf = Vec::new();
        nr.serialize(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("id: 0.0.r0/17\n"));
        assert!(text.contains("type: dir\n"));
        assert!(text.contains("count: 0\n"));
        assert!(text.contains("cpath: /\n"));
    }

    #[test]
    fn predecessor_count_invariant() {
        let mut nr = sample();
        nr.predecessor_count = 3;
        assert!(nr.check_predecessor_count(Some(2)).is_ok());
        assert!(nr.check_predecessor_count(Some(1)).is_err());
        assert!(nr.check_predecessor_count(None).is_err());
    }
}
