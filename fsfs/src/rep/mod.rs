//! Content representations (`spec.md` §3.3, §4.4): the `PLAIN`/`DELTA`
//! on-disk encoding of a fulltext, recursive delta-chain resolution, the
//! skip-delta base-selection policy, the representation cache, and the
//! rep-sharing dedup side-store.

pub mod cache;
pub mod delta;
pub mod sharing;

use std::io::{BufRead, Read, Seek, Write};

use md5::{Digest as _, Md5};
use sha1::Sha1;

use crate::config::FsfsConfig;
use crate::error::{CResult, Error};

/// A pointer to, and checksums of, one stored fulltext (`spec.md` §3.3).
///
/// `PartialEq` intentionally compares only `revision`, `item_offset`, and
/// `uniquifier` — not `size`/`expanded_size`/digests — matching the
/// representation-identity comparison `spec.md` §9 calls out: two
/// references to the same physical record must compare equal even if one
/// side's bookkeeping fields haven't been filled in yet.
#[derive(Clone, Debug)]
pub struct Representation {
    pub revision: u64,
    pub item_offset: u64,
    pub size: u64,
    pub expanded_size: u64,
    pub md5_digest: [u8; 16],
    pub sha1_digest: Option<[u8; 20]>,
    pub uniquifier: Option<String>,
}

impl PartialEq for Representation {
    fn eq(&self, other: &Self) -> bool {
        self.revision == other.revision
            && self.item_offset == other.item_offset
            && self.uniquifier == other.uniquifier
    }
}

impl Representation {
    pub fn format_tuple(&self) -> String {
        let mut s = format!(
            "{} {} {} {} {}",
            self.revision,
            self.item_offset,
            self.size,
            self.expanded_size,
            hex::encode(self.md5_digest)
        );
        if let Some(sha1) = &self.sha1_digest {
            s.push(' ');
            s.push_str(&hex::encode(sha1));
            if let Some(uniq) = &self.uniquifier {
                s.push(' ');
                s.push_str(uniq);
            }
        }
        s
    }

    pub fn parse_tuple(s: &str) -> CResult<Self> {
        let mut parts = s.split_whitespace();
        let bad = || Error::corrupt(format!("malformed representation tuple '{s}'"));
        let revision: u64 = parts.next().ok_or_else(bad)?.parse()?;
        let item_offset: u64 = parts.next().ok_or_else(bad)?.parse()?;
        let size: u64 = parts.next().ok_or_else(bad)?.parse()?;
        let expanded_size: u64 = parts.next().ok_or_else(bad)?.parse()?;
        let md5_hex = parts.next().ok_or_else(bad)?;
        let md5_digest: [u8; 16] = hex::decode(md5_hex)
            .map_err(|e| Error::corrupt_with_cause("invalid md5 hex in representation tuple", e))?
            .try_into()
            .map_err(|_| Error::corrupt("md5 digest is not 16 bytes"))?;
        let sha1_digest = parts
            .next()
            .map(|hexed| -> CResult<[u8; 20]> {
                hex::decode(hexed)
                    .map_err(|e| Error::corrupt_with_cause("invalid sha1 hex in representation tuple", e))?
                    .try_into()
                    .map_err(|_| Error::corrupt("sha1 digest is not 20 bytes"))
            })
            .transpose()?;
        let uniquifier = parts.next().map(|s| s.to_string());
        Ok(Representation { revision, item_offset, size, expanded_size, md5_digest, sha1_digest, uniquifier })
    }
}

/// Provides random-access byte streams over already-committed revisions so
/// that delta chains can be resolved without this module knowing anything
/// about packing or sharding.
pub trait RevisionSource {
    fn open_revision(&self, revision: u64) -> CResult<Box<dyn ReadSeek + '_>>;
}

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

fn read_line_at(reader: &mut dyn BufRead) -> CResult<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.is_empty() {
        return Err(Error::corrupt("representation record truncated"));
    }
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

/// Reads the fulltext named by `rep`, resolving its delta chain
/// recursively (`spec.md` §4.4.1).
pub fn read_fulltext(source: &dyn RevisionSource, rep: &Representation) -> CResult<Vec<u8>> {
    let mut file = source.open_revision(rep.revision)?;
    file.seek(std::io::SeekFrom::Start(rep.item_offset))?;
    let mut reader = std::io::BufReader::new(file.as_mut());
    let header = read_line_at(&mut reader)?;

    let fulltext = if header == "PLAIN" {
        let mut buf = vec![0u8; rep.expanded_size as usize];
        reader.read_exact(&mut buf)?;
        buf
    } else if let Some(rest) = header.strip_prefix("DELTA ") {
        let mut parts = rest.split_whitespace();
        let bad = || Error::corrupt(format!("malformed DELTA header '{header}'"));
        let base_rev: u64 = parts.next().ok_or_else(bad)?.parse()?;
        let base_offset: u64 = parts.next().ok_or_else(bad)?.parse()?;
        let base_size: u64 = parts.next().ok_or_else(bad)?.parse()?;
        let base_expanded: u64 = parts.next().ok_or_else(bad)?.parse()?;

        let base_rep = Representation {
            revision: base_rev,
            item_offset: base_offset,
            size: base_size,
            expanded_size: base_expanded,
            md5_digest: [0u8; 16],
            sha1_digest: None,
            uniquifier: None,
        };
        let base_fulltext = read_fulltext(source, &base_rep)?;

        let mut payload = vec![0u8; rep.size as usize];
        reader.read_exact(&mut payload)?;
        let windows = delta::decode_windows(&payload)?;
        let target = delta::apply(&base_fulltext, &windows)?;
        if target.len() as u64 != rep.expanded_size {
            return Err(Error::corrupt(format!(
                "delta reconstruction produced {} bytes, expected {}",
                target.len(),
                rep.expanded_size
            )));
        }
        target
    } else {
        return Err(Error::corrupt(format!("unrecognized representation header '{header}'")));
    };

    let trailer = read_line_at(&mut reader)?;
    if trailer != "ENDREP" {
        return Err(Error::corrupt(format!("representation missing ENDREP trailer, found '{trailer}'")));
    }

    Ok(fulltext)
}

/// Writes one representation record (header, payload, `ENDREP\n` trailer)
/// at the current position of `writer`, which must already sit at
/// `item_offset` within `revision`'s file. Returns its metadata.
pub fn write_fulltext(
    writer: &mut impl Write,
    revision: u64,
    item_offset: u64,
    base: Option<(&Representation, &[u8])>,
    fulltext: &[u8],
) -> CResult<Representation> {
    let md5_digest: [u8; 16] = Md5::digest(fulltext).into();
    let sha1_digest: [u8; 20] = Sha1::digest(fulltext).into();

    let (size, payload): (u64, Vec<u8>) = match base {
        None => (fulltext.len() as u64, fulltext.to_vec()),
        Some((base_rep, base_fulltext)) => {
            let windows = delta::diff(base_fulltext, fulltext);
            let encoded = delta::encode_windows(&windows)?;
            (encoded.len() as u64, encoded)
        }
    };

    match base {
        None => {
            writeln!(writer, "PLAIN")?;
        }
        Some((base_rep, _)) => {
            writeln!(
                writer,
                "DELTA {} {} {} {}",
                base_rep.revision, base_rep.item_offset, base_rep.size, base_rep.expanded_size
            )?;
        }
    }
    writer.write_all(&payload)?;
    writeln!(writer, "ENDREP")?;

    Ok(Representation {
        revision,
        item_offset,
        size,
        expanded_size: fulltext.len() as u64,
        md5_digest,
        sha1_digest: Some(sha1_digest),
        uniquifier: None,
    })
}

/// The outcome of the skip-delta-with-linear-prelude base-selection policy
/// (`spec.md` §4.4.2): either re-baseline with a `PLAIN` copy of the
/// fulltext, or delta against the predecessor `skip` revisions back in the
/// node's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaBasePlan {
    Plain,
    DeltaAgainst { skip: u32 },
}

/// Chooses how the representation for a node at predecessor-chain depth
/// `predecessor_count` should be stored. For the first
/// `max_linear_deltification` revisions of a node's life, delta against
/// the immediate predecessor. Beyond that, skip to the nearest
/// power-of-two ancestor so that the worst-case reconstruction walk grows
/// logarithmically; if even that would exceed `max_deltification_walk`,
/// re-baseline instead.
pub fn plan_delta_base(predecessor_count: u32, config: &FsfsConfig) -> DeltaBasePlan {
    if predecessor_count == 0 {
        return DeltaBasePlan::Plain;
    }
    if predecessor_count <= config.max_linear_deltification {
        return DeltaBasePlan::DeltaAgainst { skip: 1 };
    }
    let skip = largest_power_of_two_leq(predecessor_count);
    let worst_case_walk = 32 - predecessor_count.leading_zeros() + 1;
    if worst_case_walk > config.max_deltification_walk {
        DeltaBasePlan::Plain
    } else {
        DeltaBasePlan::DeltaAgainst { skip }
    }
}

fn largest_power_of_two_leq(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    1u32 << (31 - n.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct OneRevisionSource {
        bytes: Vec<u8>,
    }

    impl RevisionSource for OneRevisionSource {
        fn open_revision(&self, _revision: u64) -> CResult<Box<dyn ReadSeek + '_>> {
            Ok(Box::new(Cursor::new(self.bytes.clone())))
        }
    }

    #[test]
    fn round_trips_plain_representation() {
        let fulltext = b"END\n".to_vec();
        let mut bytes = Vec::new();
        let rep = write_fulltext(&mut bytes, 0, 0, None, &fulltext).unwrap();
        assert_eq!(bytes, b"PLAIN\nEND\nENDREP\n");
        assert_eq!(rep.size, 4);
        assert_eq!(rep.expanded_size, 4);

        let source = OneRevisionSource { bytes };
        let read_back = read_fulltext(&source, &rep).unwrap();
        assert_eq!(read_back, fulltext);
    }

    #[test]
    fn round_trips_delta_representation() {
        let base_fulltext = b"hello world, this is the base revision of the file".to_vec();
        let mut base_bytes = Vec::new();
        let base_rep = write_fulltext(&mut base_bytes, 5, 0, None, &base_fulltext).unwrap();

        let target_fulltext = b"hello world, this is the SECOND revision of the file, extended".to_vec();
        let mut combined = base_bytes.clone();
        let target_offset = combined.len() as u64;
        let target_rep =
            write_fulltext(&mut combined, 5, target_offset, Some((&base_rep, &base_fulltext)), &target_fulltext)
                .unwrap();

        let source = OneRevisionSource { bytes: combined };
        let read_back = read_fulltext(&source, &target_rep).unwrap();
        assert_eq!(read_back, target_fulltext);
    }

    #[test]
    fn parses_and_formats_tuple_with_all_fields() {
        let rep = Representation {
            revision: 12,
            item_offset: 345,
            size: 10,
            expanded_size: 20,
            md5_digest: [0xab; 16],
            sha1_digest: Some([0xcd; 20]),
            uniquifier: Some("abc123".to_string()),
        };
        let tuple = rep.format_tuple();
        let parsed = Representation::parse_tuple(&tuple).unwrap();
        assert_eq!(parsed, rep);
        assert_eq!(parsed.sha1_digest, rep.sha1_digest);
        assert_eq!(parsed.uniquifier, rep.uniquifier);
    }

    #[test]
    fn parses_legacy_tuple_without_sha1_or_uniquifier() {
        let parsed = Representation::parse_tuple("0 0 4 4 2d2977d1c96f487abe4a1e202dd03b4e").unwrap();
        assert_eq!(parsed.revision, 0);
        assert_eq!(parsed.size, 4);
        assert!(parsed.sha1_digest.is_none());
    }

    #[test]
    fn equality_ignores_size_and_digests() {
        let a = Representation {
            revision: 1,
            item_offset: 2,
            size: 10,
            expanded_size: 10,
            md5_digest: [1; 16],
            sha1_digest: None,
            uniquifier: None,
        };
        let mut b = a.clone();
        b.size = 999;
        b.md5_digest = [2; 16];
        assert_eq!(a, b);
        let mut c = a.clone();
        c.item_offset = 3;
        assert_ne!(a, c);
    }

    #[test]
    fn delta_base_plan_follows_linear_then_skip_policy() {
        let config = FsfsConfig::default();
        assert_eq!(plan_delta_base(0, &config), DeltaBasePlan::Plain);
        assert_eq!(plan_delta_base(1, &config), DeltaBasePlan::DeltaAgainst { skip: 1 });
        assert_eq!(plan_delta_base(config.max_linear_deltification, &config), DeltaBasePlan::DeltaAgainst { skip: 1 });
        match plan_delta_base(config.max_linear_deltification + 1, &config) {
            DeltaBasePlan::DeltaAgainst { skip } => assert!(skip >= 2),
            DeltaBasePlan::Plain => panic!("expected a skip-delta choice"),
        }
    }
}
