//! Revision properties (`spec.md` §4.10, §6.4): one small string-to-string
//! map per revision, stored either as its own file or, once packed, as a
//! chunk shared by an entire shard.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{CResult, Error};

pub type RevProps = BTreeMap<String, String>;

pub(crate) fn encode(props: &RevProps) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = out.write_u32::<BigEndian>(props.len() as u32);
    for (key, value) in props {
        let _ = out.write_u32::<BigEndian>(key.len() as u32);
        out.extend_from_slice(key.as_bytes());
        let _ = out.write_u32::<BigEndian>(value.len() as u32);
        out.extend_from_slice(value.as_bytes());
    }
    out
}

pub(crate) fn decode(bytes: &[u8]) -> CResult<RevProps> {
    let mut cursor = std::io::Cursor::new(bytes);
    let count = cursor.read_u32::<BigEndian>()?;
    let mut props = RevProps::new();
    for _ in 0..count {
        let key_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut key = vec![0u8; key_len];
        cursor.read_exact(&mut key)?;
        let value_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut value = vec![0u8; value_len];
        cursor.read_exact(&mut value)?;
        props.insert(
            String::from_utf8(key).map_err(Error::from)?,
            String::from_utf8(value).map_err(Error::from)?,
        );
    }
    Ok(props)
}

/// Reads an unpacked revprops file.
pub fn read_unpacked(path: &std::path::Path) -> CResult<RevProps> {
    match std::fs::read(path) {
        Ok(bytes) => decode(&bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RevProps::new()),
        Err(e) => Err(e.into()),
    }
}

/// Writes an unpacked revprops file atomically.
pub fn write_unpacked(path: &std::path::Path, props: &RevProps) -> CResult<()> {
    crate::paths::write_atomic(path, &encode(props))
}

/// One chunk of a packed-revprops shard: the revprops of every revision
/// in `first_revision..first_revision + count`, concatenated and
/// optionally zlib-compressed as a unit (`spec.md` §6.4).
pub struct PackedChunk {
    pub first_revision: u64,
    pub props_by_revision: Vec<RevProps>,
}

impl PackedChunk {
    pub fn write(&self, writer: &mut impl Write, compress: bool) -> CResult<()> {
        let mut raw = Vec::new();
        raw.write_u32::<BigEndian>(self.first_revision as u32)?;
        raw.write_u32::<BigEndian>(self.props_by_revision.len() as u32)?;
        for props in &self.props_by_revision {
            let encoded = encode(props);
            raw.write_u32::<BigEndian>(encoded.len() as u32)?;
            raw.extend_from_slice(&encoded);
        }

        if compress {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw)?;
            writer.write_all(&encoder.finish()?)?;
        } else {
            writer.write_all(&raw)?;
        }
        Ok(())
    }

    pub fn read(bytes: &[u8], compressed: bool) -> CResult<Self> {
        let raw = if compressed {
            let mut buf = Vec::new();
            ZlibDecoder::new(bytes).read_to_end(&mut buf)?;
            buf
        } else {
            bytes.to_vec()
        };
        let mut cursor = std::io::Cursor::new(raw);
        let first_revision = cursor.read_u32::<BigEndian>()? as u64;
        let count = cursor.read_u32::<BigEndian>()?;
        let mut props_by_revision = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = cursor.read_u32::<BigEndian>()? as usize;
            let mut encoded = vec![0u8; len];
            cursor.read_exact(&mut encoded)?;
            props_by_revision.push(decode(&encoded)?);
        }
        Ok(PackedChunk { first_revision, props_by_revision })
    }

    pub fn props_for(&self, revision: u64) -> Option<&RevProps> {
        if revision < self.first_revision {
            return None;
        }
        let index = (revision - self.first_revision) as usize;
        self.props_by_revision.get(index)
    }
}

/// Splits a shard's revisions into packed-revprops chunks whose
/// serialized size stays close to `target_chunk_bytes` (`spec.md` §6.4's
/// `revprop-pack-size` knob), never letting a chunk grow empty.
pub fn chunk_shard(all_props: &[RevProps], first_revision: u64, target_chunk_bytes: usize) -> Vec<PackedChunk> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0usize;
    let mut current_first = first_revision;

    for (i, props) in all_props.iter().enumerate() {
        let size = encode(props).len();
        if !current.is_empty() && current_bytes + size > target_chunk_bytes {
            chunks.push(PackedChunk { first_revision: current_first, props_by_revision: std::mem::take(&mut current) });
            current_first = first_revision + i as u64;
            current_bytes = 0;
        }
        current.push(props.clone());
        current_bytes += size;
    }
    if !current.is_empty() {
        chunks.push(PackedChunk { first_revision: current_first, props_by_revision: current });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn props(pairs: &[(&str, &str)]) -> RevProps {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn round_trips_unpacked_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0");
        let props = props(&[("svn:author", "alice"), ("svn:log", "first commit")]);
        write_unpacked(&path, &props).unwrap();
        assert_eq!(read_unpacked(&path).unwrap(), props);
    }

    #[test]
    fn missing_unpacked_file_yields_empty_map() {
        let dir = tempdir().unwrap();
        assert!(read_unpacked(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn round_trips_packed_chunk_uncompressed() {
        let chunk = PackedChunk {
            first_revision: 10,
            props_by_revision: vec![props(&[("svn:author", "bob")]), props(&[])],
        };
        let mut bytes = Vec::new();
        chunk.write(&mut bytes, false).unwrap();
        let parsed = PackedChunk::read(&bytes, false).unwrap();
        assert_eq!(parsed.props_for(10), Some(&props(&[("svn:author", "bob")])));
        assert_eq!(parsed.props_for(11), Some(&props(&[])));
        assert_eq!(parsed.props_for(9), None);
    }

    #[test]
    fn round_trips_packed_chunk_compressed() {
        let chunk = PackedChunk { first_revision: 0, props_by_revision: vec![props(&[("k", "v")])] };
        let mut bytes = Vec::new();
        chunk.write(&mut bytes, true).unwrap();
        let parsed = PackedChunk::read(&bytes, true).unwrap();
        assert_eq!(parsed.props_for(0), Some(&props(&[("k", "v")])));
    }

    #[test]
    fn chunking_respects_target_size() {
        let all: Vec<RevProps> = (0..50).map(|i| props(&[("svn:log", &"x".repeat(100 + i))])).collect();
        let chunks = chunk_shard(&all, 0, 512);
        assert!(chunks.len() > 1);
        let total: usize = chunks.iter().map(|c| c.props_by_revision.len()).sum();
        assert_eq!(total, 50);
    }
}
