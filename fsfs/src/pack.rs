//! Shard consolidation (`spec.md` §4.10): folding every individual
//! revision (and revprops) file of a full shard into one pack file plus a
//! small manifest, once a shard will never receive another revision.
//! Packing concatenates revision files byte-for-byte, so every offset
//! recorded inside a node-revision or representation (which is always
//! relative to the start of its own revision's bytes) keeps working
//! unchanged after packing — a reader just slices the pack file at the
//! manifest's recorded start/end instead of opening a standalone file.

use std::io::{BufRead, Write};

use crate::config::FsfsConfig;
use crate::error::{CResult, Error};
use crate::format::Layout;
use crate::paths::Paths;
use crate::revprops::{self, PackedChunk, RevProps};

fn shard_size_of(layout: Layout) -> CResult<u64> {
    match layout {
        Layout::Sharded(size) => Ok(size as u64),
        Layout::Linear => Err(Error::Internal("linear-layout repositories have nothing to pack".to_string())),
    }
}

/// One pack file's manifest: the byte offset, within the pack file, at
/// which each revision of the shard begins, in revision order.
struct RevManifest {
    offsets: Vec<u64>,
}

impl RevManifest {
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for offset in &self.offsets {
            let _ = writeln!(out, "{offset}");
        }
        out
    }

    fn parse(bytes: &[u8]) -> CResult<Self> {
        let mut offsets = Vec::new();
        for line in bytes.lines() {
            let line = line.map_err(Error::from)?;
            if line.is_empty() {
                continue;
            }
            offsets.push(line.parse()?);
        }
        Ok(RevManifest { offsets })
    }
}

/// Reads the already-packed revision `revision`, returning its bytes
/// (sliced out of the shard's pack file) and their length.
pub fn read_packed_revision(paths: &Paths, layout: Layout, revision: u64) -> CResult<(Vec<u8>, u64)> {
    let shard_size = shard_size_of(layout)?;
    let shard = revision / shard_size;
    let index = (revision % shard_size) as usize;

    let manifest = RevManifest::parse(&std::fs::read(paths.pack_manifest(shard))?)?;
    let start = *manifest
        .offsets
        .get(index)
        .ok_or(Error::NoSuchRevision(revision))?;
    let pack_bytes = std::fs::read(paths.pack_file(shard))?;
    let end = manifest.offsets.get(index + 1).copied().unwrap_or(pack_bytes.len() as u64);
    let slice = pack_bytes[start as usize..end as usize].to_vec();
    let len = slice.len() as u64;
    Ok((slice, len))
}

/// One packed-revprops shard's manifest: `(first_revision, count)` per
/// chunk, in chunk order.
struct RevpropManifest {
    chunks: Vec<(u64, u64)>,
}

impl RevpropManifest {
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (first, count) in &self.chunks {
            let _ = writeln!(out, "{first} {count}");
        }
        out
    }

    fn parse(bytes: &[u8]) -> CResult<Self> {
        let mut chunks = Vec::new();
        for line in bytes.lines() {
            let line = line.map_err(Error::from)?;
            if line.is_empty() {
                continue;
            }
            let (first, count) = line.split_once(' ').ok_or_else(|| Error::corrupt("malformed revprops manifest line"))?;
            chunks.push((first.parse()?, count.parse()?));
        }
        Ok(RevpropManifest { chunks })
    }
}

pub fn read_packed_revprops(paths: &Paths, layout: Layout, config: &FsfsConfig, revision: u64) -> CResult<RevProps> {
    let shard_size = shard_size_of(layout)?;
    let shard = revision / shard_size;

    let manifest = RevpropManifest::parse(&std::fs::read(paths.revprops_pack_manifest(shard))?)?;
    for (chunk_index, (first, count)) in manifest.chunks.iter().enumerate() {
        if revision >= *first && revision < first + count {
            let bytes = std::fs::read(paths.revprops_pack_file(shard, chunk_index as u64))?;
            let chunk = PackedChunk::read(&bytes, config.compress_packed_revprops)?;
            return Ok(chunk.props_for(revision).cloned().unwrap_or_default());
        }
    }
    Err(Error::NoSuchRevision(revision))
}

/// Packs every full, not-yet-packed shard up to (but not including) the
/// shard containing `youngest`, the way `svnadmin pack` walks shards in
/// order starting from `min-unpacked-rev`. Returns the new
/// `min-unpacked-rev`. A shard already packed (its `.pack` directory
/// already holds both `pack` and `manifest`) is skipped; a half-finished
/// `.pack` directory left by a prior crash is discarded and redone, since
/// the original per-revision files are only removed after the pack file
/// and manifest are both written.
pub fn pack_repository(
    paths: &Paths,
    layout: Layout,
    config: &FsfsConfig,
    min_unpacked_rev: u64,
    youngest: u64,
) -> CResult<u64> {
    let shard_size = shard_size_of(layout)?;
    let mut min_unpacked = min_unpacked_rev;

    loop {
        let shard = min_unpacked / shard_size;
        let shard_start = shard * shard_size;
        let shard_end = shard_start + shard_size; // exclusive
        if shard_end > youngest + 1 {
            break; // shard is not yet full
        }

        let pack_file = paths.pack_file(shard);
        let manifest_file = paths.pack_manifest(shard);
        if !(pack_file.exists() && manifest_file.exists()) {
            pack_one_rev_shard(paths, layout, shard, shard_start, shard_end)?;
        }

        let revprop_pack_file_zero = paths.revprops_pack_file(shard, 0);
        let revprop_manifest = paths.revprops_pack_manifest(shard);
        if !(revprop_pack_file_zero.exists() && revprop_manifest.exists()) {
            pack_one_revprop_shard(paths, layout, config, shard, shard_start, shard_end)?;
        }

        min_unpacked = shard_end;
        crate::paths::write_atomic(&paths.min_unpacked_rev(), format!("{min_unpacked}\n").as_bytes())?;
    }

    Ok(min_unpacked)
}

fn pack_one_rev_shard(paths: &Paths, layout: Layout, shard: u64, shard_start: u64, shard_end: u64) -> CResult<()> {
    let mut pack_bytes = Vec::new();
    let mut offsets = Vec::new();
    for rev in shard_start..shard_end {
        offsets.push(pack_bytes.len() as u64);
        let bytes = std::fs::read(paths.rev_path(rev, layout))?;
        pack_bytes.extend_from_slice(&bytes);
    }

    crate::paths::ensure_parent_dir(&paths.pack_file(shard))?;
    crate::paths::write_atomic(&paths.pack_file(shard), &pack_bytes)?;
    crate::paths::write_atomic(&paths.pack_manifest(shard), &RevManifest { offsets }.serialize())?;

    for rev in shard_start..shard_end {
        std::fs::remove_file(paths.rev_path(rev, layout))?;
    }
    let _ = std::fs::remove_dir(paths.rev_shard_dir(shard_start, layout));
    Ok(())
}

fn pack_one_revprop_shard(
    paths: &Paths,
    layout: Layout,
    config: &FsfsConfig,
    shard: u64,
    shard_start: u64,
    shard_end: u64,
) -> CResult<()> {
    let mut all_props = Vec::new();
    for rev in shard_start..shard_end {
        all_props.push(revprops::read_unpacked(&paths.revprop_path(rev, layout))?);
    }
    let target_bytes = (config.revprop_pack_size_kb as usize) * 1024;
    let chunks = revprops::chunk_shard(&all_props, shard_start, target_bytes);

    crate::paths::ensure_parent_dir(&paths.revprops_pack_file(shard, 0))?;
    let mut manifest = RevpropManifest { chunks: Vec::new() };
    for (index, chunk) in chunks.iter().enumerate() {
        let mut bytes = Vec::new();
        chunk.write(&mut bytes, config.compress_packed_revprops)?;
        crate::paths::write_atomic(&paths.revprops_pack_file(shard, index as u64), &bytes)?;
        manifest.chunks.push((chunk.first_revision, chunk.props_by_revision.len() as u64));
    }
    crate::paths::write_atomic(&paths.revprops_pack_manifest(shard), &manifest.serialize())?;

    for rev in shard_start..shard_end {
        std::fs::remove_file(paths.revprop_path(rev, layout))?;
    }
    let _ = std::fs::remove_dir(paths.revprop_shard_dir(shard_start, layout));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn props(pairs: &[(&str, &str)]) -> RevProps {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn packs_a_full_shard_and_reads_revisions_back() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let layout = Layout::Sharded(4);
        let config = FsfsConfig::default();

        for rev in 0..4u64 {
            let body = format!("revision {rev} body\n").into_bytes();
            crate::paths::ensure_parent_dir(&paths.rev_path(rev, layout)).unwrap();
            crate::paths::write_atomic(&paths.rev_path(rev, layout), &body).unwrap();
            revprops::write_unpacked(&paths.revprop_path(rev, layout), &props(&[("svn:log", &rev.to_string())]))
                .unwrap();
        }

        let new_min = pack_repository(&paths, layout, &config, 0, 3).unwrap();
        assert_eq!(new_min, 4);
        assert!(paths.pack_file(0).exists());
        assert!(!paths.rev_path(0, layout).exists());

        for rev in 0..4u64 {
            let (bytes, _) = read_packed_revision(&paths, layout, rev).unwrap();
            assert_eq!(bytes, format!("revision {rev} body\n").into_bytes());
            let props = read_packed_revprops(&paths, layout, &config, rev).unwrap();
            assert_eq!(props.get("svn:log"), Some(&rev.to_string()));
        }
    }

    #[test]
    fn does_not_pack_a_partially_filled_shard() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let layout = Layout::Sharded(4);
        let config = FsfsConfig::default();

        for rev in 0..2u64 {
            crate::paths::write_atomic(&paths.rev_path(rev, layout), b"x").unwrap();
            revprops::write_unpacked(&paths.revprop_path(rev, layout), &RevProps::new()).unwrap();
        }

        let new_min = pack_repository(&paths, layout, &config, 0, 1).unwrap();
        assert_eq!(new_min, 0);
        assert!(!paths.pack_file(0).exists());
    }
}
