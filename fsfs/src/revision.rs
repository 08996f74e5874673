//! Revision file structure (`spec.md` §3.5, §6.2): the footer naming the
//! root node-revision and the start of the changed-paths block, and the
//! changed-paths block itself.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{CResult, Error};

/// The kind of change a path underwent in one revision (`spec.md` §3.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Delete,
    Replace,
    Modify,
}

/// One entry of a revision's changed-paths list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangedPathEntry {
    pub kind: ChangeKind,
    pub text_mod: bool,
    pub prop_mod: bool,
    pub copyfrom: Option<(u64, String)>,
}

/// The changed-paths block of a revision: every path touched, with what
/// happened to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangedPaths {
    pub entries: BTreeMap<String, ChangedPathEntry>,
}

impl ChangedPaths {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (path, entry) in &self.entries {
            let _ = write!(out, "{} {} {} {}", path, entry.kind, entry.text_mod as u8, entry.prop_mod as u8);
            if let Some((rev, from_path)) = &entry.copyfrom {
                let _ = write!(out, " {rev} {from_path}");
            }
            let _ = writeln!(out);
        }
        out
    }

    pub fn parse(bytes: &[u8]) -> CResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::corrupt_with_cause("changed-paths block is not valid UTF-8", e))?;
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(5, ' ');
            let bad = || Error::corrupt(format!("malformed changed-path line '{line}'"));
            let path = parts.next().ok_or_else(bad)?.to_string();
            let kind: ChangeKind = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
            let text_mod = parts.next().ok_or_else(bad)? == "1";
            let prop_mod = parts.next().ok_or_else(bad)? == "1";
            let copyfrom = parts.next().map(|rest| {
                let (rev, from_path) = rest.split_once(' ').ok_or_else(bad)?;
                Ok::<_, Error>((rev.parse::<u64>()?, from_path.to_string()))
            }).transpose()?;
            entries.insert(path, ChangedPathEntry { kind, text_mod, prop_mod, copyfrom });
        }
        Ok(ChangedPaths { entries })
    }
}

/// The trailer every revision file ends with: where the root
/// node-revision record starts, and where the changed-paths block
/// starts. The footer line's own length is written as a final line so a
/// reader can find it by seeking backward from end-of-file without
/// scanning forward through the whole file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevisionFooter {
    pub root_offset: u64,
    pub changed_paths_offset: u64,
}

impl RevisionFooter {
    pub fn write(&self, writer: &mut impl Write) -> CResult<()> {
        let line = format!("{} {}\n", self.root_offset, self.changed_paths_offset);
        writer.write_all(line.as_bytes())?;
        writeln!(writer, "{}", line.len())?;
        Ok(())
    }

    /// Reads the footer from the tail of a revision file already
    /// positioned anywhere; seeks internally based on `file_len`.
    pub fn read(reader: &mut (impl Read + Seek), file_len: u64) -> CResult<Self> {
        const MAX_TAIL: u64 = 256;
        let tail_len = file_len.min(MAX_TAIL);
        reader.seek(SeekFrom::Start(file_len - tail_len))?;
        let mut tail = vec![0u8; tail_len as usize];
        reader.read_exact(&mut tail)?;

        let tail_text = std::str::from_utf8(&tail)
            .map_err(|e| Error::corrupt_with_cause("revision footer tail is not valid UTF-8", e))?;
        let trimmed = tail_text.trim_end_matches('\n');
        let length_line_start = trimmed
            .rfind('\n')
            .map(|i| i + 1)
            .ok_or_else(|| Error::corrupt("revision file too short to contain a footer"))?;
        let footer_len: usize = trimmed[length_line_start..]
            .parse()
            .map_err(|_| Error::corrupt("malformed footer length line"))?;

        let length_line_pos = tail_len as usize - (tail_text.len() - length_line_start);
        if footer_len > length_line_pos {
            return Err(Error::corrupt("footer length exceeds available tail"));
        }
        let footer_line = &tail[length_line_pos - footer_len..length_line_pos];
        let footer_line = std::str::from_utf8(footer_line)
            .map_err(|e| Error::corrupt_with_cause("revision footer is not valid UTF-8", e))?;
        let (root_str, changed_str) = footer_line
            .trim_end()
            .split_once(' ')
            .ok_or_else(|| Error::corrupt("malformed revision footer"))?;
        Ok(RevisionFooter { root_offset: root_str.parse()?, changed_paths_offset: changed_str.parse()? })
    }
}
