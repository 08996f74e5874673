//! On-disk format numbers and feature gating (`spec.md` §4.1).

use crate::error::{CResult, Error};
use std::path::Path;

/// Format supported by an older implementation, carried only as a floor so
/// historical repositories remain readable; this crate never creates a
/// repository below [`CURRENT_FORMAT`].
pub const MIN_READABLE_FORMAT: u32 = 1;

/// The format this implementation writes when creating a repository.
pub const CURRENT_FORMAT: u32 = 6;

/// Format numbers this implementation refuses to open even though they are
/// numerically below [`CURRENT_FORMAT`] (e.g. a format known to have been
/// produced by a buggy pre-release).
const BLACKLISTED_FORMATS: &[u32] = &[];

/// A feature gated on a minimum format number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feature {
    ShardedLayout,
    RepSharing,
    DeltifiedDirectories,
    DeltifiedProperties,
    PackedRevprops,
}

impl Feature {
    pub fn minimum_format(self) -> u32 {
        match self {
            Feature::ShardedLayout => 3,
            Feature::DeltifiedDirectories => 4,
            Feature::DeltifiedProperties => 4,
            Feature::RepSharing => 5,
            Feature::PackedRevprops => 6,
        }
    }
}

/// How revisions are laid out on disk, parsed from the second line of the
/// `format` file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    Linear,
    Sharded(u32),
}

impl Layout {
    pub const DEFAULT_SHARD_SIZE: u32 = 1000;

    fn parse(line: &str) -> CResult<Self> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("layout") => match parts.next() {
                Some("linear") => Ok(Layout::Linear),
                Some("sharded") => {
                    let size: u32 = parts
                        .next()
                        .ok_or_else(|| Error::corrupt("sharded layout line missing shard size"))?
                        .parse()?;
                    Ok(Layout::Sharded(size))
                }
                other => Err(Error::corrupt(format!("unrecognized layout '{other:?}'"))),
            },
            other => Err(Error::corrupt(format!("unrecognized format line '{other:?}'"))),
        }
    }

    fn serialize(self) -> String {
        match self {
            Layout::Linear => "layout linear\n".to_string(),
            Layout::Sharded(size) => format!("layout sharded {size}\n"),
        }
    }
}

/// The parsed contents of a repository's `format` file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub format: u32,
    pub layout: Layout,
}

impl FormatInfo {
    pub fn current() -> Self {
        FormatInfo { format: CURRENT_FORMAT, layout: Layout::Sharded(Layout::DEFAULT_SHARD_SIZE) }
    }

    /// Reads a `format` file. A missing file is interpreted as format 1,
    /// linear layout, per `spec.md` §7's local-recovery list.
    pub fn read(path: &Path) -> CResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("format file {} missing, assuming format 1", path.display());
                return Ok(FormatInfo { format: 1, layout: Layout::Linear });
            }
            Err(e) => return Err(e.into()),
        };
        let mut lines = contents.lines();
        let format: u32 = lines
            .next()
            .ok_or_else(|| Error::corrupt("empty format file"))?
            .trim()
            .parse()?;
        let layout = match lines.next() {
            Some(line) if !line.trim().is_empty() => Layout::parse(line.trim())?,
            _ => {
                if format >= Feature::ShardedLayout.minimum_format() {
                    Layout::Sharded(Layout::DEFAULT_SHARD_SIZE)
                } else {
                    Layout::Linear
                }
            }
        };
        let info = FormatInfo { format, layout };
        info.check_supported()?;
        Ok(info)
    }

    pub fn write(&self, path: &Path) -> CResult<()> {
        let mut contents = format!("{}\n", self.format);
        contents.push_str(&self.layout.serialize());
        crate::paths::write_atomic(path, contents.as_bytes())
    }

    pub fn check_supported(&self) -> CResult<()> {
        if BLACKLISTED_FORMATS.contains(&self.format) {
            return Err(Error::UnsupportedFormat {
                found: self.format,
                message: "this format number is blacklisted".to_string(),
            });
        }
        if self.format > CURRENT_FORMAT {
            return Err(Error::UnsupportedFormat {
                found: self.format,
                message: format!("repository format is newer than the supported maximum {CURRENT_FORMAT}"),
            });
        }
        if self.format < MIN_READABLE_FORMAT {
            return Err(Error::UnsupportedFormat {
                found: self.format,
                message: format!("repository format predates the supported minimum {MIN_READABLE_FORMAT}"),
            });
        }
        Ok(())
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.format >= feature.minimum_format()
    }

    pub fn shard_size(&self) -> Option<u32> {
        match self.layout {
            Layout::Linear => None,
            Layout::Sharded(size) => Some(size),
        }
    }
}
