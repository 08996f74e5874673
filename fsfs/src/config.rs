//! Typed, defaulted view of `db/fsfs.conf` (`spec.md` §6.4).
//!
//! A missing file, section, or key is an ambient recovery (not a feature
//! toggle): we fall back to the documented default rather than failing the
//! whole repository open.

use ini::Ini;
use std::path::Path;

use crate::error::CResult;

#[derive(Clone, Debug, PartialEq)]
pub struct FsfsConfig {
    pub enable_rep_sharing: bool,
    pub enable_dir_deltification: bool,
    pub enable_props_deltification: bool,
    pub max_deltification_walk: u32,
    pub max_linear_deltification: u32,
    pub revprop_pack_size_kb: u32,
    pub compress_packed_revprops: bool,
    pub fail_stop: bool,
}

impl Default for FsfsConfig {
    fn default() -> Self {
        FsfsConfig {
            enable_rep_sharing: true,
            enable_dir_deltification: false,
            enable_props_deltification: false,
            max_deltification_walk: 1023,
            max_linear_deltification: 16,
            revprop_pack_size_kb: 64,
            compress_packed_revprops: false,
            fail_stop: false,
        }
    }
}

impl FsfsConfig {
    /// Loads `fsfs.conf`, defaulting section-by-section and key-by-key
    /// when absent. A missing file yields all-default configuration.
    pub fn load(path: &Path) -> CResult<Self> {
        let mut cfg = FsfsConfig::default();
        let ini = match Ini::load_from_file(path) {
            Ok(ini) => ini,
            Err(_) => {
                log::debug!("no fsfs.conf at {}, using defaults", path.display());
                return Ok(cfg);
            }
        };

        if let Some(section) = ini.section(Some("rep-sharing")) {
            if let Some(v) = section.get("enable-rep-sharing") {
                cfg.enable_rep_sharing = parse_bool(v, cfg.enable_rep_sharing);
            }
        }
        if let Some(section) = ini.section(Some("deltification")) {
            if let Some(v) = section.get("enable-dir-deltification") {
                cfg.enable_dir_deltification = parse_bool(v, cfg.enable_dir_deltification);
            }
            if let Some(v) = section.get("enable-props-deltification") {
                cfg.enable_props_deltification = parse_bool(v, cfg.enable_props_deltification);
            }
            if let Some(v) = section.get("max-deltification-walk") {
                cfg.max_deltification_walk = v.parse().unwrap_or(cfg.max_deltification_walk);
            }
            if let Some(v) = section.get("max-linear-deltification") {
                cfg.max_linear_deltification = v.parse().unwrap_or(cfg.max_linear_deltification);
            }
        }
        if let Some(section) = ini.section(Some("packed-revprops")) {
            if let Some(v) = section.get("revprop-pack-size") {
                cfg.revprop_pack_size_kb = v.parse().unwrap_or(cfg.revprop_pack_size_kb);
            }
            if let Some(v) = section.get("compress-packed-revprops") {
                cfg.compress_packed_revprops = parse_bool(v, cfg.compress_packed_revprops);
                if cfg.compress_packed_revprops && cfg.revprop_pack_size_kb == 64 {
                    cfg.revprop_pack_size_kb = 256;
                }
            }
        }
        if let Some(section) = ini.section(Some("caches")) {
            if let Some(v) = section.get("fail-stop") {
                cfg.fail_stop = parse_bool(v, cfg.fail_stop);
            }
        }

        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> CResult<()> {
        let mut ini = Ini::new();
        ini.with_section(Some("rep-sharing"))
            .set("enable-rep-sharing", self.enable_rep_sharing.to_string());
        ini.with_section(Some("deltification"))
            .set("enable-dir-deltification", self.enable_dir_deltification.to_string())
            .set("enable-props-deltification", self.enable_props_deltification.to_string())
            .set("max-deltification-walk", self.max_deltification_walk.to_string())
            .set("max-linear-deltification", self.max_linear_deltification.to_string());
        ini.with_section(Some("packed-revprops"))
            .set("revprop-pack-size", self.revprop_pack_size_kb.to_string())
            .set("compress-packed-revprops", self.compress_packed_revprops.to_string());
        ini.with_section(Some("caches")).set("fail-stop", self.fail_stop.to_string());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        ini.write_to_file(path).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(())
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => true,
        "false" | "no" | "off" | "0" => false,
        _ => default,
    }
}
