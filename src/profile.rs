//! Per-platform signature profiles for the executable patch.
//!
//! A profile is data: which prologue to look for, where to start looking and
//! what to write over it. Built-in profiles can be replaced by a JSON file:
//!
//! ```json
//! [{
//!   "platform": "windows",
//!   "name": "online-check",
//!   "outer": "55 53 48 83 EC 38 48 8D 6C 24 40 33 C0 48 89 45",
//!   "inner": "55 53 48 83 EC 38 48 8D 6C 24 40 33 C0 48 89 45",
//!   "replacement": "B8 01 00 00 00 C3",
//!   "start_offset": 8388608
//! }]
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::byte_io::hex_to_bytes;
use crate::error::{Error, Result};
use crate::opcodes;
use crate::pattern::PatternSpec;
use crate::search::{SearchConfig, DEFAULT_CONTEXT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
}

impl Platform {
    /// Platform this binary was built for; anything that is not Windows is
    /// treated as Linux.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::Linux => write!(f, "linux"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PatchProfile {
    pub platform: Platform,
    pub name: String,
    /// Anchor signature; its context window bounds the inner search.
    pub outer: PatternSpec,
    /// The bytes that get overwritten.
    pub inner: PatternSpec,
    #[serde(deserialize_with = "hex_bytes")]
    pub replacement: Vec<u8>,
    #[serde(default)]
    pub start_offset: u64,
    #[serde(default)]
    pub max_search_size: Option<u64>,
    #[serde(default = "default_context")]
    pub context: usize,
}

fn default_context() -> usize {
    DEFAULT_CONTEXT
}

fn hex_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    hex_to_bytes(&text).map_err(serde::de::Error::custom)
}

impl PatchProfile {
    pub fn search_config(&self) -> SearchConfig {
        let config = SearchConfig::default()
            .with_start_offset(self.start_offset)
            .with_context(self.context, self.context)
            .with_find_all(true);
        match self.max_search_size {
            Some(max) => config.with_max_search_size(max),
            None => config,
        }
    }

    /// Replacement zero-padded to the width of the inner signature.
    pub fn padded_replacement(&self) -> Result<Vec<u8>> {
        opcodes::zero_padded(&self.replacement, self.inner.len()).ok_or_else(|| {
            Error::InvalidPattern(format!(
                "profile '{}': replacement of {} bytes does not fit over {} byte signature",
                self.name,
                self.replacement.len(),
                self.inner.len()
            ))
        })
    }
}

const WINDOWS_PROLOGUE: &str = "55 53 48 83 EC 38 48 8D 6C 24 40 33 C0 48 89 45";
const LINUX_ANCHOR: &str =
    "55 48 89 E5 41 57 41 56 41 55 41 54 53 48 83 EC ?? 48 89 7D ?? 48 89 75";
const LINUX_PROLOGUE: &str = "55 48 89 E5 41 57 41 56 41 55 41 54 53 48 83 EC";

pub fn builtin_profiles() -> Result<Vec<PatchProfile>> {
    let ret_true = opcodes::return_value(1).to_vec();

    Ok(vec![
        PatchProfile {
            platform: Platform::Windows,
            name: "online-check".to_string(),
            outer: PatternSpec::from_hex(WINDOWS_PROLOGUE)?,
            inner: PatternSpec::from_hex(WINDOWS_PROLOGUE)?,
            replacement: ret_true.clone(),
            start_offset: 0x80_0000,
            max_search_size: None,
            context: DEFAULT_CONTEXT,
        },
        PatchProfile {
            platform: Platform::Linux,
            name: "online-check".to_string(),
            outer: PatternSpec::from_hex(LINUX_ANCHOR)?,
            inner: PatternSpec::from_hex(LINUX_PROLOGUE)?,
            replacement: ret_true,
            start_offset: 0x20_0000,
            max_search_size: None,
            context: DEFAULT_CONTEXT,
        },
    ])
}

pub fn load_profiles(path: &Path) -> Result<Vec<PatchProfile>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let profiles: Vec<PatchProfile> = serde_json::from_str(&content)?;
    Ok(profiles)
}

pub fn profile_for(profiles: &[PatchProfile], platform: Platform) -> Option<&PatchProfile> {
    profiles.iter().find(|p| p.platform == platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_cover_each_platform() {
        let profiles = builtin_profiles().unwrap();
        for platform in [Platform::Windows, Platform::Linux] {
            let profile = profile_for(&profiles, platform).unwrap();
            let padded = profile.padded_replacement().unwrap();
            assert_eq!(padded.len(), profile.inner.len());
            assert_eq!(&padded[..6], &[0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3]);
        }
    }

    #[test]
    fn test_search_config_from_profile() {
        let profiles = builtin_profiles().unwrap();
        let windows = profile_for(&profiles, Platform::Windows).unwrap();
        let config = windows.search_config();
        assert_eq!(config.start_offset, 0x80_0000);
        assert_eq!(config.max_search_size, None);
        assert!(config.find_all);
    }

    #[test]
    fn test_load_profiles_from_json() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[{
                "platform": "linux",
                "name": "test",
                "outer": "AA ?? CC",
                "inner": "AA",
                "replacement": "C3",
                "max_search_size": 4096
            }]"#,
        )
        .unwrap();

        let profiles = load_profiles(file.path()).unwrap();
        assert_eq!(profiles.len(), 1);
        let profile = &profiles[0];
        assert_eq!(profile.platform, Platform::Linux);
        assert_eq!(profile.outer.to_string(), "AA ?? CC");
        assert_eq!(profile.replacement, vec![0xC3]);
        assert_eq!(profile.start_offset, 0);
        assert_eq!(profile.context, DEFAULT_CONTEXT);
        assert_eq!(profile.search_config().max_search_size, Some(4096));
    }

    #[test]
    fn test_load_profiles_rejects_bad_hex() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[{"platform": "windows", "name": "x", "outer": "GG", "inner": "AA", "replacement": "C3"}]"#,
        )
        .unwrap();
        assert!(matches!(load_profiles(file.path()), Err(Error::Json(_))));
    }
}
