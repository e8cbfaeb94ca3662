//! Byte patterns with optional wildcard masks.

use std::fmt;

use memchr::memmem;
use serde::{Deserialize, Deserializer};

use crate::byte_io::parse_hex_byte;
use crate::error::{Error, Result};

/// A byte sequence to search for.
///
/// `mask[i] == false` makes position `i` a wildcard. A pattern without a mask
/// (or with an all-`true` mask) is an exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSpec {
    bytes: Vec<u8>,
    mask: Option<Vec<bool>>,
}

impl PatternSpec {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            mask: None,
        }
    }

    pub fn with_mask(bytes: impl Into<Vec<u8>>, mask: Vec<bool>) -> Result<Self> {
        let bytes = bytes.into();
        if mask.len() != bytes.len() {
            return Err(Error::InvalidPattern(format!(
                "mask length {} does not match pattern length {}",
                mask.len(),
                bytes.len()
            )));
        }
        let mask = if mask.iter().all(|&m| m) {
            None
        } else {
            Some(mask)
        };
        Ok(Self { bytes, mask })
    }

    /// Parse `"48 8B ?? 05 ?"` style notation; `?` and `??` are wildcards.
    pub fn from_hex(pattern: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();

        for token in pattern.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(0);
                mask.push(false);
                continue;
            }

            let token = token.trim_start_matches("0x").trim_start_matches("0X");
            bytes.push(parse_hex_byte(token)?);
            mask.push(true);
        }

        Self::with_mask(bytes, mask)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    pub fn is_exact(&self) -> bool {
        self.mask.is_none()
    }

    /// Test `window` (at least `len()` bytes) against the pattern.
    pub fn matches(&self, window: &[u8]) -> bool {
        if self.is_empty() || window.len() < self.len() {
            return false;
        }
        match &self.mask {
            None => &window[..self.len()] == self.bytes.as_slice(),
            Some(mask) => self
                .bytes
                .iter()
                .zip(mask)
                .zip(window)
                .all(|((&p, &m), &b)| !m || p == b),
        }
    }

    /// First match position in `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        if self.is_empty() || haystack.len() < self.len() {
            return None;
        }
        match &self.mask {
            None => memmem::find(haystack, &self.bytes),
            Some(_) => haystack
                .windows(self.len())
                .position(|window| self.matches(window)),
        }
    }

    /// Every (possibly overlapping) match position in `haystack`.
    pub fn find_all_in(&self, haystack: &[u8]) -> Vec<usize> {
        if self.is_empty() || haystack.len() < self.len() {
            return Vec::new();
        }
        match &self.mask {
            None => {
                let finder = memmem::Finder::new(&self.bytes);
                let mut positions = Vec::new();
                let mut start = 0;
                while let Some(pos) = finder.find(&haystack[start..]) {
                    positions.push(start + pos);
                    start += pos + 1;
                }
                positions
            }
            Some(_) => haystack
                .windows(self.len())
                .enumerate()
                .filter(|(_, window)| self.matches(window))
                .map(|(pos, _)| pos)
                .collect(),
        }
    }
}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<String> = self
            .bytes
            .iter()
            .enumerate()
            .map(|(i, b)| match &self.mask {
                Some(mask) if !mask[i] => "??".to_string(),
                _ => format!("{:02X}", b),
            })
            .collect();
        write!(f, "{}", tokens.join(" "))
    }
}

impl<'de> Deserialize<'de> for PatternSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        PatternSpec::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
