//! Fixed-width domain substitution across on-disk string encodings.
//!
//! Three framings are handled:
//! - length-prefixed: `[n][c0][00][c1][00]..[c(n-1)]`, no pad after the last char
//! - UTF-8 / ASCII
//! - UTF-16LE, matched through its prefix so the same routine also covers the
//!   length-prefixed framing embedded inside a longer string
//!
//! A replacement never grows the data: a shorter encoding is followed by
//! zero bytes up to the original width, and an encoding that would be longer
//! makes its pass a no-op.

use memchr::memmem;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::progress::ProgressListener;

pub const DEFAULT_ORIGINAL_DOMAIN: &str = "hytale.com";

pub const DEFAULT_URL_PREFIXES: &[&str] = &[
    "https://sessions.",
    "https://account-data.",
    "https://telemetry.",
    "https://tools.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    LengthPrefixed,
    Utf8,
    Utf16Le,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::LengthPrefixed => "length-prefixed",
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16LE",
        }
    }
}

/// Patched buffer plus how many occurrences of the old string were rewritten.
/// Nothing is written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPatchResult {
    pub patched_bytes: Vec<u8>,
    pub occurrence_count: usize,
}

/// `[len][c][00][c][00]...[c]`
pub fn encode_length_prefixed(text: &str) -> Vec<u8> {
    let chars = text.as_bytes();
    let mut out = Vec::with_capacity(chars.len() * 2);
    out.push(chars.len() as u8);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if i + 1 < chars.len() {
            out.push(0);
        }
    }
    out
}

/// Inverse of [`encode_length_prefixed`]; trailing bytes are ignored.
pub fn decode_length_prefixed(bytes: &[u8]) -> Option<String> {
    let (&len, rest) = bytes.split_first()?;
    let len = len as usize;
    if len == 0 {
        return Some(String::new());
    }
    if rest.len() < len * 2 - 1 {
        return None;
    }
    let text: Vec<u8> = rest[..len * 2 - 1].iter().step_by(2).copied().collect();
    String::from_utf8(text).ok()
}

pub fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Overwrite every non-overlapping `old` in `data` with `new` plus zero
/// padding. Returns the number of rewritten occurrences.
fn replace_exact(data: &mut [u8], old: &[u8], new: &[u8]) -> usize {
    debug_assert!(new.len() <= old.len());
    if old.is_empty() {
        return 0;
    }

    let positions: Vec<usize> = memmem::find_iter(data, old).collect();
    for &pos in &positions {
        let region = &mut data[pos..pos + old.len()];
        region[..new.len()].copy_from_slice(new);
        region[new.len()..].fill(0);
    }
    positions.len()
}

fn ensure_fits(encoding: Encoding, old: &str, new: &str, old_len: usize, new_len: usize) -> Result<()> {
    if new_len > old_len {
        return Err(Error::ReplacementTooLong {
            encoding: encoding.name(),
            original: old.to_string(),
            replacement: new.to_string(),
        });
    }
    Ok(())
}

/// Length-prefixed substitution of `old` by `new`, in place.
pub fn replace_length_prefixed(data: &mut [u8], old: &str, new: &str) -> Result<usize> {
    let old_enc = encode_length_prefixed(old);
    let new_enc = encode_length_prefixed(new);
    ensure_fits(Encoding::LengthPrefixed, old, new, old_enc.len(), new_enc.len())?;
    Ok(replace_exact(data, &old_enc, &new_enc))
}

/// Raw UTF-8 substitution of `old` by `new`, in place.
pub fn replace_utf8(data: &mut [u8], old: &str, new: &str) -> Result<usize> {
    ensure_fits(Encoding::Utf8, old, new, old.len(), new.len())?;
    Ok(replace_exact(data, old.as_bytes(), new.as_bytes()))
}

/// UTF-16LE substitution that matches `old` minus its last character, then
/// checks the single byte after the prefix against the last character.
///
/// That byte is followed by `00` for UTF-16LE text and by the next framed
/// character (or anything else) for length-prefixed text; both are rewritten
/// the same way. The distinction is only logged.
pub fn replace_utf16_smart(data: &mut [u8], old: &str, new: &str) -> Result<usize> {
    let (old_prefix, old_last) = split_last_char(old)?;
    let (new_prefix, new_last) = split_last_char(new)?;

    let old_prefix = encode_utf16le(old_prefix);
    let new_prefix = encode_utf16le(new_prefix);
    let old_width = old_prefix.len() + 1;
    let new_width = new_prefix.len() + 1;
    ensure_fits(Encoding::Utf16Le, old, new, old_width, new_width)?;

    let candidates: Vec<usize> = memmem::find_iter(data, &old_prefix).collect();
    let mut count = 0;
    let mut next_free = 0;

    for pos in candidates {
        let last_at = pos + old_prefix.len();
        if pos < next_free || data.get(last_at) != Some(&old_last) {
            continue;
        }

        let framing = match data.get(last_at + 1) {
            Some(0) | None => "UTF-16LE, null-terminated",
            Some(_) => "length-prefixed",
        };
        debug!("Domain occurrence at {:#x} ({})", pos, framing);

        let region = &mut data[pos..pos + old_width];
        region[..new_prefix.len()].copy_from_slice(&new_prefix);
        region[new_prefix.len()] = new_last;
        region[new_width..].fill(0);

        next_free = pos + old_width;
        count += 1;
    }

    Ok(count)
}

fn split_last_char(text: &str) -> Result<(&str, u8)> {
    match text.as_bytes().split_last() {
        Some((&last, _)) if last.is_ascii() => Ok((&text[..text.len() - 1], last)),
        _ => Err(Error::InvalidDomain(format!(
            "'{}' must be non-empty and end in an ASCII character",
            text
        ))),
    }
}

/// Domain sweep configuration: which domain to replace, with what, and which
/// full-URL prefixes get a dedicated length-prefixed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPatcher {
    original: String,
    replacement: String,
    url_prefixes: Vec<String>,
}

impl DomainPatcher {
    pub fn new(original: impl Into<String>, replacement: impl Into<String>) -> Result<Self> {
        let original = original.into();
        let replacement = replacement.into();
        for domain in [&original, &replacement] {
            validate_domain(domain)?;
        }
        Ok(Self {
            original,
            replacement,
            url_prefixes: DEFAULT_URL_PREFIXES.iter().map(|p| p.to_string()).collect(),
        })
    }

    /// Replace [`DEFAULT_ORIGINAL_DOMAIN`] with `replacement`.
    pub fn with_replacement(replacement: impl Into<String>) -> Result<Self> {
        Self::new(DEFAULT_ORIGINAL_DOMAIN, replacement)
    }

    pub fn with_url_prefixes<I, S>(mut self, prefixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        for prefix in &prefixes {
            validate_domain(&format!("{}{}", prefix, self.original))?;
            validate_domain(&format!("{}{}", prefix, self.replacement))?;
        }
        self.url_prefixes = prefixes;
        Ok(self)
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Full-URL pass: each known prefix + domain as a length-prefixed string.
    pub fn patch_urls(&self, data: &[u8], listener: &mut dyn ProgressListener) -> DomainPatchResult {
        let mut patched = data.to_vec();
        let count = self.patch_urls_in_place(&mut patched, listener);
        DomainPatchResult {
            patched_bytes: patched,
            occurrence_count: count,
        }
    }

    /// Bare-domain pass in the length-prefixed framing.
    pub fn patch_length_prefixed(&self, data: &[u8], listener: &mut dyn ProgressListener) -> DomainPatchResult {
        let mut patched = data.to_vec();
        let count = self.run_pass(
            Encoding::LengthPrefixed,
            &mut patched,
            listener,
            replace_length_prefixed,
        );
        DomainPatchResult {
            patched_bytes: patched,
            occurrence_count: count,
        }
    }

    pub fn patch_utf8(&self, data: &[u8], listener: &mut dyn ProgressListener) -> DomainPatchResult {
        let mut patched = data.to_vec();
        let count = self.patch_utf8_in_place(&mut patched, listener);
        DomainPatchResult {
            patched_bytes: patched,
            occurrence_count: count,
        }
    }

    pub fn patch_utf16_smart(&self, data: &[u8], listener: &mut dyn ProgressListener) -> DomainPatchResult {
        let mut patched = data.to_vec();
        let count = self.run_pass(Encoding::Utf16Le, &mut patched, listener, replace_utf16_smart);
        DomainPatchResult {
            patched_bytes: patched,
            occurrence_count: count,
        }
    }

    /// URL pass, bare length-prefixed pass, then the UTF-16LE pass.
    pub fn apply_domain_patches(&self, data: &[u8], listener: &mut dyn ProgressListener) -> DomainPatchResult {
        let mut patched = data.to_vec();

        let urls = self.patch_urls_in_place(&mut patched, listener);
        let bare = self.run_pass(
            Encoding::LengthPrefixed,
            &mut patched,
            listener,
            replace_length_prefixed,
        );
        let wide = self.run_pass(Encoding::Utf16Le, &mut patched, listener, replace_utf16_smart);

        let total = urls + bare + wide;
        listener.on_progress(&format!(
            "Domain sweep: {} occurrence(s) of {} replaced ({} URL, {} length-prefixed, {} UTF-16LE)",
            total, self.original, urls, bare, wide
        ));

        DomainPatchResult {
            patched_bytes: patched,
            occurrence_count: total,
        }
    }

    pub(crate) fn patch_utf8_in_place(&self, data: &mut [u8], listener: &mut dyn ProgressListener) -> usize {
        self.run_pass(Encoding::Utf8, data, listener, replace_utf8)
    }

    fn patch_urls_in_place(&self, data: &mut [u8], listener: &mut dyn ProgressListener) -> usize {
        let mut total = 0;
        for prefix in &self.url_prefixes {
            let old = format!("{}{}", prefix, self.original);
            let new = format!("{}{}", prefix, self.replacement);
            match replace_length_prefixed(data, &old, &new) {
                Ok(0) => {}
                Ok(count) => {
                    listener.on_progress(&format!("Replaced {} x {} -> {}", count, old, new));
                    total += count;
                }
                Err(e) => {
                    warn!("Skipping URL pass for {}: {}", prefix, e);
                    listener.on_progress(&format!("Skipped {}: {}", old, e));
                }
            }
        }
        total
    }

    fn run_pass(
        &self,
        encoding: Encoding,
        data: &mut [u8],
        listener: &mut dyn ProgressListener,
        pass: fn(&mut [u8], &str, &str) -> Result<usize>,
    ) -> usize {
        match pass(data, &self.original, &self.replacement) {
            Ok(count) => {
                listener.on_progress(&format!(
                    "{} pass: {} occurrence(s) replaced",
                    encoding.name(),
                    count
                ));
                count
            }
            Err(e) => {
                warn!("Skipping {} pass: {}", encoding.name(), e);
                listener.on_progress(&format!("{} pass skipped: {}", encoding.name(), e));
                0
            }
        }
    }
}

fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || !domain.is_ascii() || domain.len() > u8::MAX as usize {
        return Err(Error::InvalidDomain(format!(
            "'{}' must be 1-255 ASCII characters",
            domain
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Silent;

    #[test]
    fn test_length_prefixed_framing() {
        assert_eq!(encode_length_prefixed("abc"), vec![3, b'a', 0, b'b', 0, b'c']);
        assert_eq!(
            decode_length_prefixed(&[3, b'a', 0, b'b', 0, b'c', 0xFF]),
            Some("abc".to_string())
        );
        assert_eq!(decode_length_prefixed(&[3, b'a', 0]), None);
    }

    #[test]
    fn test_bare_domain_pass_skips_already_patched() {
        let mut data = vec![0xEE; 8];
        data.extend(encode_length_prefixed("hytale.com"));
        data.extend([0xEE; 8]);
        let second_at = data.len();
        data.extend(encode_length_prefixed("sanasol.ws"));
        data.extend([0xEE; 4]);

        let patcher = DomainPatcher::with_replacement("sanasol.ws").unwrap();
        let result = patcher.patch_length_prefixed(&data, &mut Silent);

        assert_eq!(result.occurrence_count, 1);
        assert_eq!(result.patched_bytes.len(), data.len());
        assert_eq!(
            decode_length_prefixed(&result.patched_bytes[8..]),
            Some("sanasol.ws".to_string())
        );
        assert_eq!(&result.patched_bytes[second_at..], &data[second_at..]);
    }

    #[test]
    fn test_shorter_replacement_zero_pads() {
        let mut data = encode_length_prefixed("hytale.com");
        data.push(0xEE);
        let count = replace_length_prefixed(&mut data, "hytale.com", "ab.cd").unwrap();
        assert_eq!(count, 1);

        let mut expected = encode_length_prefixed("ab.cd");
        expected.resize(encode_length_prefixed("hytale.com").len(), 0);
        expected.push(0xEE);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_longer_replacement_is_rejected_and_pass_skipped() {
        let mut data = b"xx hytale.com xx".to_vec();
        let err = replace_utf8(&mut data, "hytale.com", "example.invalid").unwrap_err();
        assert!(matches!(err, Error::ReplacementTooLong { encoding: "UTF-8", .. }));
        assert_eq!(data, b"xx hytale.com xx");

        let patcher = DomainPatcher::with_replacement("much-longer.example").unwrap();
        let mut messages = Vec::new();
        let result = patcher.patch_utf8(&data, &mut |m: &str| messages.push(m.to_string()));
        assert_eq!(result.occurrence_count, 0);
        assert_eq!(result.patched_bytes, data);
        assert!(messages.iter().any(|m| m.contains("skipped")));
    }

    #[test]
    fn test_utf8_pass() {
        let data = b"url=https://hytale.com/a;host=hytale.com\0".to_vec();
        let patcher = DomainPatcher::with_replacement("sanasol.ws").unwrap();
        let result = patcher.patch_utf8(&data, &mut Silent);
        assert_eq!(result.occurrence_count, 2);
        assert_eq!(
            result.patched_bytes,
            b"url=https://sanasol.ws/a;host=sanasol.ws\0".to_vec()
        );
    }

    #[test]
    fn test_utf16_smart_handles_both_framings() {
        let mut data = vec![0x11; 4];
        data.extend(encode_utf16le("hytale.com"));
        data.extend([0, 0]);
        let lp_at = data.len();
        data.extend(encode_length_prefixed("api.hytale.com"));
        data.push(0x7F);

        let count = replace_utf16_smart(&mut data, "hytale.com", "sanasol.ws").unwrap();
        assert_eq!(count, 2);
        assert_eq!(&data[4..24], encode_utf16le("sanasol.ws").as_slice());
        assert_eq!(
            decode_length_prefixed(&data[lp_at..]),
            Some("api.sanasol.ws".to_string())
        );
        assert_eq!(*data.last().unwrap(), 0x7F);
    }

    #[test]
    fn test_utf8_shorter_replacement_zero_pads() {
        let mut data = b"x hytale.com y".to_vec();
        let count = replace_utf8(&mut data, "hytale.com", "ab.cd").unwrap();
        assert_eq!(count, 1);
        assert_eq!(data, b"x ab.cd\0\0\0\0\0 y");
    }

    #[test]
    fn test_utf16_smart_shorter_replacement_zero_pads() {
        let mut data = vec![0x11; 2];
        data.extend(encode_utf16le("hytale.com"));
        data.extend([0, 0, 0x22]);

        let count = replace_utf16_smart(&mut data, "hytale.com", "ab.cd").unwrap();
        assert_eq!(count, 1);

        let mut expected = vec![0x11; 2];
        expected.extend(b"a\0b\0.\0c\0d");
        expected.resize(2 + 22, 0);
        expected.push(0x22);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_utf16_smart_requires_last_char() {
        let mut data = encode_utf16le("hytale.co");
        data.extend(encode_utf16le("x"));
        let before = data.clone();
        assert_eq!(replace_utf16_smart(&mut data, "hytale.com", "sanasol.ws").unwrap(), 0);
        assert_eq!(data, before);
    }

    #[test]
    fn test_url_pass_uses_prefixes() {
        let mut data = encode_length_prefixed("https://sessions.hytale.com");
        data.extend(encode_length_prefixed("https://unknown.hytale.com"));

        let patcher = DomainPatcher::with_replacement("sanasol.ws").unwrap();
        let result = patcher.patch_urls(&data, &mut Silent);
        assert_eq!(result.occurrence_count, 1);
        assert_eq!(
            decode_length_prefixed(&result.patched_bytes),
            Some("https://sessions.sanasol.ws".to_string())
        );
    }

    #[test]
    fn test_composite_sweep_is_idempotent() {
        let mut data = vec![0u8; 16];
        data.extend(encode_length_prefixed("https://telemetry.hytale.com"));
        data.extend([0xAB; 3]);
        data.extend(encode_length_prefixed("hytale.com"));
        data.extend([0xAB; 3]);
        data.extend(encode_utf16le("hytale.com"));
        data.extend([0, 0, 0xAB]);

        let patcher = DomainPatcher::with_replacement("sanasol.ws").unwrap();
        let first = patcher.apply_domain_patches(&data, &mut Silent);
        assert_eq!(first.occurrence_count, 3);
        assert_eq!(first.patched_bytes.len(), data.len());

        let second = patcher.apply_domain_patches(&first.patched_bytes, &mut Silent);
        assert_eq!(second.occurrence_count, 0);
        assert_eq!(second.patched_bytes, first.patched_bytes);
    }

    #[test]
    fn test_rejects_non_ascii_domains() {
        assert!(DomainPatcher::new("hytale.com", "bücher.de").is_err());
        assert!(DomainPatcher::new("", "a.b").is_err());
    }
}
