//! Windowed pattern scanning over files.
//!
//! Files are read in chunks of `buffer_size` bytes; consecutive chunks overlap
//! by `pattern.len() - 1` bytes so a match straddling a chunk boundary is
//! still seen exactly once. Memory use is bounded by the chunk size.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::pattern::PatternSpec;

pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_CONTEXT: usize = 64;

/// Progress callback: `(bytes_scanned, total_bytes, message)`.
pub type ScanProgress<'a> = &'a mut dyn FnMut(u64, u64, &str);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    pub start_offset: u64,
    /// `None` scans to EOF; `Some(0)` scans nothing.
    pub max_search_size: Option<u64>,
    pub buffer_size: usize,
    pub context_before: usize,
    pub context_after: usize,
    pub find_all: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            start_offset: 0,
            max_search_size: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            context_before: DEFAULT_CONTEXT,
            context_after: DEFAULT_CONTEXT,
            find_all: false,
        }
    }
}

impl SearchConfig {
    pub fn with_start_offset(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn with_max_search_size(mut self, size: u64) -> Self {
        self.max_search_size = Some(size);
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_context(mut self, before: usize, after: usize) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }

    pub fn with_find_all(mut self, find_all: bool) -> Self {
        self.find_all = find_all;
        self
    }
}

/// A located pattern plus the bytes around it.
///
/// `context[match_start..match_end]` is the matched region; `offset` is the
/// absolute file offset of `context[match_start]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub offset: u64,
    pub context: Vec<u8>,
    pub match_start: usize,
    pub match_end: usize,
}

impl PatternMatch {
    pub fn matched_bytes(&self) -> &[u8] {
        &self.context[self.match_start..self.match_end]
    }

    /// Absolute file offset of `context[0]`.
    pub fn context_offset(&self) -> u64 {
        self.offset - self.match_start as u64
    }
}

/// First match of `pattern`, or `None`.
pub fn search(path: &Path, pattern: &PatternSpec, config: &SearchConfig) -> Result<Option<PatternMatch>> {
    let config = config.with_find_all(false);
    Ok(scan(path, pattern, &config, None)?.into_iter().next())
}

/// Every match of `pattern`, in file order.
pub fn search_all(path: &Path, pattern: &PatternSpec, config: &SearchConfig) -> Result<Vec<PatternMatch>> {
    let config = config.with_find_all(true);
    scan(path, pattern, &config, None)
}

/// Scan `path` for `pattern` as configured, reporting progress after every
/// chunk. Returns at most one match unless `config.find_all` is set.
pub fn scan(
    path: &Path,
    pattern: &PatternSpec,
    config: &SearchConfig,
    mut progress: Option<ScanProgress<'_>>,
) -> Result<Vec<PatternMatch>> {
    if pattern.is_empty() {
        return Ok(Vec::new());
    }

    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let file_len = file.metadata().map_err(|e| Error::io(path, e))?.len();

    let start = config.start_offset.min(file_len);
    let available = file_len - start;
    let window = config
        .max_search_size
        .map_or(available, |max| max.min(available));
    let end = start + window;
    let pattern_len = pattern.len() as u64;

    if window < pattern_len {
        debug!(
            "Scan window {:#x}..{:#x} is shorter than pattern ({} bytes)",
            start, end, pattern_len
        );
        return Ok(Vec::new());
    }

    let chunk_size = config
        .buffer_size
        .max(pattern.len())
        .min(usize::try_from(window).unwrap_or(usize::MAX));
    let mut buffer = vec![0u8; chunk_size];
    let mut matches = Vec::new();
    let mut cursor = start;

    debug!(
        "Scanning {} for {} in {:#x}..{:#x} ({} byte chunks)",
        path.display(),
        pattern,
        start,
        end,
        chunk_size
    );

    loop {
        let to_read = (end - cursor).min(chunk_size as u64) as usize;
        file.seek(SeekFrom::Start(cursor))
            .map_err(|e| Error::io(path, e))?;
        file.read_exact(&mut buffer[..to_read])
            .map_err(|e| Error::io(path, e))?;

        let chunk = &buffer[..to_read];
        let hits: Vec<usize> = if config.find_all {
            pattern.find_all_in(chunk)
        } else {
            pattern.find_in(chunk).into_iter().collect()
        };

        for pos in hits {
            let offset = cursor + pos as u64;
            trace!("Match at {:#x}", offset);
            matches.push(capture_context(&mut file, path, file_len, offset, pattern.len(), config)?);

            if !config.find_all {
                debug!("Matched {} at {:#x}", pattern, offset);
                return Ok(matches);
            }
        }

        let chunk_end = cursor + to_read as u64;
        if let Some(report) = progress.as_deref_mut() {
            report(
                chunk_end - start,
                window,
                &format!("Scanned {:#x}..{:#x}", cursor, chunk_end),
            );
        }

        if chunk_end >= end {
            break;
        }
        cursor = chunk_end - pattern_len + 1;
    }

    debug!(
        "Scan of {} exhausted with {} match(es)",
        path.display(),
        matches.len()
    );
    Ok(matches)
}

/// Find `outer`, then look for `inner` only inside each outer match's
/// context window. Returns the first inner hit, with its absolute offset.
pub fn find_nested_pattern(
    path: &Path,
    outer: &PatternSpec,
    inner: &PatternSpec,
    config: &SearchConfig,
) -> Result<Option<PatternMatch>> {
    if inner.is_empty() {
        return Ok(None);
    }

    for outer_match in scan(path, outer, config, None)? {
        if let Some(rel) = inner.find_in(&outer_match.context) {
            let offset = outer_match.context_offset() + rel as u64;
            debug!(
                "Nested match: outer at {:#x}, inner at {:#x}",
                outer_match.offset, offset
            );
            return Ok(Some(PatternMatch {
                offset,
                match_start: rel,
                match_end: rel + inner.len(),
                context: outer_match.context,
            }));
        }
    }

    Ok(None)
}

fn capture_context(
    file: &mut File,
    path: &Path,
    file_len: u64,
    offset: u64,
    pattern_len: usize,
    config: &SearchConfig,
) -> Result<PatternMatch> {
    let ctx_start = offset.saturating_sub(config.context_before as u64);
    let ctx_end = offset
        .saturating_add(pattern_len as u64)
        .saturating_add(config.context_after as u64)
        .min(file_len);

    let mut context = vec![0u8; (ctx_end - ctx_start) as usize];
    file.seek(SeekFrom::Start(ctx_start))
        .map_err(|e| Error::io(path, e))?;
    file.read_exact(&mut context)
        .map_err(|e| Error::io(path, e))?;

    let match_start = (offset - ctx_start) as usize;
    Ok(PatternMatch {
        offset,
        context,
        match_start,
        match_end: match_start + pattern_len,
    })
}
