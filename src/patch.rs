//! In-place patch primitives. None of these change a file's length.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::byte_io::{bytes_to_hex, read_bytes, write_bytes};
use crate::error::{Error, Result};
use crate::opcodes;

const SWEEP_CHUNK_SIZE: usize = 4 * 1024 * 1024;

pub fn write_ret(path: &Path, offset: u64) -> Result<()> {
    write_bytes(path, offset, opcodes::RET)
}

/// `mov eax, value; ret` at `offset` (6 bytes).
pub fn write_return_value(path: &Path, offset: u64, value: u32) -> Result<()> {
    write_bytes(path, offset, &opcodes::return_value(value))
}

pub fn write_int3(path: &Path, offset: u64, count: usize) -> Result<()> {
    write_bytes(path, offset, &vec![opcodes::INT3; count])
}

pub fn write_jmp_short(path: &Path, offset: u64, rel: i8) -> Result<()> {
    write_bytes(path, offset, &opcodes::jmp_short(rel))
}

/// `count` single-byte NOPs.
pub fn make_nop(path: &Path, offset: u64, count: usize) -> Result<()> {
    write_bytes(path, offset, &vec![opcodes::NOPS[0][0]; count])
}

/// `count` bytes of NOP padding using the longest encodings that fit.
pub fn make_optimal_nop(path: &Path, offset: u64, count: usize) -> Result<()> {
    write_bytes(path, offset, &opcodes::optimal_nops(count))
}

/// Replace every `old` byte in the file with `new`, streaming in chunks.
/// Returns the number of bytes replaced.
pub fn replace_all_bytes(path: &Path, old: u8, new: u8) -> Result<usize> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;

    let mut buffer = vec![0u8; SWEEP_CHUNK_SIZE];
    let mut cursor: u64 = 0;
    let mut total = 0usize;

    loop {
        file.seek(SeekFrom::Start(cursor))
            .map_err(|e| Error::io(path, e))?;
        let read = file.read(&mut buffer).map_err(|e| Error::io(path, e))?;
        if read == 0 {
            break;
        }

        let chunk = &mut buffer[..read];
        let replaced: usize = chunk
            .par_iter_mut()
            .map(|byte| {
                if *byte == old {
                    *byte = new;
                    1
                } else {
                    0
                }
            })
            .sum();

        if replaced > 0 && old != new {
            file.seek(SeekFrom::Start(cursor))
                .map_err(|e| Error::io(path, e))?;
            file.write_all(chunk).map_err(|e| Error::io(path, e))?;
        }

        total += replaced;
        cursor += read as u64;
    }

    file.flush().map_err(|e| Error::io(path, e))?;
    debug!(
        "Replaced {} byte(s) {:02X} -> {:02X} in {}",
        total,
        old,
        new,
        path.display()
    );
    Ok(total)
}

/// Conditioned write: only proceeds when the live bytes at `offset` equal
/// `expected`. A `replacement` shorter than `expected` is zero-padded.
pub fn try_replace_bytes(path: &Path, offset: u64, expected: &[u8], replacement: &[u8]) -> Result<()> {
    let payload = opcodes::zero_padded(replacement, expected.len()).ok_or_else(|| {
        Error::InvalidPattern(format!(
            "replacement of {} bytes does not fit in {} expected bytes",
            replacement.len(),
            expected.len()
        ))
    })?;

    let live = read_bytes(path, offset, expected.len())?;
    if live != expected {
        warn!(
            "Refusing to patch {} at {:#x}: bytes differ from expectation",
            path.display(),
            offset
        );
        return Err(Error::UnexpectedBytesAtOffset {
            offset,
            expected: bytes_to_hex(expected),
            found: bytes_to_hex(&live),
        });
    }

    write_bytes(path, offset, &payload)
}

/// Like [`try_replace_bytes`], reporting a precondition mismatch as `false`
/// with nothing written.
pub fn replace_bytes(path: &Path, offset: u64, expected: &[u8], replacement: &[u8]) -> Result<bool> {
    match try_replace_bytes(path, offset, expected, replacement) {
        Ok(()) => Ok(true),
        Err(Error::UnexpectedBytesAtOffset { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Re-read `expected.len()` bytes at `offset` and compare.
pub fn verify(path: &Path, offset: u64, expected: &[u8]) -> Result<bool> {
    match read_bytes(path, offset, expected.len()) {
        Ok(live) => Ok(live == expected),
        Err(Error::Io { source, .. }) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
