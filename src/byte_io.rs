//! Random-access byte I/O on files.
//!
//! Every call opens, touches and closes the file; no handle outlives a call.
//! Multi-byte values are little-endian. Writes never extend a file.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Read exactly `length` bytes starting at `offset`.
pub fn read_bytes(path: &Path, offset: u64, length: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::io(path, e))?;

    let mut buf = vec![0u8; length];
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::io(
                path,
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("fewer than {} bytes available at offset {:#x}", length, offset),
                ),
            )
        } else {
            Error::io(path, e)
        }
    })?;
    Ok(buf)
}

/// Overwrite `bytes` at `offset`. Fails if the write would run past EOF.
pub fn write_bytes(path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;

    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();
    let end = offset.checked_add(bytes.len() as u64);
    if end.map_or(true, |end| end > len) {
        return Err(Error::io(
            path,
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "write of {} bytes at offset {:#x} would extend file of {} bytes",
                    bytes.len(),
                    offset,
                    len
                ),
            ),
        ));
    }

    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::io(path, e))?;
    file.write_all(bytes).map_err(|e| Error::io(path, e))?;
    file.flush().map_err(|e| Error::io(path, e))?;
    Ok(())
}

pub fn read_byte(path: &Path, offset: u64) -> Result<u8> {
    Ok(read_bytes(path, offset, 1)?[0])
}

pub fn read_word(path: &Path, offset: u64) -> Result<u16> {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&read_bytes(path, offset, 2)?);
    Ok(u16::from_le_bytes(raw))
}

pub fn read_dword(path: &Path, offset: u64) -> Result<u32> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&read_bytes(path, offset, 4)?);
    Ok(u32::from_le_bytes(raw))
}

pub fn read_qword(path: &Path, offset: u64) -> Result<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&read_bytes(path, offset, 8)?);
    Ok(u64::from_le_bytes(raw))
}

pub fn write_byte(path: &Path, offset: u64, value: u8) -> Result<()> {
    write_bytes(path, offset, &[value])
}

pub fn write_word(path: &Path, offset: u64, value: u16) -> Result<()> {
    write_bytes(path, offset, &value.to_le_bytes())
}

pub fn write_dword(path: &Path, offset: u64, value: u32) -> Result<()> {
    write_bytes(path, offset, &value.to_le_bytes())
}

pub fn write_qword(path: &Path, offset: u64, value: u64) -> Result<()> {
    write_bytes(path, offset, &value.to_le_bytes())
}

/// Parse hex text into bytes.
///
/// Accepts whitespace-separated tokens (`"48 8B 05"`) or a contiguous run
/// (`"488B05"`), with an optional `0x` prefix per token. Wildcards are not
/// accepted here; see [`crate::pattern::PatternSpec::from_hex`].
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for token in hex.split_whitespace() {
        let token = token.trim_start_matches("0x").trim_start_matches("0X");
        if token.len() % 2 != 0 {
            return Err(Error::InvalidHex(format!(
                "odd number of hex digits in '{}'",
                token
            )));
        }
        for i in (0..token.len()).step_by(2) {
            let pair = token
                .get(i..i + 2)
                .ok_or_else(|| Error::InvalidHex(format!("non-ASCII input in '{}'", token)))?;
            out.push(parse_hex_byte(pair)?);
        }
    }
    Ok(out)
}

/// Parse exactly two ASCII hex digits. Signs, prefixes and other widths are
/// rejected.
pub fn parse_hex_byte(pair: &str) -> Result<u8> {
    let digits = pair.as_bytes();
    if digits.len() != 2 || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::InvalidHex(format!(
            "'{}' is not a two-digit hex byte",
            pair
        )));
    }
    u8::from_str_radix(pair, 16)
        .map_err(|e| Error::InvalidHex(format!("invalid byte '{}': {}", pair, e)))
}

/// Format bytes as uppercase, space-separated hex (`"48 8B 05"`).
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a classic offset / hex / ASCII dump, 16 bytes per row.
///
/// ```text
/// 00000100: 55 53 48 83 EC 38 48 8D  6C 24 40 33 C0 48 89 45  |USH..8H.l$@3.H.E|
/// ```
pub fn hex_dump(bytes: &[u8], base_offset: u64) -> String {
    let mut out = String::new();

    for (i, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08X}: ", base_offset + (i * 16) as u64));

        for j in 0..16 {
            if j == 8 {
                out.push(' ');
            }
            match chunk.get(j) {
                Some(byte) => out.push_str(&format!("{:02X} ", byte)),
                None => out.push_str("   "),
            }
        }

        out.push_str(" |");
        for byte in chunk {
            if (0x20..0x7F).contains(byte) {
                out.push(*byte as char);
            } else {
                out.push('.');
            }
        }
        for _ in chunk.len()..16 {
            out.push(' ');
        }
        out.push_str("|\n");
    }

    out
}
