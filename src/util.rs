use memmap2::Mmap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    // SAFETY: We only read from this mapping; the patch contract gives us
    // exclusive access to the file for the duration of the call.
    unsafe { Mmap::map(&file).map_err(|e| Error::io(path, e)) }
}

/// Read a whole file into memory. Empty files are not mapped.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let len = std::fs::metadata(path).map_err(|e| Error::io(path, e))?.len();
    if len == 0 {
        return Ok(Vec::new());
    }
    // Scope the mmap so it is dropped before anyone writes back to the file.
    // On Windows, writing to a file with an open mapping is an error (os error 1224).
    let data = {
        let mmap = mmap_file(path)?;
        mmap.to_vec()
    };
    Ok(data)
}

/// Stream-hash a file using BLAKE3.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn hash_file_streaming(path: &Path) -> Result<blake3::Hash> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(hasher.finalize())
}

/// Compute the BLAKE3 hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

/// `dir/name` -> `dir/name<suffix>`, keeping the full original file name.
pub fn with_name_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_name_suffix_keeps_extension() {
        let path = Path::new("/games/client/HytaleClient.exe");
        assert_eq!(
            with_name_suffix(path, ".original"),
            PathBuf::from("/games/client/HytaleClient.exe.original")
        );
    }

    #[test]
    fn test_streaming_hash_matches_in_memory_hash() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(file.path(), &data).unwrap();

        assert_eq!(hash_file_streaming(file.path()).unwrap(), hash_bytes(&data));
        assert_eq!(read_file(file.path()).unwrap(), data);
    }

    #[test]
    fn test_read_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(read_file(file.path()).unwrap().is_empty());
    }
}
