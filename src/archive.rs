//! Domain sweep over the members of a zip container (server jars).
//!
//! Only text-like and class members are touched. Every other member is copied
//! raw, so its compressed bytes, timestamp and permissions are unchanged. The
//! rebuilt container replaces the original only once it is complete.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use memchr::memmem;
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::domain::DomainPatcher;
use crate::error::{Error, Result};
use crate::progress::{ProgressListener, Silent};

const WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;
/// Upper bound on the up-front allocation for a member; headers are untrusted.
const MAX_MEMBER_PREALLOC: u64 = 16 * 1024 * 1024;
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

const PATCHABLE_EXTENSIONS: &[&str] = &[
    "class", "json", "properties", "txt", "xml", "yml", "yaml", "cfg", "conf", "toml", "mf",
    "js", "html",
];

pub fn is_zip_archive(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Whether a member with this name is swept: text and class files only.
pub fn is_patchable_member(name: &str) -> bool {
    if name.ends_with('/') {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|ext| PATCHABLE_EXTENSIONS.contains(&ext.as_str()))
}

/// UTF-8 domain sweep over every eligible member of the archive at `path`.
/// Returns the total number of replaced occurrences; with zero the archive is
/// left untouched.
pub fn patch_archive(
    path: &Path,
    patcher: &DomainPatcher,
    listener: &mut dyn ProgressListener,
) -> Result<usize> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut zip_in = ZipArchive::new(BufReader::new(file))?;
    let needle = patcher.original().as_bytes();

    listener.on_progress(&format!(
        "Scanning {} archive members of {}",
        zip_in.len(),
        path.display()
    ));

    let mut candidates: Vec<(usize, Vec<u8>)> = Vec::new();
    for i in 0..zip_in.len() {
        let mut entry = zip_in.by_index(i)?;
        if entry.is_dir() || !is_patchable_member(entry.name()) {
            continue;
        }
        let mut data = Vec::with_capacity(entry.size().min(MAX_MEMBER_PREALLOC) as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::io(path, e))?;
        if memmem::find(&data, needle).is_some() {
            candidates.push((i, data));
        }
    }

    // Listeners are not Sync; per-member results are reported after the join.
    let patched: HashMap<usize, (Vec<u8>, usize)> = candidates
        .into_par_iter()
        .map(|(i, data)| {
            let result = patcher.patch_utf8(&data, &mut Silent);
            (i, (result.patched_bytes, result.occurrence_count))
        })
        .filter(|(_, (_, count))| *count > 0)
        .collect();

    if patched.is_empty() {
        listener.on_progress("No archive member references the original domain");
        return Ok(0);
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
    let mut total = 0;
    let mut written: Vec<(String, &[u8])> = Vec::with_capacity(patched.len());

    {
        let writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, temp.as_file_mut());
        let mut zip_out = ZipWriter::new(writer);
        if !zip_in.comment().is_empty() {
            zip_out.set_comment(String::from_utf8_lossy(zip_in.comment()).into_owned());
        }

        for i in 0..zip_in.len() {
            match patched.get(&i) {
                Some((bytes, count)) => {
                    let entry = zip_in.by_index_raw(i)?;
                    let name = entry.name().to_string();
                    let mut options = SimpleFileOptions::default()
                        .compression_method(entry.compression())
                        .large_file(bytes.len() as u64 >= u32::MAX as u64);
                    if let Some(modified) = entry.last_modified() {
                        options = options.last_modified_time(modified);
                    }
                    if let Some(mode) = entry.unix_mode() {
                        options = options.unix_permissions(mode);
                    }
                    drop(entry);

                    zip_out.start_file(name.as_str(), options)?;
                    zip_out.write_all(bytes).map_err(|e| Error::io(path, e))?;

                    debug!("Patched member {} ({} occurrence(s))", name, count);
                    listener.on_progress(&format!("Patched {}: {} occurrence(s)", name, count));
                    total += count;
                    written.push((name, bytes.as_slice()));
                }
                None => {
                    let entry = zip_in.by_index_raw(i)?;
                    zip_out.raw_copy_file(entry)?;
                }
            }
        }

        let mut writer = zip_out.finish()?;
        writer.flush().map_err(|e| Error::io(path, e))?;
    }

    let permissions = std::fs::metadata(path)
        .map_err(|e| Error::io(path, e))?
        .permissions();
    std::fs::set_permissions(temp.path(), permissions).map_err(|e| Error::io(temp.path(), e))?;
    temp.persist(path).map_err(|e| Error::io(path, e.error))?;

    listener.on_progress("Verifying patched archive members");
    verify_patched_members(path, &written)?;

    info!(
        "Rewrote {} with {} patched member(s), {} occurrence(s)",
        path.display(),
        patched.len(),
        total
    );
    Ok(total)
}

/// Re-open the archive at `path` and check each `(name, bytes)` member
/// decompresses to exactly `bytes`.
pub fn verify_patched_members(path: &Path, expected: &[(String, &[u8])]) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;

    for (name, bytes) in expected {
        let mut entry = zip.by_name(name)?;
        let offset = entry.data_start();
        let mut actual = Vec::with_capacity(bytes.len());
        entry
            .read_to_end(&mut actual)
            .map_err(|e| Error::io(path, e))?;
        if actual != *bytes {
            warn!("Member {} of {} does not hold the patched bytes", name, path.display());
            return Err(Error::VerificationFailed { offset });
        }
    }

    debug!("Verified {} patched member(s) of {}", expected.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::CompressionMethod;

    fn build_archive(path: &Path, members: &[(&str, &[u8], CompressionMethod)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, data, method) in members {
            let options = SimpleFileOptions::default().compression_method(*method);
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_member(path: &Path, name: &str) -> Vec<u8> {
        let data = std::fs::read(path).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(data)).unwrap();
        let mut entry = zip.by_name(name).unwrap();
        let mut out = Vec::new();
        entry.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_patchable_member_names() {
        assert!(is_patchable_member("com/hypixel/Server.class"));
        assert!(is_patchable_member("config/SERVER.JSON"));
        assert!(is_patchable_member("META-INF/MANIFEST.MF"));
        assert!(!is_patchable_member("assets/logo.png"));
        assert!(!is_patchable_member("natives/"));
        assert!(!is_patchable_member("LICENSE"));
    }

    #[test]
    fn test_patch_archive_rewrites_only_text_members() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("server.jar");
        let binary_blob = b"\x89PNG hytale.com".to_vec();
        build_archive(
            &jar,
            &[
                ("app.properties", b"auth=https://hytale.com/auth\n", CompressionMethod::Deflated),
                ("Main.class", b"\xCA\xFE\xBA\xBEhytale.com", CompressionMethod::Stored),
                ("logo.png", &binary_blob, CompressionMethod::Stored),
                ("readme.txt", b"nothing here", CompressionMethod::Deflated),
            ],
        );
        assert!(is_zip_archive(&jar).unwrap());

        let patcher = DomainPatcher::with_replacement("sanasol.ws").unwrap();
        let mut messages = Vec::new();
        let count = patch_archive(&jar, &patcher, &mut |m: &str| messages.push(m.to_string())).unwrap();

        assert_eq!(count, 2);
        assert_eq!(read_member(&jar, "app.properties"), b"auth=https://sanasol.ws/auth\n");
        assert_eq!(read_member(&jar, "Main.class"), b"\xCA\xFE\xBA\xBEsanasol.ws");
        assert_eq!(read_member(&jar, "logo.png"), binary_blob);
        assert_eq!(read_member(&jar, "readme.txt"), b"nothing here");
        assert!(messages.iter().any(|m| m.contains("Main.class")));

        let again = patch_archive(&jar, &patcher, &mut Silent).unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn test_verify_patched_members_detects_mismatch() {
        let dir = TempDir::new().unwrap();
        let jar = dir.path().join("server.jar");
        build_archive(
            &jar,
            &[("app.properties", b"auth=https://ab.cd/auth\n", CompressionMethod::Deflated)],
        );

        let good: &[u8] = b"auth=https://ab.cd/auth\n";
        verify_patched_members(&jar, &[("app.properties".to_string(), good)]).unwrap();

        let stale: &[u8] = b"auth=https://hytale.com/auth\n";
        let err = verify_patched_members(&jar, &[("app.properties".to_string(), stale)]).unwrap_err();
        assert!(matches!(err, Error::VerificationFailed { .. }));

        let missing = verify_patched_members(&jar, &[("gone.txt".to_string(), good)]).unwrap_err();
        assert!(matches!(missing, Error::Archive(_)));
    }

    #[test]
    fn test_non_zip_detection() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"PK").unwrap();
        assert!(!is_zip_archive(file.path()).unwrap());
        std::fs::write(file.path(), b"\x7FELF....").unwrap();
        assert!(!is_zip_archive(file.path()).unwrap());
    }
}
