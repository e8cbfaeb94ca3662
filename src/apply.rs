//! Patch orchestration: backup, search, write, verify, roll back on failure.
//!
//! Every entry point takes exclusive ownership of the target file for the
//! duration of the call and reports status through a [`ProgressListener`].
//! Nothing is attempted without a verified backup, and any failure after a
//! mutation restores the backup before returning.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::archive;
use crate::backup;
use crate::byte_io::{bytes_to_hex, write_bytes};
use crate::domain::{DomainPatchResult, DomainPatcher};
use crate::error::Error;
use crate::patch::{try_replace_bytes, verify};
use crate::profile::PatchProfile;
use crate::progress::ProgressListener;
use crate::search::find_nested_pattern;
use crate::util;

#[derive(Debug)]
pub struct PatchResult {
    pub success: bool,
    pub message: String,
    /// Left on disk in every case; callers decide when to prune it.
    pub backup_path: Option<PathBuf>,
    /// Offsets patched (signature patch) or strings replaced (domain sweep).
    pub occurrences: usize,
    pub failure: Option<Error>,
}

impl PatchResult {
    fn succeeded(message: String, backup_path: PathBuf, occurrences: usize) -> Self {
        Self {
            success: true,
            message,
            backup_path: Some(backup_path),
            occurrences,
            failure: None,
        }
    }

    fn failed(failure: Error, backup_path: Option<PathBuf>) -> Self {
        Self {
            success: false,
            message: failure.to_string(),
            backup_path,
            occurrences: 0,
            failure: Some(failure),
        }
    }
}

/// Overwrite the profile's signature in `target` with its replacement stub.
pub fn apply_patch(
    target: &Path,
    profile: &PatchProfile,
    listener: &mut dyn ProgressListener,
) -> PatchResult {
    info!(
        "Applying '{}' ({}) to {}",
        profile.name,
        profile.platform,
        target.display()
    );

    let backup_path = match take_backup(target, listener) {
        Ok(path) => path,
        Err(result) => return result,
    };

    let replacement = match profile.padded_replacement() {
        Ok(bytes) => bytes,
        Err(e) => return PatchResult::failed(e, Some(backup_path)),
    };

    listener.on_progress(&format!(
        "Searching for signature from {:#x}",
        profile.start_offset
    ));
    let config = profile.search_config();
    let found = match find_nested_pattern(target, &profile.outer, &profile.inner, &config) {
        Ok(Some(found)) => found,
        Ok(None) => {
            listener.on_progress("Signature not found; file left untouched");
            return PatchResult::failed(Error::PatternNotFound, Some(backup_path));
        }
        Err(e) => {
            listener.on_progress(&format!("Search failed: {}", e));
            return PatchResult::failed(e, Some(backup_path));
        }
    };

    let offset = found.offset;
    listener.on_progress(&format!(
        "Signature found at {:#x}; writing {}",
        offset,
        bytes_to_hex(&replacement)
    ));

    if let Err(e) = try_replace_bytes(target, offset, found.matched_bytes(), &replacement) {
        return roll_back(target, backup_path, e, listener);
    }

    listener.on_progress("Verifying written bytes");
    match verify(target, offset, &replacement) {
        Ok(true) => {}
        Ok(false) => {
            return roll_back(target, backup_path, Error::VerificationFailed { offset }, listener)
        }
        Err(e) => return roll_back(target, backup_path, e, listener),
    }

    let message = format!("Patched {} at {:#x}", target.display(), offset);
    info!("{}", message);
    listener.on_progress(&message);
    PatchResult::succeeded(message, backup_path, 1)
}

/// Domain sweep over a native client binary: URL, length-prefixed and
/// UTF-16LE passes over the whole file.
pub fn patch_client(
    target: &Path,
    patcher: &DomainPatcher,
    listener: &mut dyn ProgressListener,
) -> PatchResult {
    sweep_file(target, listener, |data, listener| {
        patcher.apply_domain_patches(data, listener)
    })
}

/// Domain sweep over a server: text and class members of a zip container,
/// or a UTF-8 sweep over the whole file when it is not an archive.
pub fn patch_server(
    target: &Path,
    patcher: &DomainPatcher,
    listener: &mut dyn ProgressListener,
) -> PatchResult {
    match archive::is_zip_archive(target) {
        Ok(true) => {}
        Ok(false) => {
            debug!("{} is not a zip archive; sweeping raw bytes", target.display());
            return sweep_file(target, listener, |data, listener| {
                patcher.patch_utf8(data, listener)
            });
        }
        Err(e) => return PatchResult::failed(e, None),
    }

    let backup_path = match take_backup(target, listener) {
        Ok(path) => path,
        Err(result) => return result,
    };

    match archive::patch_archive(target, patcher, listener) {
        Ok(count) => {
            let message = format!(
                "Replaced {} occurrence(s) of {} in {}",
                count,
                patcher.original(),
                target.display()
            );
            listener.on_progress(&message);
            PatchResult::succeeded(message, backup_path, count)
        }
        Err(e) => roll_back(target, backup_path, e, listener),
    }
}

fn sweep_file<F>(target: &Path, listener: &mut dyn ProgressListener, sweep: F) -> PatchResult
where
    F: FnOnce(&[u8], &mut dyn ProgressListener) -> DomainPatchResult,
{
    let backup_path = match take_backup(target, listener) {
        Ok(path) => path,
        Err(result) => return result,
    };

    let data = match util::read_file(target) {
        Ok(data) => data,
        Err(e) => return PatchResult::failed(e, Some(backup_path)),
    };

    let result = sweep(&data, &mut *listener);
    if result.occurrence_count == 0 {
        let message = format!("Nothing to replace in {}", target.display());
        listener.on_progress(&message);
        return PatchResult::succeeded(message, backup_path, 0);
    }

    if let Err(e) = write_bytes(target, 0, &result.patched_bytes) {
        return roll_back(target, backup_path, e, listener);
    }

    listener.on_progress("Verifying written file");
    match util::hash_file_streaming(target) {
        Ok(hash) if hash == util::hash_bytes(&result.patched_bytes) => {}
        Ok(_) => {
            return roll_back(target, backup_path, Error::VerificationFailed { offset: 0 }, listener)
        }
        Err(e) => return roll_back(target, backup_path, e, listener),
    }

    let message = format!(
        "Replaced {} occurrence(s) in {}",
        result.occurrence_count,
        target.display()
    );
    info!("{}", message);
    listener.on_progress(&message);
    PatchResult::succeeded(message, backup_path, result.occurrence_count)
}

fn take_backup(target: &Path, listener: &mut dyn ProgressListener) -> Result<PathBuf, PatchResult> {
    listener.on_progress(&format!("Creating backup of {}", target.display()));
    match backup::create_backup(target) {
        Ok(path) => {
            listener.on_progress(&format!("Backup written to {}", path.display()));
            Ok(path)
        }
        Err(e) => {
            error!("Aborting, no backup: {}", e);
            listener.on_progress(&format!("Backup failed, nothing modified: {}", e));
            Err(PatchResult::failed(e, None))
        }
    }
}

fn roll_back(
    target: &Path,
    backup_path: PathBuf,
    failure: Error,
    listener: &mut dyn ProgressListener,
) -> PatchResult {
    warn!("Patch of {} failed: {}; restoring backup", target.display(), failure);
    listener.on_progress(&format!("{}; restoring {}", failure, backup_path.display()));

    let mut result = PatchResult::failed(failure, None);
    match backup::restore_backup(&backup_path, target) {
        Ok(()) => listener.on_progress("Original file restored"),
        Err(restore_err) => {
            error!("Restore of {} failed: {}", target.display(), restore_err);
            result.message = format!("{} (restore failed: {})", result.message, restore_err);
            listener.on_progress(&result.message);
        }
    }
    result.backup_path = Some(backup_path);
    result
}
