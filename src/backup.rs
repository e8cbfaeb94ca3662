//! Backup, restore and discovery of rollback snapshots.
//!
//! Naming convention:
//! - `<file>.original`: the first backup ever taken, never overwritten
//! - `<file>.onlinefix-<unix timestamp>`: every later snapshot

use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::util;

pub const ORIGINAL_SUFFIX: &str = ".original";
pub const SNAPSHOT_SUFFIX: &str = ".onlinefix-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackupKind {
    Original,
    Snapshot { timestamp: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    /// The file this backup restores.
    pub target: PathBuf,
    pub kind: BackupKind,
}

pub fn original_backup_path(target: &Path) -> PathBuf {
    util::with_name_suffix(target, ORIGINAL_SUFFIX)
}

pub fn snapshot_path(target: &Path, timestamp: i64) -> PathBuf {
    util::with_name_suffix(target, &format!("{}{}", SNAPSHOT_SUFFIX, timestamp))
}

/// Copy `target` to its `.original` backup, or to a timestamped snapshot when
/// the `.original` already exists. The copy is hash-checked against the source.
pub fn create_backup(target: &Path) -> Result<PathBuf> {
    let backup = next_backup_path(target);
    debug!("Backing up {} -> {}", target.display(), backup.display());

    let failed = |reason: String| Error::BackupCreationFailed {
        path: target.to_path_buf(),
        reason,
    };

    if !target.is_file() {
        return Err(failed("target is not a regular file".to_string()));
    }

    if let Err(e) = std::fs::copy(target, &backup) {
        let _ = std::fs::remove_file(&backup);
        return Err(failed(format!("copy to {} failed: {}", backup.display(), e)));
    }

    let matches = util::hash_file_streaming(target)
        .and_then(|src| util::hash_file_streaming(&backup).map(|dst| src == dst));
    match matches {
        Ok(true) => {
            info!("Created backup {}", backup.display());
            Ok(backup)
        }
        Ok(false) => {
            let _ = std::fs::remove_file(&backup);
            Err(failed(format!("{} does not match the source", backup.display())))
        }
        Err(e) => {
            let _ = std::fs::remove_file(&backup);
            Err(failed(e.to_string()))
        }
    }
}

fn next_backup_path(target: &Path) -> PathBuf {
    let original = original_backup_path(target);
    if !original.exists() {
        return original;
    }

    let mut timestamp = chrono::Utc::now().timestamp();
    loop {
        let candidate = snapshot_path(target, timestamp);
        if !candidate.exists() {
            return candidate;
        }
        timestamp += 1;
    }
}

/// Overwrite `target` with `backup` and confirm the contents match.
pub fn restore_backup(backup: &Path, target: &Path) -> Result<()> {
    std::fs::copy(backup, target).map_err(|e| Error::io(target, e))?;

    if util::hash_file_streaming(backup)? != util::hash_file_streaming(target)? {
        return Err(Error::io(
            target,
            std::io::Error::other(format!(
                "restored file does not match backup {}",
                backup.display()
            )),
        ));
    }

    info!("Restored {} from {}", target.display(), backup.display());
    Ok(())
}

/// Restore each existing path from its `.original` backup. Paths without one
/// are skipped. Returns the paths that were restored.
pub fn restore_original_game(client: &Path, server: &Path) -> Result<Vec<PathBuf>> {
    let mut restored = Vec::new();
    for target in [client, server] {
        let backup = original_backup_path(target);
        if !backup.is_file() {
            warn!("No {} backup for {}", ORIGINAL_SUFFIX, target.display());
            continue;
        }
        restore_backup(&backup, target)?;
        restored.push(target.to_path_buf());
    }
    Ok(restored)
}

/// Classify `path` as a backup artifact by its name.
pub fn parse_backup_name(path: &Path) -> Option<BackupArtifact> {
    let name = path.file_name()?.to_str()?;

    let (target_name, kind) = if let Some(stem) = name.strip_suffix(ORIGINAL_SUFFIX) {
        (stem, BackupKind::Original)
    } else {
        let (stem, ts) = name.rsplit_once(SNAPSHOT_SUFFIX)?;
        let timestamp = ts.parse().ok()?;
        (stem, BackupKind::Snapshot { timestamp })
    };

    if target_name.is_empty() {
        return None;
    }

    Some(BackupArtifact {
        path: path.to_path_buf(),
        target: path.with_file_name(target_name),
        kind,
    })
}

/// Walk `root` and collect every backup artifact: snapshots newest first,
/// then `.original` backups.
pub fn discover_backups(root: &Path) -> Result<Vec<BackupArtifact>> {
    let mut found = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io(&path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(artifact) = parse_backup_name(entry.path()) {
            found.push(artifact);
        }
    }

    found.sort_by_key(|a| {
        let rank = match a.kind {
            BackupKind::Snapshot { timestamp } => (0, Reverse(timestamp)),
            BackupKind::Original => (1, Reverse(0)),
        };
        (rank, a.path.clone())
    });
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_backup_is_original_then_snapshots() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("HytaleClient");
        std::fs::write(&target, b"pristine").unwrap();

        let first = create_backup(&target).unwrap();
        assert_eq!(first, dir.path().join("HytaleClient.original"));
        assert_eq!(std::fs::read(&first).unwrap(), b"pristine");

        std::fs::write(&target, b"modified").unwrap();
        let second = create_backup(&target).unwrap();
        let second_name = second.file_name().unwrap().to_str().unwrap().to_string();
        assert!(second_name.starts_with("HytaleClient.onlinefix-"));
        assert_eq!(std::fs::read(&first).unwrap(), b"pristine");
        assert_eq!(std::fs::read(&second).unwrap(), b"modified");

        let third = create_backup(&target).unwrap();
        assert_ne!(second, third);
    }

    #[test]
    fn test_backup_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = create_backup(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::BackupCreationFailed { .. }));
        assert!(!dir.path().join("missing.original").exists());
    }

    #[test]
    fn test_restore_backup_round_trip() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("server.jar");
        std::fs::write(&target, b"original bytes").unwrap();

        let backup = create_backup(&target).unwrap();
        std::fs::write(&target, b"patched bytes!").unwrap();
        restore_backup(&backup, &target).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"original bytes");
        assert!(backup.exists());
    }

    #[test]
    fn test_restore_original_game_skips_missing() {
        let dir = TempDir::new().unwrap();
        let client = dir.path().join("client.bin");
        let server = dir.path().join("server.jar");
        std::fs::write(&client, b"client v1").unwrap();
        std::fs::write(&server, b"server v1").unwrap();

        create_backup(&client).unwrap();
        std::fs::write(&client, b"client v2").unwrap();

        let restored = restore_original_game(&client, &server).unwrap();
        assert_eq!(restored, vec![client.clone()]);
        assert_eq!(std::fs::read(&client).unwrap(), b"client v1");
        assert_eq!(std::fs::read(&server).unwrap(), b"server v1");
    }

    #[test]
    fn test_parse_backup_name() {
        let original = parse_backup_name(Path::new("/g/Client.exe.original")).unwrap();
        assert_eq!(original.target, PathBuf::from("/g/Client.exe"));
        assert_eq!(original.kind, BackupKind::Original);

        let snapshot = parse_backup_name(Path::new("/g/Client.exe.onlinefix-1700000000")).unwrap();
        assert_eq!(snapshot.target, PathBuf::from("/g/Client.exe"));
        assert_eq!(snapshot.kind, BackupKind::Snapshot { timestamp: 1_700_000_000 });

        assert!(parse_backup_name(Path::new("/g/Client.exe")).is_none());
        assert!(parse_backup_name(Path::new("/g/Client.exe.onlinefix-abc")).is_none());
        assert!(parse_backup_name(Path::new("/g/.original")).is_none());
    }

    #[test]
    fn test_discover_backups_orders_newest_first() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("Server");
        std::fs::create_dir_all(&nested).unwrap();

        for name in [
            "Client.exe",
            "Client.exe.original",
            "Client.exe.onlinefix-100",
            "Client.exe.onlinefix-300",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(nested.join("server.jar.onlinefix-200"), b"x").unwrap();

        let found = discover_backups(dir.path()).unwrap();
        let kinds: Vec<BackupKind> = found.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BackupKind::Snapshot { timestamp: 300 },
                BackupKind::Snapshot { timestamp: 200 },
                BackupKind::Snapshot { timestamp: 100 },
                BackupKind::Original,
            ]
        );
        assert_eq!(found[1].target, nested.join("server.jar"));
    }
}
