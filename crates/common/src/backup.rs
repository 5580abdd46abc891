//! Backup destination and restore source.
//!
//! Backups are keyed by day: the start-of-day timestamp of the backup run
//! selects the `YYYYMMDD` bucket the persistence file is stored under, and a
//! restore date in the same format selects the bucket to load from.
//!
//! ```text
//! {backup_dir}/
//! ├── 20101010/appendonly.aof
//! └── 20101011/appendonly.aof
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::{error, info, warn};

use crate::error::CollaboratorError;

/// Date format of restore requests and backup buckets.
pub const RESTORE_DATE_FORMAT: &str = "%Y%m%d";

/// Resolve an 8-digit `YYYYMMDD` string to the start of that day (UTC).
///
/// Returns `None` for anything else; callers log and report failure.
pub fn parse_restore_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(s, RESTORE_DATE_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Bucket name for a day timestamp.
pub fn day_bucket(day: &DateTime<Utc>) -> String {
    day.format(RESTORE_DATE_FORMAT).to_string()
}

#[async_trait]
pub trait Backup: Send + Sync {
    /// Store `file` as the backup of `day`. `Ok(false)` means the upload was
    /// attempted and did not succeed.
    async fn upload(&self, file: &Path, day: DateTime<Utc>) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait Restore: Send + Sync {
    /// Load the backup for `date` (`YYYYMMDD`) onto local disk.
    ///
    /// A malformed date is logged and reported as `false`, never raised.
    async fn restore_data(&self, date: &str) -> Result<bool, CollaboratorError>;
}

// ════════════════════════════════════════════════════════════════════════════
// LOCAL FILESYSTEM IMPLEMENTATIONS
// ════════════════════════════════════════════════════════════════════════════

/// Copies the persistence file into a day bucket under `backup_dir`.
#[derive(Debug, Clone)]
pub struct LocalBackup {
    backup_dir: PathBuf,
}

impl LocalBackup {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        LocalBackup { backup_dir: backup_dir.into() }
    }
}

#[async_trait]
impl Backup for LocalBackup {
    async fn upload(&self, file: &Path, day: DateTime<Utc>) -> Result<bool, CollaboratorError> {
        let Some(name) = file.file_name() else {
            error!(path = %file.display(), "backup source has no file name");
            return Ok(false);
        };
        let bucket = self.backup_dir.join(day_bucket(&day));
        tokio::fs::create_dir_all(&bucket).await?;

        let dest = bucket.join(name);
        let tmp = bucket.join(format!(".{}.tmp", name.to_string_lossy()));
        let bytes = tokio::fs::copy(file, &tmp).await?;
        tokio::fs::rename(&tmp, &dest).await?;

        info!(dest = %dest.display(), bytes, "backup uploaded");
        Ok(true)
    }
}

/// Copies a day bucket's files back into the storage data directory.
#[derive(Debug, Clone)]
pub struct LocalRestore {
    backup_dir: PathBuf,
    data_dir: PathBuf,
}

impl LocalRestore {
    pub fn new(backup_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        LocalRestore {
            backup_dir: backup_dir.into(),
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl Restore for LocalRestore {
    async fn restore_data(&self, date: &str) -> Result<bool, CollaboratorError> {
        let Some(day) = parse_restore_date(date) else {
            error!(date, "restore date is not YYYYMMDD; nothing restored");
            return Ok(false);
        };
        let bucket = self.backup_dir.join(day_bucket(&day));
        if !tokio::fs::try_exists(&bucket).await? {
            warn!(bucket = %bucket.display(), "no backup for requested day");
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let mut restored = 0usize;
        let mut entries = tokio::fs::read_dir(&bucket).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            tokio::fs::copy(entry.path(), self.data_dir.join(&name)).await?;
            restored += 1;
        }

        info!(date, files = restored, "restore copied backup files");
        Ok(restored > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_restore_date_start_of_day() {
        let ts = parse_restore_date("20101010").expect("valid date");
        assert_eq!((ts.year(), ts.month(), ts.day()), (2010, 10, 10));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (0, 0, 0));
    }

    #[test]
    fn test_parse_restore_date_rejects_malformed() {
        assert!(parse_restore_date("notadate").is_none());
        assert!(parse_restore_date("2010-10-10").is_none());
        assert!(parse_restore_date("20101310").is_none());
        assert!(parse_restore_date("").is_none());
    }

    #[tokio::test]
    async fn test_local_backup_then_restore() {
        let root = tempfile::tempdir().unwrap();
        let src_dir = root.path().join("live");
        std::fs::create_dir_all(&src_dir).unwrap();
        let file = src_dir.join("appendonly.aof");
        std::fs::write(&file, b"*1\r\n$4\r\nPING\r\n").unwrap();

        let backups = root.path().join("backups");
        let day = parse_restore_date("20101010").unwrap();
        assert!(LocalBackup::new(&backups).upload(&file, day).await.unwrap());
        assert!(backups.join("20101010").join("appendonly.aof").exists());

        let data = root.path().join("restored");
        let restore = LocalRestore::new(&backups, &data);
        assert!(restore.restore_data("20101010").await.unwrap());
        assert_eq!(
            std::fs::read(data.join("appendonly.aof")).unwrap(),
            b"*1\r\n$4\r\nPING\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_local_restore_malformed_or_missing_returns_false() {
        let root = tempfile::tempdir().unwrap();
        let restore = LocalRestore::new(root.path().join("b"), root.path().join("d"));
        assert!(!restore.restore_data("notadate").await.unwrap());
        assert!(!restore.restore_data("20200101").await.unwrap());
    }
}
