use crate::events::{AppEvent, Notifier};
use crate::profiles::ProfileManager;
use crate::settings::{read_typed, LAST_BACKUP_DATE};
use crate::{BackupOutcome, BackupReason, BackupRecord, CoreError};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_BACKUPS: usize = 7;
const ARCHIVE_EXT: &str = "zip";
const MANUAL_MARK: &str = "_manual_";

/// True when there is no previous backup or it was taken on another calendar day.
pub fn is_backup_due_today<Tz: TimeZone>(last: Option<&DateTime<Tz>>, now: &DateTime<Tz>) -> bool {
    match last {
        None => true,
        Some(last) => last.with_timezone(&now.timezone()).date_naive() != now.date_naive(),
    }
}

pub struct ArchiveRequest {
    /// Entry names inside the archive are relative to this directory.
    pub base: PathBuf,
    pub sources: Vec<PathBuf>,
    pub dest: PathBuf,
}

#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, request: &ArchiveRequest) -> Result<(), CoreError>;
}

pub struct BackupScheduler {
    profiles: Arc<ProfileManager>,
    archiver: Arc<dyn Archiver>,
    notifier: Notifier,
    in_flight: Mutex<()>,
    max_backups: usize,
    app_version: String,
}

impl BackupScheduler {
    pub fn new(profiles: Arc<ProfileManager>, archiver: Arc<dyn Archiver>, notifier: Notifier) -> Self {
        Self {
            profiles,
            archiver,
            notifier,
            in_flight: Mutex::new(()),
            max_backups: DEFAULT_MAX_BACKUPS,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_max_backups(mut self, keep: usize) -> Self {
        self.max_backups = keep.max(1);
        self
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Archives the logged in profile and the global settings file.
    ///
    /// Always resolves, exactly once. Errors are logged and reported as
    /// `Failed`. A call made while another backup is running waits for that
    /// backup and returns `Coalesced` without writing a second archive.
    pub async fn start_backup(&self, reason: BackupReason) -> BackupOutcome {
        let guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!(reason = reason.as_str(), "a backup is already running, waiting for it to finish");
                let _wait = self.in_flight.lock().await;
                return BackupOutcome::Coalesced;
            }
        };

        info!(reason = reason.as_str(), "starting backup");
        let now = Local::now();
        let mut record = BackupRecord::new(reason, now, PathBuf::new());
        record.archive_path = self.profiles.data().backups_dir().join(self.archive_name(&record));

        let outcome = match self.write_archive(&record).await {
            Ok(()) => {
                record.completed = true;
                self.after_success(&record).await;
                BackupOutcome::Completed(record)
            }
            Err(e) => {
                error!(error = %e, reason = reason.as_str(), "backup failed");
                let _ = fs::remove_file(&record.archive_path).await;
                BackupOutcome::Failed {
                    record,
                    error: e.to_string(),
                }
            }
        };
        drop(guard);
        outcome
    }

    /// Starts a scheduled backup if none was taken today.
    pub async fn once_a_day_check(&self) -> Option<BackupOutcome> {
        let last = self.last_backup().await;
        if is_backup_due_today(last.as_ref(), &Local::now()) {
            Some(self.start_backup(BackupReason::Scheduled).await)
        } else {
            debug!("already backed up today");
            None
        }
    }

    pub async fn last_backup(&self) -> Option<DateTime<Local>> {
        let raw: Option<String> = match read_typed(&**self.profiles.settings(), LAST_BACKUP_DATE).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unreadable last backup date");
                None
            }
        };
        raw.and_then(|s| match DateTime::parse_from_rfc3339(&s) {
            Ok(dt) => Some(dt.with_timezone(&Local)),
            Err(e) => {
                warn!(value = %s, error = %e, "unparseable last backup date");
                None
            }
        })
    }

    pub fn archive_name(&self, record: &BackupRecord) -> String {
        let id = record.id.simple().to_string();
        format!(
            "backup_{}_v{}_{}_{}.{ARCHIVE_EXT}",
            record.created_at.format("%Y%m%d-%H%M%S"),
            self.app_version,
            record.reason.as_str(),
            &id[..8],
        )
    }

    async fn write_archive(&self, record: &BackupRecord) -> Result<(), CoreError> {
        let data = self.profiles.data();
        let profile = self.profiles.resolve_logged_in_profile().await?;
        data.make_dir(&data.backups_dir()).await?;

        let mut sources = Vec::new();
        for path in [data.profile_dir(profile), data.global_settings_file()] {
            if data.exists(&path).await {
                sources.push(path);
            }
        }
        let request = ArchiveRequest {
            base: data.root().to_path_buf(),
            sources,
            dest: record.archive_path.clone(),
        };
        self.archiver.archive(&request).await
    }

    async fn after_success(&self, record: &BackupRecord) {
        info!(path = %record.archive_path.display(), "backup complete");
        if let Err(e) = self
            .profiles
            .settings()
            .set(LAST_BACKUP_DATE, json!(record.created_at.to_rfc3339()))
            .await
        {
            warn!(error = %e, "could not record last backup date");
        }
        match prune_backups(&self.profiles.data().backups_dir(), self.max_backups).await {
            Ok(0) => {}
            Ok(n) => debug!(removed = n, "pruned old backups"),
            Err(e) => warn!(error = %e, "could not prune old backups"),
        }
        self.notifier.emit(AppEvent::BackupComplete {
            manual: record.reason.is_manual(),
        });
    }
}

/// Keeps the newest `keep` automatic archives in `dir`. Manual backups are
/// never pruned. Returns how many files were removed.
pub async fn prune_backups(dir: &Path, keep: usize) -> Result<usize, CoreError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| CoreError::io(format!("read {}", dir.display()), e))?;
    let mut auto = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::io(format!("read {}", dir.display()), e))?
    {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.extension().and_then(|s| s.to_str()) != Some(ARCHIVE_EXT) || name.contains(MANUAL_MARK) {
            continue;
        }
        let modified = entry.metadata().await.and_then(|m| m.modified()).ok();
        auto.push((modified, name, path));
    }
    if auto.len() <= keep {
        return Ok(0);
    }
    // Oldest first; the timestamp in the name breaks mtime ties.
    auto.sort();
    let excess = auto.len() - keep;
    let mut removed = 0;
    for (_, _, path) in auto.into_iter().take(excess) {
        if fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
