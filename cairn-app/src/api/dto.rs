use cairn_core::{BackupOutcome, Profile, ProfileId, ProfileState};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
pub struct ProfileOut {
    pub id: ProfileId,
    pub state: ProfileState,
    pub dir: PathBuf,
    pub logged_in: bool,
}

impl ProfileOut {
    pub fn new(p: Profile, logged_in: Option<ProfileId>) -> Self {
        Self {
            logged_in: logged_in == Some(p.id),
            id: p.id,
            state: p.state,
            dir: p.dir,
        }
    }
}

#[derive(Serialize)]
pub struct StatusOut {
    pub data_root: PathBuf,
    pub logged_in: Option<ProfileId>,
    pub active_profiles: Vec<ProfileId>,
    pub pending_deletion: Option<ProfileId>,
    pub last_backup: Option<DateTime<Local>>,
}

#[derive(Serialize)]
pub struct BackupOut {
    pub outcome: &'static str,
    pub archive: Option<PathBuf>,
    pub error: Option<String>,
}

impl From<BackupOutcome> for BackupOut {
    fn from(o: BackupOutcome) -> Self {
        match o {
            BackupOutcome::Completed(record) => Self {
                outcome: "completed",
                archive: Some(record.archive_path),
                error: None,
            },
            BackupOutcome::Failed { record, error } => Self {
                outcome: "failed",
                archive: Some(record.archive_path),
                error: Some(error),
            },
            BackupOutcome::Coalesced => Self {
                outcome: "coalesced",
                archive: None,
                error: None,
            },
        }
    }
}
