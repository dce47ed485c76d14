use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub type BackupId = Uuid;

/// Fallback profile id used when the settings record has to be rebuilt.
/// Kept for compatibility with single-profile data directories.
pub const DEFAULT_PROFILE_ID: ProfileId = ProfileId(1);

/// Files and folders every profile directory must contain.
pub const HOTKEYS_FILE: &str = "hotkeys.json";
pub const PROFILE_SUBFOLDERS: [&str; 5] = ["scripts", "controls", "logs", "chat", "live-events"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub u32);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfileId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(ProfileId)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileState {
    Active,
    /// Folder still on disk and possibly in use; removed at the next clean shutdown.
    PendingDeletion,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: ProfileId,
    pub state: ProfileState,
    pub dir: PathBuf,
}

impl Profile {
    pub fn is_pending_deletion(&self) -> bool {
        self.state == ProfileState::PendingDeletion
    }
}

/// The `profiles` section of the global settings record.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilesRecord {
    pub active_profiles: Vec<ProfileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in_profile: Option<ProfileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_profile: Option<ProfileId>,
}

impl ProfilesRecord {
    pub fn is_active(&self, id: ProfileId) -> bool {
        self.active_profiles.contains(&id)
    }

    /// `None` once the largest active id is `u32::MAX`.
    pub fn next_id(&self) -> Option<ProfileId> {
        match self.active_profiles.iter().max() {
            Some(max) => max.0.checked_add(1).map(ProfileId),
            None => Some(DEFAULT_PROFILE_ID),
        }
    }

    pub fn state_of(&self, id: ProfileId) -> ProfileState {
        if self.delete_profile == Some(id) {
            ProfileState::PendingDeletion
        } else {
            ProfileState::Active
        }
    }

    /// Record after `id` has been physically removed.
    pub fn without(&self, id: ProfileId) -> ProfilesRecord {
        let active_profiles: Vec<ProfileId> = self
            .active_profiles
            .iter()
            .copied()
            .filter(|p| *p != id)
            .collect();
        let logged_in_profile = match self.logged_in_profile {
            Some(current) if current != id && active_profiles.contains(&current) => Some(current),
            _ => active_profiles.first().copied(),
        };
        ProfilesRecord {
            active_profiles,
            logged_in_profile,
            delete_profile: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackupReason {
    Scheduled,
    Manual,
    PreUpdate,
    OnExit,
}

impl BackupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupReason::Scheduled => "scheduled",
            BackupReason::Manual => "manual",
            BackupReason::PreUpdate => "pre-update",
            BackupReason::OnExit => "on-exit",
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, BackupReason::Manual)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub created_at: DateTime<Local>,
    pub reason: BackupReason,
    pub completed: bool,
    pub archive_path: PathBuf,
}

impl BackupRecord {
    pub fn new(reason: BackupReason, created_at: DateTime<Local>, archive_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            reason,
            completed: false,
            archive_path,
        }
    }
}

/// Result of a backup request. Always produced, whatever happened.
#[derive(Clone, Debug)]
pub enum BackupOutcome {
    Completed(BackupRecord),
    Failed { record: BackupRecord, error: String },
    /// Another backup was in flight; this call waited for it instead of archiving again.
    Coalesced,
}

impl BackupOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BackupOutcome::Completed(_))
    }
}
