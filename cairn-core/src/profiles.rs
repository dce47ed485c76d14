//! Profile lifecycle: provisioning, login resolution, switching and the
//! deferred deletion that only runs at shutdown.

use crate::data_access::DataAccess;
use crate::settings::{
    read_typed, SettingsStore, ACTIVE_PROFILES, DELETE_PROFILE, LOGGED_IN_PROFILE, PROFILES,
};
use crate::{
    CoreError, Profile, ProfileId, ProfilesRecord, DEFAULT_PROFILE_ID, HOTKEYS_FILE,
    PROFILE_SUBFOLDERS,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What `ensure_default_layout` had to fix. All zeros/false on a healthy tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayoutReport {
    pub created_dirs: usize,
    pub created_files: usize,
    pub reset_active_list: bool,
    pub repaired_logged_in: bool,
    /// Active list entries that were not profile ids.
    pub dropped_entries: usize,
}

impl LayoutReport {
    pub fn is_noop(&self) -> bool {
        *self == LayoutReport::default()
    }
}

pub struct ProfileManager {
    settings: Arc<dyn SettingsStore>,
    data: DataAccess,
    // Every read-modify-write of the profiles record happens under this lock.
    write_lock: Mutex<()>,
}

impl ProfileManager {
    pub fn new(settings: Arc<dyn SettingsStore>, data: DataAccess) -> Self {
        Self {
            settings,
            data,
            write_lock: Mutex::new(()),
        }
    }

    pub fn data(&self) -> &DataAccess {
        &self.data
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    /// Makes sure the profiles/backups folders and every active profile's
    /// folder structure exist. Rebuilds a missing, corrupt or empty active
    /// list with the default profile. Never removes anything.
    pub async fn ensure_default_layout(&self) -> Result<LayoutReport, CoreError> {
        let _guard = self.write_lock.lock().await;
        info!("ensuring default folders and files exist for all profiles");
        let mut report = LayoutReport::default();

        for dir in [self.data.profiles_dir(), self.data.backups_dir()] {
            if self.data.make_dir(&dir).await? {
                info!(path = %dir.display(), "folder was missing, created it");
                report.created_dirs += 1;
            }
        }

        let mut record = match self.load_record_lenient().await {
            Ok((r, dropped)) if !r.active_profiles.is_empty() => {
                if dropped > 0 {
                    warn!(dropped, kept = r.active_profiles.len(), "cleaned invalid entries from the active profile list");
                    report.dropped_entries = dropped;
                }
                r
            }
            Ok(_) => {
                warn!(default = %DEFAULT_PROFILE_ID, "active profile list is empty, restoring default profile");
                report.reset_active_list = true;
                default_record()
            }
            Err(CoreError::Configuration(msg)) => {
                warn!(%msg, default = %DEFAULT_PROFILE_ID, "profile settings missing or corrupt, restoring default profile");
                report.reset_active_list = true;
                default_record()
            }
            Err(e) => return Err(e),
        };

        match record.logged_in_profile {
            Some(id) if record.is_active(id) => debug!(profile = %id, "last logged in profile is still active"),
            Some(id) => {
                info!(stale = %id, "last logged in profile is no longer active, switching to an active one");
                record.logged_in_profile = record.active_profiles.first().copied();
                report.repaired_logged_in = true;
            }
            None => {
                info!("no logged in profile recorded, selecting the first active one");
                record.logged_in_profile = record.active_profiles.first().copied();
                report.repaired_logged_in = true;
            }
        }
        if report.reset_active_list || report.repaired_logged_in || report.dropped_entries > 0 {
            self.store_record(&record).await?;
        }

        for id in &record.active_profiles {
            self.provision(*id, &mut report).await?;
        }
        info!(?report, "finished verifying default folders and files");
        Ok(report)
    }

    /// Logged in profile, falling back to (and persisting) the first active
    /// one when the stored id is missing or stale.
    pub async fn resolve_logged_in_profile(&self) -> Result<ProfileId, CoreError> {
        let _guard = self.write_lock.lock().await;
        let record = self.load_record().await?;
        let Some(first) = record.active_profiles.first().copied() else {
            return Err(CoreError::Configuration("no active profiles".into()));
        };
        match record.logged_in_profile {
            Some(id) if record.is_active(id) => Ok(id),
            stale => {
                info!(stale = ?stale.map(|p| p.0), profile = %first, "logged in profile not active, falling back to first active profile");
                self.settings.set(LOGGED_IN_PROFILE, json!(first)).await?;
                Ok(first)
            }
        }
    }

    /// Queues `id` for removal at the next clean shutdown. Only one profile
    /// can be queued; a later call replaces the earlier marker.
    pub async fn mark_for_deletion(&self, id: ProfileId) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let record = self.load_record().await?;
        if !record.is_active(id) {
            return Err(CoreError::InvalidProfile(id));
        }
        if let Some(previous) = record.delete_profile.filter(|p| *p != id) {
            warn!(%previous, "replacing pending deletion marker");
        }
        self.settings.set(DELETE_PROFILE, json!(id)).await?;
        warn!(profile = %id, "profile marked for deletion, it will be removed at shutdown");
        Ok(())
    }

    /// Removes the profile queued by `mark_for_deletion`. Shutdown only:
    /// the running process may still hold files inside that folder.
    ///
    /// The folder goes first, then the record is rewritten in one write.
    /// If the record write fails the marker survives and the next shutdown
    /// retries; removing an already missing folder is a no-op.
    pub async fn process_deferred_deletion(&self) -> Result<Option<ProfileId>, CoreError> {
        let _guard = self.write_lock.lock().await;
        let marker: Option<ProfileId> = match read_typed(&*self.settings, DELETE_PROFILE).await {
            Ok(m) => m,
            Err(CoreError::Configuration(msg)) => {
                warn!(%msg, "unreadable deletion marker, clearing it");
                self.settings.delete(DELETE_PROFILE).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(id) = marker else {
            debug!("no profile is queued for deletion");
            return Ok(None);
        };

        let record = self.load_record().await?;
        if !record.is_active(id) {
            warn!(profile = %id, "deletion marker names an inactive profile, clearing it");
            self.settings.delete(DELETE_PROFILE).await?;
            return Ok(None);
        }

        let profile = self.profile(&record, id);
        warn!(profile = %id, path = %profile.dir.display(), "profile is marked for deletion, removing it now");
        if let Err(e) = self.data.remove_profile_tree(&profile).await {
            error!(profile = %id, error = %e, "could not remove profile folder, will retry at next shutdown");
            return Err(e);
        }

        let next = record.without(id);
        if let Err(e) = self.store_record(&next).await {
            error!(profile = %id, error = %e, "profile folder removed but settings were not updated, will retry at next shutdown");
            return Err(e);
        }
        warn!(profile = %id, logged_in = ?next.logged_in_profile.map(|p| p.0), "successfully deleted profile");
        Ok(Some(id))
    }

    /// Persists `id` as the logged in profile. Reloading state is up to the caller.
    pub async fn switch_profile(&self, id: ProfileId) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let record = self.load_record().await?;
        if !record.is_active(id) {
            return Err(CoreError::InvalidProfile(id));
        }
        self.settings.set(LOGGED_IN_PROFILE, json!(id)).await?;
        info!(profile = %id, "switched logged in profile");
        Ok(())
    }

    pub async fn create_profile(&self) -> Result<Profile, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_record().await?;
        let id = record
            .next_id()
            .ok_or_else(|| CoreError::Configuration("no profile id left above the largest active id".into()))?;
        record.active_profiles.push(id);
        self.store_record(&record).await?;

        let mut report = LayoutReport::default();
        self.provision(id, &mut report).await?;
        info!(profile = %id, "created profile");
        Ok(self.profile(&record, id))
    }

    pub async fn profiles(&self) -> Result<Vec<Profile>, CoreError> {
        let record = self.load_record().await?;
        Ok(record
            .active_profiles
            .iter()
            .map(|id| self.profile(&record, *id))
            .collect())
    }

    pub async fn record(&self) -> Result<ProfilesRecord, CoreError> {
        self.load_record().await
    }

    /// Path inside the logged in profile's folder.
    pub async fn path_in_profile(&self, rel: &str) -> Result<PathBuf, CoreError> {
        let id = self.resolve_logged_in_profile().await?;
        Ok(self.data.profile_dir(id).join(rel.trim_start_matches('/')))
    }

    fn profile(&self, record: &ProfilesRecord, id: ProfileId) -> Profile {
        Profile {
            id,
            state: record.state_of(id),
            dir: self.data.profile_dir(id),
        }
    }

    async fn provision(&self, id: ProfileId, report: &mut LayoutReport) -> Result<(), CoreError> {
        let dir = self.data.profile_dir(id);
        if self.data.make_dir(&dir).await? {
            info!(profile = %id, "no folder for profile, created one");
            report.created_dirs += 1;
        }
        if self.data.copy_default_config(HOTKEYS_FILE, &dir).await? {
            info!(profile = %id, "hotkeys file missing, copied the default one");
            report.created_files += 1;
        }
        for sub in PROFILE_SUBFOLDERS {
            if self.data.make_dir(&dir.join(sub)).await? {
                info!(profile = %id, folder = sub, "profile folder was missing, created it");
                report.created_dirs += 1;
            }
        }
        Ok(())
    }

    async fn load_record(&self) -> Result<ProfilesRecord, CoreError> {
        self.load_record_lenient().await.map(|(record, _)| record)
    }

    /// Skips active list entries that are not profile ids, one by one, and
    /// returns how many were dropped.
    async fn load_record_lenient(&self) -> Result<(ProfilesRecord, usize), CoreError> {
        let raw: Vec<Value> = read_typed(&*self.settings, ACTIVE_PROFILES)
            .await?
            .ok_or_else(|| CoreError::Configuration("active profile list is missing".into()))?;
        let mut active_profiles = Vec::with_capacity(raw.len());
        let mut dropped = 0;
        for entry in raw {
            match serde_json::from_value::<ProfileId>(entry.clone()) {
                Ok(id) if !active_profiles.contains(&id) => active_profiles.push(id),
                Ok(id) => debug!(profile = %id, "duplicate entry in active profile list"),
                Err(_) => {
                    warn!(%entry, "ignoring entry in active profile list that is not a profile id");
                    dropped += 1;
                }
            }
        }
        let logged_in_profile = self.read_optional_id(LOGGED_IN_PROFILE).await?;
        let delete_profile = self.read_optional_id(DELETE_PROFILE).await?;
        Ok((
            ProfilesRecord {
                active_profiles,
                logged_in_profile,
                delete_profile,
            },
            dropped,
        ))
    }

    async fn read_optional_id(&self, path: &str) -> Result<Option<ProfileId>, CoreError> {
        match read_typed(&*self.settings, path).await {
            Ok(v) => Ok(v),
            Err(CoreError::Configuration(msg)) => {
                warn!(%msg, "ignoring unreadable profile id");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn store_record(&self, record: &ProfilesRecord) -> Result<(), CoreError> {
        let value = serde_json::to_value(record).map_err(|e| CoreError::Storage(e.to_string()))?;
        self.settings.set(PROFILES, value).await
    }
}

fn default_record() -> ProfilesRecord {
    ProfilesRecord {
        active_profiles: vec![DEFAULT_PROFILE_ID],
        logged_in_profile: None,
        delete_profile: None,
    }
}
