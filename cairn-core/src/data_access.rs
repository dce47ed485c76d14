use crate::{CoreError, Profile, ProfileId};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

pub const PROFILES_DIR: &str = "profiles";
pub const BACKUPS_DIR: &str = "backups";
pub const DEFAULTS_DIR: &str = "defaults";
pub const GLOBAL_SETTINGS_FILE: &str = "global-settings.json";
pub const OVERLAY_PORT_FILE: &str = "overlay/port.js";

/// Resolves and creates everything under the user data root.
#[derive(Clone, Debug)]
pub struct DataAccess {
    root: PathBuf,
    defaults_dir: PathBuf,
}

impl DataAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let defaults_dir = root.join(DEFAULTS_DIR);
        Self { root, defaults_dir }
    }

    /// Directory holding packaged default config files (e.g. `hotkeys.json`).
    pub fn with_defaults_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.defaults_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel.trim_start_matches('/'))
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join(PROFILES_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn global_settings_file(&self) -> PathBuf {
        self.root.join(GLOBAL_SETTINGS_FILE)
    }

    pub fn profile_dir(&self, id: ProfileId) -> PathBuf {
        self.profiles_dir().join(id.to_string())
    }

    /// Creates the data root and checks it accepts writes.
    pub async fn ensure_root(&self) -> Result<(), CoreError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CoreError::io(format!("create {}", self.root.display()), e))?;
        let probe = self.root.join(".write-probe");
        fs::write(&probe, b"ok")
            .await
            .map_err(|e| CoreError::io(format!("{} is not writable", self.root.display()), e))?;
        if let Err(e) = fs::remove_file(&probe).await {
            warn!(path = %probe.display(), error = %e, "could not remove write probe");
        }
        Ok(())
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok()
    }

    /// Returns `true` when the directory had to be created.
    pub async fn make_dir(&self, path: &Path) -> Result<bool, CoreError> {
        if self.exists(path).await {
            return Ok(false);
        }
        fs::create_dir_all(path)
            .await
            .map_err(|e| CoreError::io(format!("create {}", path.display()), e))?;
        debug!(path = %path.display(), "created directory");
        Ok(true)
    }

    /// Copies the packaged default `name` into `dest_dir` unless it already
    /// exists there. Without a packaged template an empty JSON object is
    /// written. Returns `true` when a file was written.
    pub async fn copy_default_config(&self, name: &str, dest_dir: &Path) -> Result<bool, CoreError> {
        let dest = dest_dir.join(name);
        if self.exists(&dest).await {
            return Ok(false);
        }
        let template = self.defaults_dir.join(name);
        let contents = match fs::read(&template).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => b"{}".to_vec(),
            Err(e) => return Err(CoreError::io(format!("read {}", template.display()), e)),
        };
        fs::write(&dest, contents)
            .await
            .map_err(|e| CoreError::io(format!("write {}", dest.display()), e))?;
        Ok(true)
    }

    /// Recursively removes a profile folder. Only profiles already marked
    /// for deletion are accepted. A folder that is already gone is not an
    /// error; returns whether anything was removed.
    pub async fn remove_profile_tree(&self, profile: &Profile) -> Result<bool, CoreError> {
        if !profile.is_pending_deletion() {
            return Err(CoreError::InvalidProfile(profile.id));
        }
        match fs::remove_dir_all(&profile.dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::io(format!("remove {}", profile.dir.display()), e)),
        }
    }

    pub async fn write_overlay_port(&self, port: u16) -> Result<(), CoreError> {
        let file = self.path(OVERLAY_PORT_FILE);
        if let Some(parent) = file.parent() {
            self.make_dir(parent).await?;
        }
        fs::write(&file, format!("window.WEBSOCKET_PORT = {port}"))
            .await
            .map_err(|e| CoreError::io(format!("write {}", file.display()), e))?;
        info!(port, "set overlay port");
        Ok(())
    }
}
