//! Ordered startup and shutdown of the application.
//!
//! Startup: verify folders, connect databases, open the window, schedule
//! the daily backup, start the API. Only a folder verification failure
//! stops startup; later phases log and carry on.
//!
//! Shutdown: unregister hotkeys, optional backup, mark users offline,
//! process the deferred profile deletion, exit. Each step is awaited before
//! the next, so exit never races a running backup.

use crate::backup::BackupScheduler;
use crate::events::{AppEvent, Notifier};
use crate::profiles::ProfileManager;
use crate::settings::{read_typed, JUST_UPDATED};
use crate::{BackupOutcome, BackupReason, CoreError, ProfileId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Persists the new logged in profile, then tells the front end to reload.
pub async fn switch_and_notify(
    profiles: &ProfileManager,
    notifier: &Notifier,
    id: ProfileId,
) -> Result<(), CoreError> {
    profiles.switch_profile(id).await?;
    notifier.emit(AppEvent::ProfileSwitched { profile: id });
    Ok(())
}

#[async_trait]
pub trait UserDatabase: Send + Sync {
    async fn connect(&self) -> Result<(), CoreError>;
    /// Returns how many users were flipped to offline.
    async fn set_all_users_offline(&self) -> Result<u64, CoreError>;
}

/// The windowing side of the app.
#[async_trait]
pub trait Shell: Send + Sync {
    async fn open_window(&self) -> Result<(), CoreError>;
    fn install_script_context(&self, ctx: ScriptContext);
    async fn unregister_hotkeys(&self) -> Result<(), CoreError>;
}

#[async_trait]
pub trait ApiServer: Send + Sync {
    async fn start(&self) -> Result<(), CoreError>;
}

/// Handed to user scripts instead of process globals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScriptContext {
    pub profile: ProfileId,
    pub scripts_dir: PathBuf,
    pub app_version: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartupPhase {
    VerifyFolders,
    ConnectDatabases,
    OpenWindow,
    ScheduleBackup,
    StartApi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShutdownStep {
    UnregisterHotkeys,
    Backup,
    MarkUsersOffline,
    ProcessDeferredDeletion,
    Exit,
}

#[derive(Clone, Debug, Default)]
pub struct LifecycleOptions {
    pub backup_on_exit: bool,
    pub backup_before_updates: bool,
    pub overlay_port: Option<u16>,
    pub app_version: String,
}

#[derive(Clone, Debug, Default)]
pub struct StartupReport {
    pub profile: Option<ProfileId>,
    pub completed: Vec<StartupPhase>,
    pub failed: Vec<(StartupPhase, String)>,
}

#[derive(Clone, Debug, Default)]
pub struct ShutdownReport {
    pub steps: Vec<ShutdownStep>,
    pub failed: Vec<(ShutdownStep, String)>,
    pub backup: Option<BackupOutcome>,
    pub deleted_profile: Option<ProfileId>,
}

pub struct Collaborators {
    pub users: Arc<dyn UserDatabase>,
    pub shell: Arc<dyn Shell>,
    pub api: Arc<dyn ApiServer>,
}

pub struct Lifecycle {
    profiles: Arc<ProfileManager>,
    backups: Arc<BackupScheduler>,
    notifier: Notifier,
    users: Arc<dyn UserDatabase>,
    shell: Arc<dyn Shell>,
    api: Arc<dyn ApiServer>,
    options: LifecycleOptions,
    scheduled_backup: Mutex<Option<JoinHandle<Option<BackupOutcome>>>>,
}

impl Lifecycle {
    pub fn new(
        profiles: Arc<ProfileManager>,
        backups: Arc<BackupScheduler>,
        notifier: Notifier,
        collaborators: Collaborators,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            profiles,
            backups,
            notifier,
            users: collaborators.users,
            shell: collaborators.shell,
            api: collaborators.api,
            options,
            scheduled_backup: Mutex::new(None),
        }
    }

    pub fn profiles(&self) -> &Arc<ProfileManager> {
        &self.profiles
    }

    pub fn backups(&self) -> &Arc<BackupScheduler> {
        &self.backups
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn startup(&self) -> Result<StartupReport, CoreError> {
        info!("starting up");
        let mut report = StartupReport::default();

        let profile = match self.verify_folders().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "could not verify data folders, aborting startup");
                return Err(CoreError::FatalStartup(e.to_string()));
            }
        };
        report.profile = Some(profile);
        report.completed.push(StartupPhase::VerifyFolders);

        self.run_phase(&mut report, StartupPhase::ConnectDatabases, self.users.connect())
            .await;

        if self
            .run_phase(&mut report, StartupPhase::OpenWindow, self.shell.open_window())
            .await
        {
            match self.script_context().await {
                Ok(ctx) => self.shell.install_script_context(ctx),
                Err(e) => warn!(error = %e, "no script context for this session"),
            }
        }

        let backups = self.backups.clone();
        let handle = tokio::spawn(async move { backups.once_a_day_check().await });
        *self.scheduled_backup.lock() = Some(handle);
        report.completed.push(StartupPhase::ScheduleBackup);

        self.run_phase(&mut report, StartupPhase::StartApi, self.api.start())
            .await;

        info!(profile = %profile, failed = report.failed.len(), "startup finished");
        Ok(report)
    }

    pub async fn shutdown(&self) -> ShutdownReport {
        info!("shutting down");
        let mut report = ShutdownReport::default();

        if let Err(e) = self.shell.unregister_hotkeys().await {
            warn!(error = %e, "could not unregister hotkeys");
            report.failed.push((ShutdownStep::UnregisterHotkeys, e.to_string()));
        }
        report.steps.push(ShutdownStep::UnregisterHotkeys);

        // A scheduled backup may still be running; never exit underneath it.
        let pending = self.scheduled_backup.lock().take();
        if let Some(handle) = pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduled backup task did not finish cleanly");
            }
        }
        if self.options.backup_on_exit {
            let outcome = self.backups.start_backup(BackupReason::OnExit).await;
            if let BackupOutcome::Failed { error, .. } = &outcome {
                report.failed.push((ShutdownStep::Backup, error.clone()));
            }
            report.backup = Some(outcome);
            report.steps.push(ShutdownStep::Backup);
        }

        match self.users.set_all_users_offline().await {
            Ok(n) => info!(users = n, "marked users offline"),
            Err(e) => {
                warn!(error = %e, "could not mark users offline");
                report.failed.push((ShutdownStep::MarkUsersOffline, e.to_string()));
            }
        }
        report.steps.push(ShutdownStep::MarkUsersOffline);

        match self.profiles.process_deferred_deletion().await {
            Ok(deleted) => report.deleted_profile = deleted,
            Err(e) => report.failed.push((ShutdownStep::ProcessDeferredDeletion, e.to_string())),
        }
        report.steps.push(ShutdownStep::ProcessDeferredDeletion);

        report.steps.push(ShutdownStep::Exit);
        warn!("this is the end of the shutdown process");
        report
    }

    /// Runs before an update is installed: optional backup, then flag the
    /// next start as post-update and tell the front end.
    pub async fn prepare_update(&self) -> Option<BackupOutcome> {
        let outcome = if self.options.backup_before_updates {
            Some(self.backups.start_backup(BackupReason::PreUpdate).await)
        } else {
            None
        };
        if let Err(e) = self.profiles.settings().set(JUST_UPDATED, json!(true)).await {
            warn!(error = %e, "could not record pending update");
        }
        info!("update ready to install");
        self.notifier.emit(AppEvent::UpdateDownloaded);
        outcome
    }

    pub async fn switch_profile(&self, id: ProfileId) -> Result<(), CoreError> {
        switch_and_notify(&self.profiles, &self.notifier, id).await
    }

    pub async fn script_context(&self) -> Result<ScriptContext, CoreError> {
        let profile = self.profiles.resolve_logged_in_profile().await?;
        Ok(ScriptContext {
            profile,
            scripts_dir: self.profiles.path_in_profile("scripts").await?,
            app_version: self.options.app_version.clone(),
        })
    }

    async fn verify_folders(&self) -> Result<ProfileId, CoreError> {
        let data = self.profiles.data();
        data.ensure_root().await?;
        self.profiles.ensure_default_layout().await?;
        let profile = self.profiles.resolve_logged_in_profile().await?;
        if let Some(port) = self.options.overlay_port {
            data.write_overlay_port(port).await?;
        }
        self.clear_just_updated().await;
        Ok(profile)
    }

    async fn clear_just_updated(&self) {
        let settings = self.profiles.settings();
        match read_typed::<bool>(&**settings, JUST_UPDATED).await {
            Ok(Some(true)) => {
                info!("first start after an update");
                if let Err(e) = settings.set(JUST_UPDATED, json!(false)).await {
                    warn!(error = %e, "could not clear update flag");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "unreadable update flag"),
        }
    }

    async fn run_phase<F>(&self, report: &mut StartupReport, phase: StartupPhase, fut: F) -> bool
    where
        F: Future<Output = Result<(), CoreError>>,
    {
        info!(?phase, "startup phase");
        match fut.await {
            Ok(()) => {
                report.completed.push(phase);
                true
            }
            Err(e) => {
                error!(?phase, error = %e, "startup phase failed, continuing");
                report.failed.push((phase, e.to_string()));
                false
            }
        }
    }
}
