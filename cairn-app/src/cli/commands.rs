use crate::api::routes::AppState;
use crate::api::server::HttpApi;
use crate::cli::opts::*;
use crate::config::AppConfig;
use crate::shell::HeadlessShell;

use anyhow::{bail, Context, Result};
use cairn_core::{
    BackupOutcome, BackupReason, BackupScheduler, Collaborators, DataAccess, Lifecycle,
    LifecycleOptions, Notifier, ProfileId, ProfileManager,
};
use cairn_json::paths::data_root;
use cairn_json::{JsonSettingsStore, ZipArchiver};
use cairn_sqlite::SqliteUserDb;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const USERS_DB: &str = "db/users.db";

pub struct AppContext {
    pub config: AppConfig,
    pub profiles: Arc<ProfileManager>,
    pub backups: Arc<BackupScheduler>,
    pub notifier: Notifier,
}

pub async fn run_cli(args: Cli) -> Result<()> {
    let config = AppConfig::load_or_default(args.config.as_deref())?;
    let ctx = open_context(&args, config).await?;
    match args.cmd.clone() {
        Command::Run => run_app(&ctx).await,
        Command::Profile(cmd) => profile_cmd(&ctx, cmd).await,
        Command::Backup => backup_cmd(&ctx).await,
        Command::PrepareUpdate => prepare_update_cmd(&ctx).await,
    }
}

pub async fn open_context(args: &Cli, config: AppConfig) -> Result<AppContext> {
    let root = args
        .data_dir
        .clone()
        .or_else(|| config.paths.data_dir.clone())
        .unwrap_or_else(data_root);
    let mut data = DataAccess::new(&root);
    if let Some(defaults) = &config.paths.defaults_dir {
        data = data.with_defaults_dir(defaults);
    }
    let store = JsonSettingsStore::open(data.global_settings_file())
        .await
        .with_context(|| format!("cannot open settings under {}", root.display()))?;

    let notifier = Notifier::new();
    let profiles = Arc::new(ProfileManager::new(Arc::new(store), data));
    let backups = Arc::new(
        BackupScheduler::new(profiles.clone(), Arc::new(ZipArchiver), notifier.clone())
            .with_max_backups(config.backups.max_backups)
            .with_app_version(APP_VERSION),
    );
    Ok(AppContext { config, profiles, backups, notifier })
}

pub fn build_lifecycle(ctx: &AppContext) -> Result<Lifecycle> {
    let addr: SocketAddr = ctx.config.api.addr.parse()?;
    let state = Arc::new(AppState {
        profiles: ctx.profiles.clone(),
        backups: ctx.backups.clone(),
        notifier: ctx.notifier.clone(),
    });
    let collaborators = Collaborators {
        users: Arc::new(SqliteUserDb::file(ctx.profiles.data().path(USERS_DB))),
        shell: Arc::new(HeadlessShell::new(ctx.notifier.clone())),
        api: Arc::new(HttpApi::new(addr, state)),
    };
    let options = LifecycleOptions {
        backup_on_exit: ctx.config.backups.on_exit,
        backup_before_updates: ctx.config.backups.before_updates,
        overlay_port: Some(ctx.config.overlay.websocket_port),
        app_version: APP_VERSION.to_string(),
    };
    Ok(Lifecycle::new(
        ctx.profiles.clone(),
        ctx.backups.clone(),
        ctx.notifier.clone(),
        collaborators,
        options,
    ))
}

async fn run_app(ctx: &AppContext) -> Result<()> {
    let lifecycle = build_lifecycle(ctx)?;
    let report = lifecycle.startup().await.context("startup aborted")?;
    for (phase, err) in &report.failed {
        eprintln!("warning: {phase:?} failed: {err}");
    }
    info!(api = %ctx.config.api.addr, "running, press Ctrl-C to quit");

    tokio::signal::ctrl_c().await?;

    let report = lifecycle.shutdown().await;
    for (step, err) in &report.failed {
        eprintln!("warning: {step:?} failed: {err}");
    }
    if let Some(id) = report.deleted_profile {
        println!("deleted profile {id}");
    }
    Ok(())
}

async fn profile_cmd(ctx: &AppContext, cmd: ProfileCmd) -> Result<()> {
    let profiles = &ctx.profiles;
    profiles.ensure_default_layout().await?;
    match cmd {
        ProfileCmd::List => {
            let logged_in = profiles.resolve_logged_in_profile().await?;
            for p in profiles.profiles().await? {
                let mark = if p.id == logged_in { "*" } else { "" };
                let state = if p.is_pending_deletion() { "pending-deletion" } else { "active" };
                println!("{}\t{}\t{}", p.id, state, mark);
            }
        }
        ProfileCmd::Create => {
            let p = profiles.create_profile().await?;
            println!("{}", p.id);
        }
        ProfileCmd::Switch { id } => {
            profiles.switch_profile(ProfileId(id)).await?;
            println!("Switched to profile {id}");
        }
        ProfileCmd::Delete { id } => {
            profiles.mark_for_deletion(ProfileId(id)).await?;
            println!("Profile {id} will be removed at the next shutdown");
        }
    }
    Ok(())
}

async fn backup_cmd(ctx: &AppContext) -> Result<()> {
    ctx.profiles.ensure_default_layout().await?;
    print_outcome(ctx.backups.start_backup(BackupReason::Manual).await)
}

async fn prepare_update_cmd(ctx: &AppContext) -> Result<()> {
    ctx.profiles.ensure_default_layout().await?;
    let lifecycle = build_lifecycle(ctx)?;
    match lifecycle.prepare_update().await {
        Some(outcome) => print_outcome(outcome)?,
        None => println!("Backups before updates are disabled"),
    }
    println!("Ready to install the update");
    Ok(())
}

fn print_outcome(outcome: BackupOutcome) -> Result<()> {
    match outcome {
        BackupOutcome::Completed(record) => {
            println!("{}", record.archive_path.display());
            Ok(())
        }
        BackupOutcome::Coalesced => {
            println!("A backup was already running");
            Ok(())
        }
        BackupOutcome::Failed { error, .. } => bail!("backup failed: {error}"),
    }
}
