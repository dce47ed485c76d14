use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use cairn_core::{
    switch_and_notify, BackupReason, BackupScheduler, CoreError, Notifier, ProfileId,
    ProfileManager,
};
use std::sync::Arc;
use tracing::warn;

use crate::api::dto::{BackupOut, ProfileOut, StatusOut};

#[derive(Clone)]
pub struct AppState {
    pub profiles: Arc<ProfileManager>,
    pub backups: Arc<BackupScheduler>,
    pub notifier: Notifier,
}

fn status_for(e: CoreError) -> StatusCode {
    match e {
        CoreError::InvalidProfile(_) => StatusCode::BAD_REQUEST,
        other => {
            warn!(error = %other, "api request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn status(State(st): State<Arc<AppState>>) -> Result<Json<StatusOut>, StatusCode> {
    let record = st.profiles.record().await.map_err(status_for)?;
    Ok(Json(StatusOut {
        data_root: st.profiles.data().root().to_path_buf(),
        logged_in: record.logged_in_profile,
        active_profiles: record.active_profiles,
        pending_deletion: record.delete_profile,
        last_backup: st.backups.last_backup().await,
    }))
}

pub async fn list_profiles(State(st): State<Arc<AppState>>) -> Result<Json<Vec<ProfileOut>>, StatusCode> {
    let record = st.profiles.record().await.map_err(status_for)?;
    let profiles = st.profiles.profiles().await.map_err(status_for)?;
    Ok(Json(
        profiles
            .into_iter()
            .map(|p| ProfileOut::new(p, record.logged_in_profile))
            .collect(),
    ))
}

pub async fn create_profile(
    State(st): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ProfileOut>), StatusCode> {
    let p = st.profiles.create_profile().await.map_err(status_for)?;
    Ok((StatusCode::CREATED, Json(ProfileOut::new(p, None))))
}

pub async fn switch_profile(
    State(st): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<StatusCode, StatusCode> {
    switch_and_notify(&st.profiles, &st.notifier, ProfileId(id))
        .await
        .map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deferred: the folder goes away at the next shutdown.
pub async fn delete_profile(
    State(st): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<StatusCode, StatusCode> {
    st.profiles
        .mark_for_deletion(ProfileId(id))
        .await
        .map_err(status_for)?;
    Ok(StatusCode::ACCEPTED)
}

/// Requested by the user, so always manual and never pruned.
pub async fn post_backup(State(st): State<Arc<AppState>>) -> Json<BackupOut> {
    Json(st.backups.start_backup(BackupReason::Manual).await.into())
}
