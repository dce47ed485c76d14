use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use cairn_core::{ApiServer, CoreError};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api::routes::{
    create_profile, delete_profile, list_profiles, post_backup, status, switch_profile, AppState,
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/profiles", get(list_profiles).post(create_profile))
        .route("/profiles/:id", axum::routing::delete(delete_profile))
        .route("/profiles/:id/switch", post(switch_profile))
        .route("/backups", post(post_backup))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Local HTTP API, started as the last startup phase.
pub struct HttpApi {
    addr: SocketAddr,
    state: Arc<AppState>,
}

impl HttpApi {
    pub fn new(addr: SocketAddr, state: Arc<AppState>) -> Self {
        Self { addr, state }
    }
}

#[async_trait]
impl ApiServer for HttpApi {
    async fn start(&self) -> Result<(), CoreError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| CoreError::io(format!("bind {}", self.addr), e))?;
        let app = router(self.state.clone());
        info!(addr = %self.addr, "api listening");
        // Lives until the runtime is dropped after shutdown.
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                error!(error = %e, "api server stopped");
            }
        });
        Ok(())
    }
}
