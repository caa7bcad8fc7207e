//! HTTP surface: application state, routing, and the serve loop.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::git_http::{legacy, v2};
use crate::repository::{LegacyCaches, MirrorStorage};

#[derive(Clone)]
pub struct AppState {
    pub storage: MirrorStorage,
    pub caches: LegacyCaches,
    pub git_semaphore: Arc<Semaphore>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        AppState {
            storage: MirrorStorage::new(
                config.git_path.clone(),
                config.data_root.clone(),
                config.namespaces.clone(),
            ),
            caches: LegacyCaches::new(),
            git_semaphore: Arc::new(Semaphore::new(config.max_git_processes)),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/git/{namespace}/{repo}/info/refs", get(v2::info_refs))
        .route("/git/{namespace}/{repo}/git-upload-pack", post(v2::upload_pack))
        .route("/github.com/{org}/{repo}/info/refs", get(legacy::info_refs))
        .route("/github.com/{org}/{repo}/git-upload-pack", post(legacy::upload_pack))
        .with_state(state)
}

pub async fn run_api(config: &Config, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
