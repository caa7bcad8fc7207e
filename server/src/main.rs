use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use git_cache_proxy::api::{self, AppState};
use git_cache_proxy::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::loader::load_with_discovery()?;

    std::fs::create_dir_all(&config.data_root).with_context(|| {
        format!(
            "failed to create mirror root directory: {}",
            config.data_root.display()
        )
    })?;

    let state = AppState::from_config(&config);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal.cancel();
        }
    });

    api::run_api(&config, state, shutdown).await
}
