use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use guildflow_backend::config::Config;
use guildflow_backend::services::EventBus;
use guildflow_backend::store::{JsonFileStore, WorkflowStore};
use guildflow_backend::workflows::ActionHandlerRegistry;
use guildflow_backend::{app_router, AppState, WorkflowEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Option<Arc<dyn WorkflowStore>> = match &config.workflow_store_path {
        Some(path) => Some(Arc::new(JsonFileStore::new(path))),
        None => {
            tracing::warn!("WORKFLOW_STORE_PATH not set; workflows will not survive a restart");
            None
        }
    };

    let event_bus = Arc::new(EventBus::new());
    let handlers = ActionHandlerRegistry::with_collaborators(event_bus);

    let engine = Arc::new(WorkflowEngine::new(handlers, config.engine.clone(), store));
    engine.reload_workflows().await?;

    let shutdown = CancellationToken::new();
    let sweeper = engine.spawn_retention_sweeper(shutdown.clone());

    let app = app_router(Arc::new(AppState { engine }));

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    sweeper.await.ok();

    Ok(())
}
