use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod handlers;
pub mod services;
pub mod store;
pub mod workflows;

pub use error::{ApiError, ApiResult, EngineError, EngineResult};
pub use workflows::WorkflowEngine;

pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Guildflow Workflow Engine API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", handlers::workflow_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
