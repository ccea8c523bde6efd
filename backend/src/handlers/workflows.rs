use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use guildflow_shared::{
    EngineStatistics, Execution, ExecutionReport, ExecutionStatus, ScopeId, TriggerType, Workflow,
    WorkflowDefinition, WorkflowFilter, WorkflowPatch,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiResult, EngineError};
use crate::workflows::{EventSource, TriggerEvent};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecutionHistoryQuery {
    pub status: Option<ExecutionStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub scope_id: Option<ScopeId>,
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Workflow definitions
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/workflows/:id",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/workflows/:id/execute", post(execute_workflow))
        .route("/workflows/:id/executions", get(list_workflow_executions))

        // Events and executions
        .route("/events/:trigger_type", post(dispatch_event))
        .route("/executions/:id", get(get_execution))
        .route("/executions/:id/cancel", post(cancel_execution))
        .route("/statistics", get(get_statistics))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<WorkflowFilter>,
) -> Json<Vec<Workflow>> {
    Json(state.engine.list_workflows(&filter).await)
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let id = state.engine.create_workflow(definition).await?;
    let workflow = state.engine.get_workflow(id).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.get_workflow(id).await?))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<WorkflowPatch>,
) -> ApiResult<Json<Value>> {
    let updated = state.engine.update_workflow(id, patch).await?;
    let workflow = state.engine.get_workflow(id).await?;
    Ok(Json(json!({
        "updated": updated,
        "workflow": workflow
    })))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let deleted = state.engine.delete_workflow(id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    // an empty body runs with an empty context; anything else must be valid JSON
    let context = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| EngineError::InvalidRequest(format!("Malformed JSON body: {}", e)))?
    };
    let execution_id = state.engine.execute_manually(id, context).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution_id })),
    ))
}

async fn list_workflow_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<ExecutionHistoryQuery>,
) -> ApiResult<Json<Vec<Execution>>> {
    state.engine.get_workflow(id).await?;
    let history = state
        .engine
        .get_execution_history(Some(id), params.status, params.limit)
        .await;
    Ok(Json(history))
}

async fn dispatch_event(
    State(state): State<Arc<AppState>>,
    Path(trigger_type): Path<String>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    // unrecognized types bind no workflows and start nothing
    let trigger_type = trigger_type
        .parse::<TriggerType>()
        .unwrap_or(TriggerType::Unknown);
    let event = TriggerEvent::new(trigger_type, payload, EventSource::Api);
    let event_id = event.event_id;

    let execution_ids = state.engine.process_event(event).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "event_id": event_id,
            "execution_ids": execution_ids
        })),
    )
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionReport>> {
    Ok(Json(state.engine.get_status(id).await?))
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let cancelled = state.engine.cancel(id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

async fn get_statistics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatisticsQuery>,
) -> Json<EngineStatistics> {
    Json(state.engine.statistics(params.scope_id).await)
}
