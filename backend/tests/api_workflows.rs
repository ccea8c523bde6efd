mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::*;
use guildflow_backend::{app_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let (engine, _bus) = bus_engine();
    app_router(Arc::new(AppState {
        engine: Arc::new(engine),
    }))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn welcome_body() -> Value {
    json!({
        "name": "Welcome",
        "scope_id": 1,
        "created_by": 7,
        "status": "active",
        "tags": ["onboarding"],
        "trigger": {
            "type": "member_joined",
            "conditions": [
                { "field": "is_bot", "operator": "equals", "value": false }
            ]
        },
        "actions": [
            {
                "id": "greet",
                "type": "send_message",
                "parameters": { "channel_id": "welcome", "content": "Welcome {{username}}!" }
            }
        ]
    })
}

#[tokio::test]
async fn test_health_check() {
    let (status, body) = send(&app(), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_create_get_and_list_workflows() {
    let app = app();

    let (status, created) = send(&app, "POST", "/api/v1/workflows", Some(welcome_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["version"], 1);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app, "GET", &format!("/api/v1/workflows/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Welcome");
    assert_eq!(fetched["trigger"]["type"], "member_joined");

    let (_, scoped) = send(&app, "GET", "/api/v1/workflows?scope_id=1&status=active", None).await;
    assert_eq!(scoped.as_array().unwrap().len(), 1);

    let (_, other_scope) = send(&app, "GET", "/api/v1/workflows?scope_id=2", None).await;
    assert!(other_scope.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_definition_is_unprocessable() {
    let mut body = welcome_body();
    body["name"] = json!("");
    body["actions"][0]["type"] = json!("launch_rocket");

    let (status, error) = send(&app(), "POST", "/api/v1/workflows", Some(body)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "INVALID_DEFINITION");
    assert!(error["details"]["name"].is_array());
    assert!(error["details"]["actions[0].type"].is_array());
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let app = app();
    let id = uuid::Uuid::new_v4();

    let (status, error) = send(&app, "GET", &format!("/api/v1/workflows/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "NOT_FOUND");

    let (status, _) = send(&app, "GET", &format!("/api/v1/executions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/api/v1/executions/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dispatch_event_and_track_execution() {
    let app = app();
    let (_, created) = send(&app, "POST", "/api/v1/workflows", Some(welcome_body())).await;
    let workflow_id = created["id"].as_str().unwrap().to_string();

    let (status, dispatched) = send(
        &app,
        "POST",
        "/api/v1/events/member_joined",
        Some(json!({ "scope_id": 1, "user_id": 42, "username": "ada", "is_bot": false })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let execution_ids = dispatched["execution_ids"].as_array().unwrap();
    assert_eq!(execution_ids.len(), 1);
    let execution_id = execution_ids[0].as_str().unwrap().to_string();

    let mut report = Value::Null;
    for _ in 0..50 {
        let (status, body) =
            send(&app, "GET", &format!("/api/v1/executions/{}", execution_id), None).await;
        assert_eq!(status, StatusCode::OK);
        report = body;
        if report["status"] != "running" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(report["status"], "completed");
    assert!(report["results"]["greet"]["message_id"].is_string());

    let (_, history) = send(
        &app,
        "GET",
        &format!("/api/v1/workflows/{}/executions?status=completed", workflow_id),
        None,
    )
    .await;
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (_, bots) = send(
        &app,
        "POST",
        "/api/v1/events/member_joined",
        Some(json!({ "user_id": 43, "is_bot": true })),
    )
    .await;
    assert!(bots["execution_ids"].as_array().unwrap().is_empty());

    let (status, unknown) =
        send(&app, "POST", "/api/v1/events/solar_eclipse", Some(json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(unknown["execution_ids"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_execution_endpoint() {
    let app = app();
    let (_, manual) = send(
        &app,
        "POST",
        "/api/v1/workflows",
        Some(json!({
            "name": "Escalate",
            "scope_id": 1,
            "created_by": 7,
            "trigger": { "type": "manual" },
            "actions": [
                { "id": "bump", "type": "change_priority",
                  "parameters": { "record_id": "{{ticket_id}}", "priority": "urgent" } }
            ]
        })),
    )
    .await;
    let manual_id = manual["id"].as_str().unwrap().to_string();

    let (status, started) = send(
        &app,
        "POST",
        &format!("/api/v1/workflows/{}/execute", manual_id),
        Some(json!({ "ticket_id": "t-7" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(started["execution_id"].is_string());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/workflows/{}/execute", manual_id))
        .header("content-type", "application/json")
        .body(Body::from("{ \"ticket_id\": "))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let error: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error["code"], "INVALID_REQUEST");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/workflows/{}/execute", manual_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, triggered) = send(&app, "POST", "/api/v1/workflows", Some(welcome_body())).await;
    let (status, error) = send(
        &app,
        "POST",
        &format!("/api/v1/workflows/{}/execute", triggered["id"].as_str().unwrap()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "MANUAL_EXECUTION_NOT_ALLOWED");
}

#[tokio::test]
async fn test_update_and_delete_workflow() {
    let app = app();
    let (_, created) = send(&app, "POST", "/api/v1/workflows", Some(welcome_body())).await;
    let uri = format!("/api/v1/workflows/{}", created["id"].as_str().unwrap());

    let (status, updated) = send(&app, "PUT", &uri, Some(json!({ "status": "paused" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["updated"], true);
    assert_eq!(updated["workflow"]["status"], "paused");
    assert_eq!(updated["workflow"]["version"], 1);

    let (status, error) = send(&app, "PUT", &uri, Some(json!({ "status": "archived" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "INVALID_STATUS_TRANSITION");

    let (_, unchanged) = send(&app, "PUT", &uri, Some(json!({}))).await;
    assert_eq!(unchanged["updated"], false);

    let (status, deleted) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);

    let (_, again) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(again["deleted"], false);
}

#[tokio::test]
async fn test_statistics_endpoint() {
    let app = app();
    send(&app, "POST", "/api/v1/workflows", Some(welcome_body())).await;

    let (status, stats) = send(&app, "GET", "/api/v1/statistics?scope_id=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_workflows"], 1);
    assert_eq!(stats["workflows_by_status"]["active"], 1);
    assert_eq!(stats["workflows_by_trigger"]["member_joined"], 1);
    assert_eq!(stats["total_executions"], 0);
}
