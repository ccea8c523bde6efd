//! Error handling for the workflow engine
//!
//! Definition-time errors surface synchronously as [`EngineError`]. Runtime failures inside an
//! execution never reach the caller; they are recorded on the execution itself.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use guildflow_shared::WorkflowStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::store::StoreError;

/// JSON error body returned by the HTTP surface
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "INVALID_DEFINITION", "NOT_FOUND")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, Vec<String>>) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid workflow definition: {message}")]
    InvalidDefinition {
        message: String,
        details: HashMap<String, Vec<String>>,
    },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Workflow {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("Workflow {0} is archived and can no longer be modified")]
    WorkflowArchived(Uuid),

    #[error("Workflow {0} does not use a manual trigger")]
    ManualExecutionNotAllowed(Uuid),

    #[error("Workflow {id} cannot run while {status}")]
    WorkflowNotRunnable { id: Uuid, status: WorkflowStatus },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for HTTP handlers
pub type ApiResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidDefinition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::WorkflowNotFound(_) | Self::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidStatusTransition { .. }
            | Self::WorkflowArchived(_)
            | Self::ManualExecutionNotAllowed(_)
            | Self::WorkflowNotRunnable { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidDefinition { .. } => "INVALID_DEFINITION",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::WorkflowNotFound(_) | Self::ExecutionNotFound(_) => "NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::WorkflowArchived(_) => "WORKFLOW_ARCHIVED",
            Self::ManualExecutionNotAllowed(_) => "MANUAL_EXECUTION_NOT_ALLOWED",
            Self::WorkflowNotRunnable { .. } => "WORKFLOW_NOT_RUNNABLE",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkflowNotFound(_) | Self::ExecutionNotFound(_))
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::Storage(err) => {
                tracing::error!("Storage error: {}", err);
                "A storage error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut error = ApiError::new(self.error_code(), message);
        if let Self::InvalidDefinition { details, .. } = &self {
            if !details.is_empty() {
                error = error.with_details(details.clone());
            }
        }

        (status, Json(error)).into_response()
    }
}

/// Collects field-level validation problems into a single `InvalidDefinition`
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.into());
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.details.is_empty()
    }

    pub fn build(self) -> EngineResult<()> {
        if self.details.is_empty() {
            return Ok(());
        }

        let mut fields: Vec<&String> = self.details.keys().collect();
        fields.sort();
        let message = format!(
            "{} field(s) failed validation: {}",
            fields.len(),
            fields
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Err(EngineError::InvalidDefinition {
            message,
            details: self.details,
        })
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
