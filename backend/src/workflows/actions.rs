// Workflow Actions - Handler capabilities keyed by action type

use async_trait::async_trait;
use guildflow_shared::{ActionType, ParameterMap, ScopeId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::services::{
    MessageDelivery, PriorityChange, RecordAssignment, ServiceError, Tagging, UserNotification,
};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Missing parameter '{0}'")]
    MissingParameter(String),
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("{0}")]
    Failed(String),
}

/// Performs the side effect for one action type.
///
/// Handlers must not block the runtime and must be safe to abandon: cancellation of an
/// execution is observed between actions, never inside a handler call.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// `parameters` are already rendered against `context`
    async fn execute(&self, parameters: &ParameterMap, context: &Value) -> Result<Value, HandlerError>;
}

/// Maps action type tags to their handlers. Populated at startup, then shared read-only.
#[derive(Default)]
pub struct ActionHandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl ActionHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handler for every action type, all backed by `collaborators`
    pub fn with_collaborators<C>(collaborators: Arc<C>) -> Self
    where
        C: MessageDelivery + RecordAssignment + Tagging + PriorityChange + UserNotification + 'static,
    {
        let mut registry = Self::new();
        registry.register(SendMessageHandler::new(collaborators.clone()));
        registry.register(AssignRecordHandler::new(collaborators.clone()));
        registry.register(AddTagHandler::new(collaborators.clone()));
        registry.register(ChangePriorityHandler::new(collaborators.clone()));
        registry.register(NotifyUserHandler::new(collaborators));
        registry
    }

    /// Register a handler, replacing any previous handler for the same type
    pub fn register<H: ActionHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ActionHandler>) -> &mut Self {
        let action_type = handler.action_type();
        if !action_type.is_known() {
            warn!("Refusing to register a handler for the unknown action type");
            return self;
        }
        self.handlers.insert(action_type, handler);
        self
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }

    pub fn contains(&self, action_type: ActionType) -> bool {
        self.handlers.contains_key(&action_type)
    }

    pub fn action_types(&self) -> Vec<ActionType> {
        let mut types: Vec<ActionType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ===== Parameter helpers =====

/// Ids may arrive as JSON strings or numbers
fn param_string(parameters: &ParameterMap, name: &str) -> Result<Option<String>, HandlerError> {
    match parameters.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(HandlerError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a string or number, got {}", other),
        }),
    }
}

fn required_string(parameters: &ParameterMap, name: &str) -> Result<String, HandlerError> {
    param_string(parameters, name)?.ok_or_else(|| HandlerError::MissingParameter(name.to_string()))
}

/// Scope comes from the parameters first, then from the event context
fn scope_id(parameters: &ParameterMap, context: &Value) -> Option<ScopeId> {
    let from_value = |value: &Value| match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };

    parameters
        .get("scope_id")
        .and_then(from_value)
        .or_else(|| {
            ["scope_id", "guild_id", "guildId"]
                .iter()
                .find_map(|key| context.get(key).and_then(from_value))
        })
}

// ===== Built-in handlers =====

pub struct SendMessageHandler {
    delivery: Arc<dyn MessageDelivery>,
}

impl SendMessageHandler {
    pub fn new(delivery: Arc<dyn MessageDelivery>) -> Self {
        Self { delivery }
    }
}

#[async_trait]
impl ActionHandler for SendMessageHandler {
    fn action_type(&self) -> ActionType {
        ActionType::SendMessage
    }

    async fn execute(&self, parameters: &ParameterMap, context: &Value) -> Result<Value, HandlerError> {
        let channel_id = required_string(parameters, "channel_id")?;
        let content = required_string(parameters, "content")?;

        let message_id = self
            .delivery
            .send_message(scope_id(parameters, context), &channel_id, &content)
            .await?;

        Ok(json!({
            "message_id": message_id,
            "channel_id": channel_id
        }))
    }
}

pub struct AssignRecordHandler {
    assignment: Arc<dyn RecordAssignment>,
}

impl AssignRecordHandler {
    pub fn new(assignment: Arc<dyn RecordAssignment>) -> Self {
        Self { assignment }
    }
}

#[async_trait]
impl ActionHandler for AssignRecordHandler {
    fn action_type(&self) -> ActionType {
        ActionType::AssignRecord
    }

    async fn execute(&self, parameters: &ParameterMap, _context: &Value) -> Result<Value, HandlerError> {
        let record_id = required_string(parameters, "record_id")?;
        let assignee_id = required_string(parameters, "assignee_id")?;

        self.assignment.assign_record(&record_id, &assignee_id).await?;

        Ok(json!({
            "record_id": record_id,
            "assignee_id": assignee_id
        }))
    }
}

pub struct AddTagHandler {
    tagging: Arc<dyn Tagging>,
}

impl AddTagHandler {
    pub fn new(tagging: Arc<dyn Tagging>) -> Self {
        Self { tagging }
    }
}

#[async_trait]
impl ActionHandler for AddTagHandler {
    fn action_type(&self) -> ActionType {
        ActionType::AddTag
    }

    async fn execute(&self, parameters: &ParameterMap, _context: &Value) -> Result<Value, HandlerError> {
        let record_id = required_string(parameters, "record_id")?;
        let tag = required_string(parameters, "tag")?;

        self.tagging.add_tag(&record_id, &tag).await?;

        Ok(json!({
            "record_id": record_id,
            "tag": tag
        }))
    }
}

pub struct ChangePriorityHandler {
    priorities: Arc<dyn PriorityChange>,
}

impl ChangePriorityHandler {
    pub fn new(priorities: Arc<dyn PriorityChange>) -> Self {
        Self { priorities }
    }
}

#[async_trait]
impl ActionHandler for ChangePriorityHandler {
    fn action_type(&self) -> ActionType {
        ActionType::ChangePriority
    }

    async fn execute(&self, parameters: &ParameterMap, _context: &Value) -> Result<Value, HandlerError> {
        let record_id = required_string(parameters, "record_id")?;
        let priority = required_string(parameters, "priority")?;

        let previous = self.priorities.change_priority(&record_id, &priority).await?;

        Ok(json!({
            "record_id": record_id,
            "previous_priority": previous,
            "priority": priority
        }))
    }
}

pub struct NotifyUserHandler {
    notifications: Arc<dyn UserNotification>,
}

impl NotifyUserHandler {
    pub fn new(notifications: Arc<dyn UserNotification>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl ActionHandler for NotifyUserHandler {
    fn action_type(&self) -> ActionType {
        ActionType::NotifyUser
    }

    async fn execute(&self, parameters: &ParameterMap, _context: &Value) -> Result<Value, HandlerError> {
        let user_id = required_string(parameters, "user_id")?;
        let message = required_string(parameters, "message")?;
        let title = param_string(parameters, "title")?;

        let notification_id = self
            .notifications
            .notify_user(&user_id, title.as_deref(), &message)
            .await?;

        Ok(json!({
            "user_id": user_id,
            "notification_id": notification_id
        }))
    }
}
