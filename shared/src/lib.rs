use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of the community (guild) that owns a workflow
pub type ScopeId = u64;
pub type UserId = u64;

/// Free-form parameters attached to triggers and actions
pub type ParameterMap = serde_json::Map<String, serde_json::Value>;

// ===== Workflow =====

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Disabled,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
            Self::Archived => "archived",
        }
    }

    /// Only active workflows are considered by event dispatch
    pub fn accepts_dispatch(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }

    /// Lifecycle: draft -> active <-> paused -> disabled -> archived.
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        if *self == next {
            return true;
        }

        matches!(
            (*self, next),
            (Draft, Active)
                | (Draft, Archived)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Disabled)
                | (Paused, Disabled)
                | (Disabled, Archived)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Community events that can start a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    // Member triggers
    MemberJoined,
    MemberLeft,
    MemberUpdated,

    // Message triggers
    MessageCreated,
    MessageDeleted,
    ReactionAdded,

    // Role triggers
    RoleAssigned,

    // Support ticket triggers
    TicketCreated,
    TicketUpdated,
    TicketClosed,

    // Host driven triggers
    Scheduled,
    WebhookReceived,
    Manual,

    /// Any tag this build does not know about
    #[serde(other)]
    Unknown,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemberJoined => "member_joined",
            Self::MemberLeft => "member_left",
            Self::MemberUpdated => "member_updated",
            Self::MessageCreated => "message_created",
            Self::MessageDeleted => "message_deleted",
            Self::ReactionAdded => "reaction_added",
            Self::RoleAssigned => "role_assigned",
            Self::TicketCreated => "ticket_created",
            Self::TicketUpdated => "ticket_updated",
            Self::TicketClosed => "ticket_closed",
            Self::Scheduled => "scheduled",
            Self::WebhookReceived => "webhook_received",
            Self::Manual => "manual",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = Infallible;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_value(serde_json::Value::String(tag.to_string())).unwrap_or(Self::Unknown))
    }
}

/// Side effects a workflow action can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendMessage,
    AssignRecord,
    AddTag,
    ChangePriority,
    NotifyUser,

    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::AssignRecord => "assign_record",
            Self::AddTag => "add_tag",
            Self::ChangePriority => "change_priority",
            Self::NotifyUser => "notify_user",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = Infallible;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_value(serde_json::Value::String(tag.to_string())).unwrap_or(Self::Unknown))
    }
}

/// Connector joining a condition to the *next* one in the list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicConnector {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// A single field/operator/value test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field path to evaluate (dot notation for nested fields)
    pub field: String,
    /// Operator tag, e.g. "equals" or "greater_than"
    pub operator: String,
    /// Value to compare against
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub logic: LogicConnector,
}

impl Condition {
    pub fn new(field: &str, operator: &str, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
            logic: LogicConnector::And,
        }
    }

    pub fn equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "equals", value)
    }

    pub fn not_equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "not_equals", value)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, "contains", serde_json::Value::String(value.to_string()))
    }

    pub fn starts_with(field: &str, value: &str) -> Self {
        Self::new(field, "starts_with", serde_json::Value::String(value.to_string()))
    }

    pub fn ends_with(field: &str, value: &str) -> Self {
        Self::new(field, "ends_with", serde_json::Value::String(value.to_string()))
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, "greater_than", serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, "less_than", serde_json::json!(value))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, "is_null", serde_json::Value::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::new(field, "is_not_null", serde_json::Value::Null)
    }

    pub fn in_list(field: &str, values: Vec<serde_json::Value>) -> Self {
        Self::new(field, "in", serde_json::Value::Array(values))
    }

    pub fn not_in_list(field: &str, values: Vec<serde_json::Value>) -> Self {
        Self::new(field, "not_in", serde_json::Value::Array(values))
    }

    /// AND this condition's running result with the next condition
    pub fn and(mut self) -> Self {
        self.logic = LogicConnector::And;
        self
    }

    /// OR this condition's running result with the next condition
    pub fn or(mut self) -> Self {
        self.logic = LogicConnector::Or;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub parameters: ParameterMap,
}

impl Trigger {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            conditions: Vec::new(),
            parameters: ParameterMap::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

/// What happens when an action's handler fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Continue,
    Stop,
    Retry,
}

fn generate_action_id() -> String {
    Uuid::new_v4().to_string()
}

/// One step of a workflow's action pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "generate_action_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub parameters: ParameterMap,
    /// Gating conditions evaluated against the execution context
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub delay_seconds: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_delay_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

impl Action {
    pub fn new(id: &str, action_type: ActionType, parameters: serde_json::Value) -> Self {
        let parameters = match parameters {
            serde_json::Value::Object(map) => map,
            _ => ParameterMap::new(),
        };

        Self {
            id: id.to_string(),
            action_type,
            parameters,
            conditions: Vec::new(),
            delay_seconds: 0,
            retry_count: 0,
            retry_delay_seconds: 0,
            timeout_seconds: None,
            on_error: ErrorPolicy::Continue,
        }
    }

    pub fn with_delay(mut self, seconds: u64) -> Self {
        self.delay_seconds = seconds;
        self
    }

    /// Retry a failing handler `count` additional times before giving up
    pub fn with_retry(mut self, count: u32) -> Self {
        self.retry_count = count;
        self.on_error = ErrorPolicy::Retry;
        self
    }

    pub fn with_retry_delay(mut self, seconds: u64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn stop_on_failure(self) -> Self {
        self.with_policy(ErrorPolicy::Stop)
    }

    // ===== Action Builders =====

    pub fn send_message(id: &str, channel_id: &str, content: &str) -> Self {
        Self::new(
            id,
            ActionType::SendMessage,
            serde_json::json!({
                "channel_id": channel_id,
                "content": content
            }),
        )
    }

    pub fn assign_record(id: &str, record_id: &str, assignee_id: UserId) -> Self {
        Self::new(
            id,
            ActionType::AssignRecord,
            serde_json::json!({
                "record_id": record_id,
                "assignee_id": assignee_id
            }),
        )
    }

    pub fn add_tag(id: &str, record_id: &str, tag: &str) -> Self {
        Self::new(
            id,
            ActionType::AddTag,
            serde_json::json!({
                "record_id": record_id,
                "tag": tag
            }),
        )
    }

    pub fn change_priority(id: &str, record_id: &str, priority: &str) -> Self {
        Self::new(
            id,
            ActionType::ChangePriority,
            serde_json::json!({
                "record_id": record_id,
                "priority": priority
            }),
        )
    }

    pub fn notify_user(id: &str, user_id: &str, message: &str) -> Self {
        Self::new(
            id,
            ActionType::NotifyUser,
            serde_json::json!({
                "user_id": user_id,
                "message": message
            }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub scope_id: ScopeId,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
    pub status: WorkflowStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: u32,
}

impl Workflow {
    pub fn from_definition(definition: WorkflowDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: definition.name,
            description: definition.description,
            scope_id: definition.scope_id,
            trigger: definition.trigger,
            actions: definition.actions,
            status: definition.status,
            created_by: definition.created_by,
            created_at: Utc::now(),
            updated_at: None,
            execution_count: 0,
            last_executed: None,
            tags: definition.tags,
            version: 1,
        }
    }

    pub fn matches_filter(&self, filter: &WorkflowFilter) -> bool {
        if filter.scope_id.is_some_and(|scope| scope != self.scope_id) {
            return false;
        }
        if filter.status.is_some_and(|status| status != self.status) {
            return false;
        }
        if filter
            .trigger_type
            .is_some_and(|trigger| trigger != self.trigger.trigger_type)
        {
            return false;
        }
        if let Some(tag) = &filter.tag {
            if !self.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

/// Input for creating a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scope_id: ScopeId,
    pub trigger: Trigger,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub created_by: UserId,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(name: &str, scope_id: ScopeId, created_by: UserId, trigger: Trigger) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            scope_id,
            trigger,
            actions: Vec::new(),
            status: WorkflowStatus::Draft,
            created_by,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }
}

/// Partial update of a workflow; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl WorkflowPatch {
    pub fn status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.trigger.is_none()
            && self.actions.is_none()
            && self.status.is_none()
            && self.tags.is_none()
    }

    /// Structural edits bump the version and re-index the workflow
    pub fn is_structural(&self) -> bool {
        self.trigger.is_some() || self.actions.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFilter {
    #[serde(default)]
    pub scope_id: Option<ScopeId>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub tag: Option<String>,
}

// ===== Execution =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrigin {
    Dispatch,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    HandlerError,
    UnknownActionType,
    Timeout,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub action_id: Option<String>,
    pub kind: ExecutionErrorKind,
    pub message: String,
    pub attempts: u32,
    pub occurred_at: DateTime<Utc>,
}

impl ExecutionError {
    pub fn new(action_id: Option<&str>, kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            action_id: action_id.map(str::to_string),
            kind,
            message: message.into(),
            attempts: 1,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// One runtime instance of a workflow's action pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_version: u32,
    pub scope_id: ScopeId,
    pub trigger_type: TriggerType,
    pub origin: ExecutionOrigin,
    /// Snapshot of the payload that started this execution
    pub payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub current_action: Option<String>,
    pub current_action_index: Option<usize>,
    pub total_actions: usize,
    pub results: HashMap<String, serde_json::Value>,
    pub errors: Vec<ExecutionError>,
}

impl Execution {
    pub fn start(workflow: &Workflow, origin: ExecutionOrigin, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            workflow_version: workflow.version,
            scope_id: workflow.scope_id,
            trigger_type: workflow.trigger.trigger_type,
            origin,
            payload,
            started_at: Utc::now(),
            ended_at: None,
            status: ExecutionStatus::Running,
            current_action: None,
            current_action_index: None,
            total_actions: workflow.actions.len(),
            results: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Percentage of the pipeline reached, based on the 1-based index of the current action
    pub fn progress(&self) -> f64 {
        if self.total_actions == 0 {
            return if self.status == ExecutionStatus::Completed { 100.0 } else { 0.0 };
        }

        match self.current_action_index {
            Some(index) => ((index + 1) as f64 / self.total_actions as f64) * 100.0,
            None => 0.0,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|ended| (ended - self.started_at).num_milliseconds())
    }
}

/// Point-in-time view of an execution as returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub current_action: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub errors: Vec<ExecutionError>,
    pub results: HashMap<String, serde_json::Value>,
    pub progress: f64,
}

impl From<&Execution> for ExecutionReport {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id,
            workflow_id: execution.workflow_id,
            status: execution.status,
            current_action: execution.current_action.clone(),
            started_at: execution.started_at,
            ended_at: execution.ended_at,
            errors: execution.errors.clone(),
            results: execution.results.clone(),
            progress: execution.progress(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_workflows: usize,
    pub workflows_by_status: BTreeMap<WorkflowStatus, usize>,
    pub workflows_by_trigger: BTreeMap<TriggerType, usize>,
    pub total_executions: usize,
    pub executions_by_status: BTreeMap<ExecutionStatus, usize>,
    /// Mean duration over completed executions only
    pub average_duration_ms: Option<f64>,
}
