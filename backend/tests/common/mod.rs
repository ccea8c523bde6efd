// Common test utilities that are shared across integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use guildflow_backend::config::{EngineConfig, RetentionPolicy};
use guildflow_backend::services::EventBus;
use guildflow_backend::workflows::{ActionHandler, ActionHandlerRegistry, HandlerError};
use guildflow_backend::WorkflowEngine;
use guildflow_shared::{
    Action, ActionType, ExecutionReport, ParameterMap, Trigger, TriggerType, WorkflowDefinition,
    WorkflowStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

/// Test handler that counts its calls
pub struct RecordingHandler {
    action_type: ActionType,
    calls: Arc<AtomicUsize>,
    behavior: Behavior,
    delay: Option<Duration>,
}

impl RecordingHandler {
    fn build(action_type: ActionType, behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Self {
            action_type,
            calls: calls.clone(),
            behavior,
            delay: None,
        };
        (handler, calls)
    }

    pub fn succeeding(action_type: ActionType) -> (Self, Arc<AtomicUsize>) {
        Self::build(action_type, Behavior::Succeed)
    }

    pub fn failing(action_type: ActionType) -> (Self, Arc<AtomicUsize>) {
        Self::build(action_type, Behavior::Fail)
    }

    pub fn panicking(action_type: ActionType) -> (Self, Arc<AtomicUsize>) {
        Self::build(action_type, Behavior::Panic)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    async fn execute(&self, parameters: &ParameterMap, _context: &Value) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.behavior {
            Behavior::Succeed => Ok(json!({ "handled": Value::Object(parameters.clone()) })),
            Behavior::Fail => Err(HandlerError::Failed("recording handler failure".to_string())),
            Behavior::Panic => panic!("recording handler panic"),
        }
    }
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        retention: RetentionPolicy::unbounded(),
        ..EngineConfig::default()
    }
}

pub fn engine_with(handlers: ActionHandlerRegistry) -> WorkflowEngine {
    init_test_logging();
    WorkflowEngine::new(handlers, test_config(), None)
}

/// Engine wired to an in-process event bus, as the binary runs it
pub fn bus_engine() -> (WorkflowEngine, Arc<EventBus>) {
    init_test_logging();
    let bus = Arc::new(EventBus::new());
    let engine = WorkflowEngine::new(
        ActionHandlerRegistry::with_collaborators(bus.clone()),
        test_config(),
        None,
    );
    (engine, bus)
}

pub fn welcome_definition() -> WorkflowDefinition {
    WorkflowDefinition::new("Welcome", 1, 7, Trigger::new(TriggerType::MemberJoined))
        .with_action(Action::send_message(
            "greet",
            "welcome",
            "Welcome {{username}}!",
        ))
        .with_status(WorkflowStatus::Active)
}

pub fn manual_definition(actions: Vec<Action>) -> WorkflowDefinition {
    let mut definition =
        WorkflowDefinition::new("Manual run", 1, 7, Trigger::new(TriggerType::Manual));
    definition.actions = actions;
    definition
}

/// Wait for an execution to finish, failing the test if it takes too long
pub async fn finished(engine: &WorkflowEngine, execution_id: Uuid) -> ExecutionReport {
    tokio::time::timeout(Duration::from_secs(10), engine.wait(execution_id))
        .await
        .expect("execution did not finish in time")
        .expect("execution is tracked")
}
