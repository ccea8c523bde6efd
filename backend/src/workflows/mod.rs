// Workflow Automation Engine
//
// Event-driven automation for community servers: a trigger type plus conditions selects
// workflows, and each match runs its ordered action pipeline as an independent execution.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod registry;
pub mod tracker;
pub mod triggers;

pub use actions::{ActionHandler, ActionHandlerRegistry, HandlerError};
pub use conditions::{evaluate, ConditionOperator};
pub use engine::WorkflowEngine;
pub use executor::ActionPipelineExecutor;
pub use registry::WorkflowRegistry;
pub use tracker::{ExecutionHandle, ExecutionTracker};
pub use triggers::{EventPayload, EventSource, TriggerDispatcher, TriggerEvent};
