// Workflow Executor - Runs an execution's action pipeline

use guildflow_shared::{
    Action, ErrorPolicy, ExecutionError, ExecutionErrorKind, ExecutionStatus, ParameterMap,
};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::actions::{ActionHandler, ActionHandlerRegistry};
use super::conditions;
use super::tracker::ExecutionHandle;

/// Outcome of invoking one action, after retries
enum Step {
    Succeeded(Value),
    Failed(ExecutionError),
    Cancelled,
}

pub struct ActionPipelineExecutor {
    handlers: Arc<ActionHandlerRegistry>,
    default_timeout: Option<Duration>,
}

impl ActionPipelineExecutor {
    pub fn new(handlers: Arc<ActionHandlerRegistry>, default_timeout: Option<Duration>) -> Self {
        Self {
            handlers,
            default_timeout,
        }
    }

    pub fn handlers(&self) -> &ActionHandlerRegistry {
        &self.handlers
    }

    /// Run `actions` in order against `payload`, recording progress through `handle`.
    /// Returns the terminal status the execution ended in.
    pub async fn run(
        &self,
        actions: &[Action],
        payload: &Value,
        handle: &ExecutionHandle,
    ) -> ExecutionStatus {
        let mut context = initial_context(payload);

        for (index, action) in actions.iter().enumerate() {
            if handle.is_cancelled() {
                info!("Execution {} cancelled before action {}", handle.id(), action.id);
                return handle.finish(ExecutionStatus::Cancelled).await;
            }

            handle.begin_action(index, &action.id).await;

            if !conditions::evaluate(&action.conditions, &context) {
                debug!("Skipping action {}: conditions not met", action.id);
                continue;
            }

            if action.delay_seconds > 0 {
                debug!("Delaying action {} by {}s", action.id, action.delay_seconds);
                if !pause(handle, Duration::from_secs(action.delay_seconds)).await {
                    info!("Execution {} cancelled while delaying {}", handle.id(), action.id);
                    return handle.finish(ExecutionStatus::Cancelled).await;
                }
            }

            let Some(handler) = self.handlers.get(action.action_type) else {
                error!(
                    "No handler registered for action {} ({})",
                    action.id, action.action_type
                );
                handle
                    .record_error(ExecutionError::new(
                        Some(&action.id),
                        ExecutionErrorKind::UnknownActionType,
                        format!("No handler registered for action type '{}'", action.action_type),
                    ))
                    .await;
                return handle.finish(ExecutionStatus::Failed).await;
            };

            info!("Executing action: {} ({})", action.id, action.action_type);
            let parameters = render_parameters(&action.parameters, &context);

            match self
                .invoke(handler.as_ref(), action, &parameters, &context, handle)
                .await
            {
                Step::Succeeded(output) => {
                    insert_result(&mut context, &action.id, output.clone());
                    handle.record_result(&action.id, output).await;
                }
                Step::Failed(failure) => {
                    error!("Action {} failed: {}", action.id, failure.message);
                    handle.record_error(failure).await;

                    if action.on_error != ErrorPolicy::Continue {
                        return handle.finish(ExecutionStatus::Failed).await;
                    }
                }
                Step::Cancelled => {
                    info!("Execution {} cancelled while retrying {}", handle.id(), action.id);
                    return handle.finish(ExecutionStatus::Cancelled).await;
                }
            }
        }

        handle.finish(ExecutionStatus::Completed).await
    }

    /// Call the handler, retrying under the retry policy
    async fn invoke(
        &self,
        handler: &dyn ActionHandler,
        action: &Action,
        parameters: &ParameterMap,
        context: &Value,
        handle: &ExecutionHandle,
    ) -> Step {
        let max_attempts = match action.on_error {
            ErrorPolicy::Retry => action.retry_count.saturating_add(1),
            _ => 1,
        };

        let mut attempt = 1;
        loop {
            match self.attempt(handler, action, parameters, context).await {
                Ok(output) => return Step::Succeeded(output),
                Err(failure) if attempt < max_attempts => {
                    warn!(
                        "Action {} failed, retrying ({}/{}): {}",
                        action.id, attempt, action.retry_count, failure.message
                    );
                    if action.retry_delay_seconds > 0
                        && !pause(handle, Duration::from_secs(action.retry_delay_seconds)).await
                    {
                        return Step::Cancelled;
                    }
                    attempt += 1;
                }
                Err(failure) => return Step::Failed(failure.with_attempts(attempt)),
            }
        }
    }

    async fn attempt(
        &self,
        handler: &dyn ActionHandler,
        action: &Action,
        parameters: &ParameterMap,
        context: &Value,
    ) -> Result<Value, ExecutionError> {
        let deadline = action
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .or(self.default_timeout);

        let call = handler.execute(parameters, context);
        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ExecutionError::new(
                        Some(&action.id),
                        ExecutionErrorKind::Timeout,
                        format!("Action timed out after {}s", limit.as_secs()),
                    ));
                }
            },
            None => call.await,
        };

        outcome.map_err(|e| {
            ExecutionError::new(Some(&action.id), ExecutionErrorKind::HandlerError, e.to_string())
        })
    }
}

/// Sleep unless cancelled first; `false` means cancellation won
async fn pause(handle: &ExecutionHandle, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = handle.cancelled() => false,
    }
}

/// Context starts as the payload object; other payloads are nested under `payload`
pub fn initial_context(payload: &Value) -> Value {
    match payload {
        Value::Object(_) => payload.clone(),
        Value::Null => Value::Object(ParameterMap::new()),
        other => {
            let mut map = ParameterMap::new();
            map.insert("payload".to_string(), other.clone());
            Value::Object(map)
        }
    }
}

fn insert_result(context: &mut Value, action_id: &str, output: Value) {
    if let Value::Object(map) = context {
        map.insert(action_id.to_string(), output);
    }
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("template pattern is valid"))
}

/// Render `{{path}}` placeholders in every string parameter
pub fn render_parameters(parameters: &ParameterMap, context: &Value) -> ParameterMap {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value, context)))
        .collect()
}

fn render_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(template) => render_string(template, context),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, context)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, context)).collect()),
        _ => value.clone(),
    }
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    match conditions::resolve_path(context, path.trim()) {
        Value::Null => None,
        found => Some(found),
    }
}

fn render_string(template: &str, context: &Value) -> Value {
    let pattern = template_pattern();

    // a lone placeholder keeps the referenced value's JSON type
    if let Some(caps) = pattern.captures(template) {
        if caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == template.len()) {
            if let Some(found) = lookup(context, &caps[1]) {
                return found.clone();
            }
            return Value::String(template.to_string());
        }
    }

    let rendered = pattern.replace_all(template, |caps: &Captures| match lookup(context, &caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(rendered.into_owned())
}
