// Execution Tracker - Live and finished execution state, cancellation and retention

use chrono::{DateTime, Utc};
use guildflow_shared::{Execution, ExecutionError, ExecutionReport, ExecutionStatus, ScopeId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RetentionPolicy;
use crate::error::{EngineError, EngineResult};

struct TrackedExecution {
    state: Arc<RwLock<Execution>>,
    cancel: CancellationToken,
    done: watch::Receiver<ExecutionStatus>,
}

/// Write side of one execution, owned by the task running its pipeline
#[derive(Clone)]
pub struct ExecutionHandle {
    id: Uuid,
    state: Arc<RwLock<Execution>>,
    cancel: CancellationToken,
    done: Arc<watch::Sender<ExecutionStatus>>,
}

impl ExecutionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub async fn begin_action(&self, index: usize, action_id: &str) {
        let mut execution = self.state.write().await;
        execution.current_action = Some(action_id.to_string());
        execution.current_action_index = Some(index);
    }

    pub async fn record_result(&self, action_id: &str, output: Value) {
        self.state
            .write()
            .await
            .results
            .insert(action_id.to_string(), output);
    }

    pub async fn record_error(&self, error: ExecutionError) {
        self.state.write().await.errors.push(error);
    }

    /// Move the execution to a terminal status. The first terminal status wins; the status
    /// actually recorded is returned.
    pub async fn finish(&self, status: ExecutionStatus) -> ExecutionStatus {
        let recorded = {
            let mut execution = self.state.write().await;
            if !execution.status.is_terminal() {
                execution.status = status;
                execution.ended_at = Some(Utc::now());
            }
            execution.status
        };

        self.done.send_replace(recorded);
        recorded
    }

    pub async fn snapshot(&self) -> Execution {
        self.state.read().await.clone()
    }
}

pub struct ExecutionTracker {
    executions: RwLock<HashMap<Uuid, TrackedExecution>>,
    retention: RetentionPolicy,
}

impl ExecutionTracker {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Start tracking a new execution and hand back its write handle
    pub async fn register(&self, execution: Execution) -> ExecutionHandle {
        let id = execution.id;
        let (done_tx, done_rx) = watch::channel(execution.status);
        let state = Arc::new(RwLock::new(execution));
        let cancel = CancellationToken::new();

        let mut executions = self.executions.write().await;
        let pruned = prune_finished(&mut executions, &self.retention, Utc::now()).await;
        if pruned > 0 {
            debug!("Pruned {} finished executions", pruned);
        }

        executions.insert(
            id,
            TrackedExecution {
                state: state.clone(),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        ExecutionHandle {
            id,
            state,
            cancel,
            done: Arc::new(done_tx),
        }
    }

    async fn state_of(&self, id: Uuid) -> EngineResult<Arc<RwLock<Execution>>> {
        self.executions
            .read()
            .await
            .get(&id)
            .map(|tracked| tracked.state.clone())
            .ok_or(EngineError::ExecutionNotFound(id))
    }

    pub async fn status(&self, id: Uuid) -> EngineResult<ExecutionReport> {
        let state = self.state_of(id).await?;
        let execution = state.read().await;
        Ok(ExecutionReport::from(&*execution))
    }

    pub async fn get(&self, id: Uuid) -> EngineResult<Execution> {
        let state = self.state_of(id).await?;
        let execution = state.read().await.clone();
        Ok(execution)
    }

    /// Request cooperative cancellation. `false` when the execution already finished.
    pub async fn cancel(&self, id: Uuid) -> EngineResult<bool> {
        let (state, token) = {
            let executions = self.executions.read().await;
            let tracked = executions
                .get(&id)
                .ok_or(EngineError::ExecutionNotFound(id))?;
            (tracked.state.clone(), tracked.cancel.clone())
        };

        if state.read().await.status.is_terminal() {
            return Ok(false);
        }

        token.cancel();
        info!("Cancellation requested for execution {}", id);
        Ok(true)
    }

    /// Cancel every running execution of a workflow, returning how many were signalled
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> usize {
        let executions = self.executions.read().await;
        let mut cancelled = 0;

        for tracked in executions.values() {
            let execution = tracked.state.read().await;
            if execution.workflow_id == workflow_id && !execution.status.is_terminal() {
                tracked.cancel.cancel();
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            info!("Cancelled {} running executions of workflow {}", cancelled, workflow_id);
        }
        cancelled
    }

    /// Execution history, newest first
    pub async fn list(
        &self,
        workflow_id: Option<Uuid>,
        status: Option<ExecutionStatus>,
        limit: Option<usize>,
    ) -> Vec<Execution> {
        let mut history = Vec::new();
        for tracked in self.executions.read().await.values() {
            let execution = tracked.state.read().await;
            if workflow_id.is_some_and(|id| execution.workflow_id != id) {
                continue;
            }
            if status.is_some_and(|s| execution.status != s) {
                continue;
            }
            history.push(execution.clone());
        }

        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        history
    }

    /// Every tracked execution, optionally restricted to one scope
    pub async fn snapshot(&self, scope_id: Option<ScopeId>) -> Vec<Execution> {
        let mut executions = Vec::new();
        for tracked in self.executions.read().await.values() {
            let execution = tracked.state.read().await;
            if scope_id.is_none_or(|scope| execution.scope_id == scope) {
                executions.push(execution.clone());
            }
        }
        executions
    }

    /// Resolve once the execution reaches a terminal status
    pub async fn wait(&self, id: Uuid) -> EngineResult<ExecutionReport> {
        let (state, mut done) = {
            let executions = self.executions.read().await;
            let tracked = executions
                .get(&id)
                .ok_or(EngineError::ExecutionNotFound(id))?;
            (tracked.state.clone(), tracked.done.clone())
        };

        // a dropped sender still leaves the final state readable
        let _ = done.wait_for(|status| status.is_terminal()).await;

        let execution = state.read().await;
        Ok(ExecutionReport::from(&*execution))
    }

    pub async fn prune(&self) -> usize {
        let mut executions = self.executions.write().await;
        prune_finished(&mut executions, &self.retention, Utc::now()).await
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

/// Evict finished executions older than the TTL, then the oldest beyond the count bound.
/// Running executions are never evicted.
async fn prune_finished(
    executions: &mut HashMap<Uuid, TrackedExecution>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> usize {
    let mut finished: Vec<(Uuid, DateTime<Utc>)> = Vec::new();
    for (id, tracked) in executions.iter() {
        let execution = tracked.state.read().await;
        if execution.status.is_terminal() {
            finished.push((*id, execution.ended_at.unwrap_or(execution.started_at)));
        }
    }

    let mut evicted = Vec::new();

    if let Some(ttl) = policy.finished_ttl {
        finished.retain(|(id, ended_at)| {
            let age = now.signed_duration_since(*ended_at).to_std().unwrap_or_default();
            if age > ttl {
                evicted.push(*id);
                false
            } else {
                true
            }
        });
    }

    if finished.len() > policy.max_finished {
        finished.sort_by(|a, b| b.1.cmp(&a.1));
        evicted.extend(finished.drain(policy.max_finished..).map(|(id, _)| id));
    }

    for id in &evicted {
        executions.remove(id);
    }
    evicted.len()
}
