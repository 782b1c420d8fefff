//! Chain Context
//!
//! Holds every piece of mutable state for one workflow execution:
//! - the coarse status machine (`pending -> running -> completed|failed`,
//!   or `pending|running -> cancelled`)
//! - last-write-wins stores for variables, responses, validations, flags,
//!   counters and metadata
//! - per-step records used for dependency readiness
//! - handles of concurrently registered work, awaited on completion
//!
//! All state sits behind a single async `RwLock`; no guard is held across
//! a transport call or a hook.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::definition::{Condition, Step, StepReport, StepStatus, Workflow};
use super::template;
use crate::error::{FailureKind, ItemFailure};
use crate::path;
use crate::transport::{RequestDescriptor, Response};
use crate::validate::ValidationResult;
use crate::{Error, Result};

/// Coarse lifecycle of one chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ChainStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChainStatus::Completed | ChainStatus::Failed | ChainStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: ChainStatus) -> bool {
        use ChainStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainStatus::Pending => "pending",
            ChainStatus::Running => "running",
            ChainStatus::Completed => "completed",
            ChainStatus::Failed => "failed",
            ChainStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// An error accumulated on the chain. `step_id` is `None` for hook failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainError {
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub failure: ItemFailure,
    pub at_ms: u64,
}

/// Snapshot-able state of one chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainState {
    pub id: String,
    pub status: ChainStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub variables: IndexMap<String, Value>,
    /// Values written by extraction, also mirrored into `variables`
    pub extracted: IndexMap<String, Value>,
    pub responses: IndexMap<String, Response>,
    pub validations: IndexMap<String, ValidationResult>,
    pub flags: IndexMap<String, bool>,
    pub counters: IndexMap<String, i64>,
    pub metadata: IndexMap<String, Value>,
    pub step_results: IndexMap<String, StepReport>,
    pub errors: Vec<ChainError>,
}

impl ChainState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn successes(&self) -> usize {
        self.step_results
            .values()
            .filter(|r| r.status == StepStatus::Succeeded)
            .count()
    }

    /// Set `ended_at_ms` and compute the duration exactly once
    fn finish_timing(&mut self) {
        if self.ended_at_ms.is_none() {
            self.ended_at_ms = Some(now_ms());
        }
        if self.duration_ms.is_none() {
            if let (Some(start), Some(end)) = (self.started_at_ms, self.ended_at_ms) {
                self.duration_ms = Some(end.saturating_sub(start));
            }
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Per-execution state container shared by the executor and step handlers
pub struct ChainContext {
    id: String,
    workflow: OnceLock<Arc<Workflow>>,
    state: RwLock<ChainState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainContext")
            .field("id", &self.id)
            .field("workflow", &self.workflow.get().map(|w| &w.id))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ChainContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_token(id, CancellationToken::new())
    }

    /// Context whose cancellation is driven by an existing token
    pub fn with_token(id: impl Into<String>, cancel: CancellationToken) -> Self {
        let id = id.into();
        Self {
            state: RwLock::new(ChainState::new(id.clone())),
            id,
            workflow: OnceLock::new(),
            tasks: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow(&self) -> Option<Arc<Workflow>> {
        self.workflow.get().cloned()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn status(&self) -> ChainStatus {
        self.state.read().await.status
    }

    /// Bind a workflow. Callable once per context.
    pub async fn initialize(&self, workflow: Arc<Workflow>) -> Result<()> {
        let mut state = self.state.write().await;
        if state.status != ChainStatus::Pending {
            return Err(Error::InvalidTransition {
                from: state.status.to_string(),
                to: ChainStatus::Pending.to_string(),
            });
        }
        self.workflow
            .set(Arc::clone(&workflow))
            .map_err(|_| Error::Config(format!("context '{}' is already initialized", self.id)))?;

        for (name, value) in &workflow.variables {
            state.variables.insert(name.clone(), value.clone());
        }
        state.total_steps = workflow.steps.len();
        state.current_step = 0;
        Ok(())
    }

    fn transition(state: &mut ChainState, next: ChainStatus) -> Result<()> {
        if !state.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: state.status.to_string(),
                to: next.to_string(),
            });
        }
        state.status = next;
        Ok(())
    }

    /// `pending -> running`, then run the setup hook. A hook failure is
    /// recorded on the chain, not returned.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            Self::transition(&mut state, ChainStatus::Running)?;
            state.started_at_ms = Some(now_ms());
        }

        if let Some(setup) = self.workflow().and_then(|w| w.setup.clone()) {
            if let Err(e) = setup(Arc::clone(self)).await {
                tracing::warn!(chain = %self.id, error = %e, "setup hook failed");
                self.record_error(None, Some("setup"), ItemFailure::new(FailureKind::Step, e.to_string()))
                    .await;
            }
        }
        Ok(())
    }

    /// Await registered work, run teardown and settle the final status.
    ///
    /// A chain that is already terminal is left untouched. Teardown failures
    /// are recorded, not returned.
    pub async fn complete(self: &Arc<Self>) -> Result<ChainStatus> {
        {
            let state = self.state.read().await;
            if state.status.is_terminal() {
                return Ok(state.status);
            }
            if state.status != ChainStatus::Running {
                return Err(Error::InvalidTransition {
                    from: state.status.to_string(),
                    to: ChainStatus::Completed.to_string(),
                });
            }
        }

        let handles = self.take_tasks();
        for handle in handles {
            if let Err(e) = handle.await {
                self.record_error(None, Some("task"), ItemFailure::new(FailureKind::Step, e.to_string()))
                    .await;
            }
        }

        if let Some(teardown) = self.workflow().and_then(|w| w.teardown.clone()) {
            if let Err(e) = teardown(Arc::clone(self)).await {
                tracing::warn!(chain = %self.id, error = %e, "teardown hook failed");
                self.record_error(None, Some("teardown"), ItemFailure::new(FailureKind::Step, e.to_string()))
                    .await;
            }
        }

        let mut state = self.state.write().await;
        if state.status.is_terminal() {
            return Ok(state.status);
        }
        let next = if !state.errors.is_empty() && state.successes() == 0 {
            ChainStatus::Failed
        } else {
            ChainStatus::Completed
        };
        Self::transition(&mut state, next)?;
        state.finish_timing();
        Ok(next)
    }

    /// Force `cancelled` and drop outstanding registered work. In-flight
    /// operations are not interrupted.
    pub async fn cancel(&self) -> ChainStatus {
        self.cancel.cancel();
        drop(self.take_tasks());

        let mut state = self.state.write().await;
        if Self::transition(&mut state, ChainStatus::Cancelled).is_ok() {
            state.finish_timing();
        }
        state.status
    }

    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *tasks)
    }

    /// Spawn work that `complete()` will wait for. Returns `false` if the
    /// chain is already cancelled.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }
        let handle = tokio::spawn(fut);
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        true
    }

    // -- dependency readiness -------------------------------------------------

    /// True iff every dependency has a recorded result, successful or not
    pub async fn is_step_ready(&self, step: &Step) -> bool {
        let state = self.state.read().await;
        step.depends_on
            .iter()
            .all(|dep| state.step_results.contains_key(dep))
    }

    /// Why `step` should be skipped, if it should. A condition that errors
    /// counts as a skip and is logged.
    pub async fn skip_reason(&self, step: &Step) -> Option<String> {
        let condition = step.condition.as_ref()?;
        match self.evaluate_condition(condition).await {
            Ok(true) => None,
            Ok(false) => Some("condition not met".to_string()),
            Err(e) => {
                tracing::warn!(chain = %self.id, step = %step.id, error = %e, "condition failed, skipping step");
                Some(format!("condition error: {}", e))
            }
        }
    }

    pub async fn should_skip_step(&self, step: &Step) -> bool {
        self.skip_reason(step).await.is_some()
    }

    pub async fn evaluate_condition(&self, condition: &Condition) -> Result<bool> {
        let state = self.state.read().await;
        condition.evaluate(&state)
    }

    // -- extraction -----------------------------------------------------------

    /// Apply `path` to the stored response `response_key` and store the
    /// result under `variable`. An unresolved path stores `null` and returns
    /// `None`.
    pub async fn extract_value(
        &self,
        response_key: &str,
        path: &str,
        variable: &str,
    ) -> Result<Option<Value>> {
        let mut state = self.state.write().await;
        let response = state
            .responses
            .get(response_key)
            .ok_or_else(|| Error::NotFound(format!("response '{}'", response_key)))?;
        let value = path::extract(&response.body, path);

        let stored = value.clone().unwrap_or(Value::Null);
        state.extracted.insert(variable.to_string(), stored.clone());
        state.variables.insert(variable.to_string(), stored);
        Ok(value)
    }

    // -- stores ---------------------------------------------------------------

    pub async fn variable(&self, name: &str) -> Option<Value> {
        self.state.read().await.variables.get(name).cloned()
    }

    pub async fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.state.write().await.variables.insert(name.into(), value);
    }

    pub async fn remove_variable(&self, name: &str) -> Option<Value> {
        self.state.write().await.variables.shift_remove(name)
    }

    pub async fn variables(&self) -> IndexMap<String, Value> {
        self.state.read().await.variables.clone()
    }

    pub async fn extracted(&self, name: &str) -> Option<Value> {
        self.state.read().await.extracted.get(name).cloned()
    }

    pub async fn response(&self, key: &str) -> Option<Response> {
        self.state.read().await.responses.get(key).cloned()
    }

    pub async fn set_response(&self, key: impl Into<String>, response: Response) {
        self.state.write().await.responses.insert(key.into(), response);
    }

    pub async fn validation(&self, key: &str) -> Option<ValidationResult> {
        self.state.read().await.validations.get(key).cloned()
    }

    pub async fn set_validation(&self, key: impl Into<String>, result: ValidationResult) {
        self.state.write().await.validations.insert(key.into(), result);
    }

    pub async fn flag(&self, name: &str) -> bool {
        self.state
            .read()
            .await
            .flags
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    pub async fn set_flag(&self, name: impl Into<String>, value: bool) {
        self.state.write().await.flags.insert(name.into(), value);
    }

    pub async fn counter(&self, name: &str) -> i64 {
        self.state
            .read()
            .await
            .counters
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Add `by` to a counter (starting from 0) and return the new value
    pub async fn increment(&self, name: &str, by: i64) -> i64 {
        let mut state = self.state.write().await;
        let counter = state.counters.entry(name.to_string()).or_insert(0);
        *counter += by;
        *counter
    }

    pub async fn metadata(&self, key: &str) -> Option<Value> {
        self.state.read().await.metadata.get(key).cloned()
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.state.write().await.metadata.insert(key.into(), value);
    }

    // -- step records ---------------------------------------------------------

    /// Record a step outcome. Failures are also accumulated into the
    /// chain's errors.
    pub async fn record_step(&self, report: StepReport) {
        let mut state = self.state.write().await;
        if let Some(failure) = &report.failure {
            state.errors.push(ChainError {
                step_id: Some(report.step_id.clone()),
                source: None,
                failure: failure.clone(),
                at_ms: now_ms(),
            });
        }
        if !state.step_results.contains_key(&report.step_id) {
            state.current_step += 1;
        }
        state.step_results.insert(report.step_id.clone(), report);
    }

    pub async fn step_report(&self, step_id: &str) -> Option<StepReport> {
        self.state.read().await.step_results.get(step_id).cloned()
    }

    pub async fn record_error(&self, step_id: Option<&str>, source: Option<&str>, failure: ItemFailure) {
        self.state.write().await.errors.push(ChainError {
            step_id: step_id.map(str::to_string),
            source: source.map(str::to_string),
            failure,
            at_ms: now_ms(),
        });
    }

    pub async fn errors(&self) -> Vec<ChainError> {
        self.state.read().await.errors.clone()
    }

    /// Clone of the full state
    pub async fn snapshot(&self) -> ChainState {
        self.state.read().await.clone()
    }

    // -- templating -----------------------------------------------------------

    pub async fn render_request(&self, request: &RequestDescriptor) -> RequestDescriptor {
        let state = self.state.read().await;
        template::render_request(request, &state.variables)
    }

    pub async fn render_value(&self, value: &Value) -> Value {
        let state = self.state.read().await;
        template::render_value(value, &state.variables)
    }

    // -- export / import ------------------------------------------------------

    /// Plain JSON snapshot of the chain state
    pub async fn export(&self) -> Result<Value> {
        let state = self.state.read().await;
        Ok(serde_json::to_value(&*state)?)
    }

    /// Replace this chain's state with a snapshot produced by [`export`].
    /// The context keeps its own id.
    ///
    /// [`export`]: ChainContext::export
    pub async fn import(&self, snapshot: Value) -> Result<()> {
        let mut imported: ChainState = serde_json::from_value(snapshot)?;
        imported.id = self.id.clone();
        *self.state.write().await = imported;
        Ok(())
    }
}
