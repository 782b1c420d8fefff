//! Executor
//!
//! Drives one run under a chosen strategy and aggregates a single
//! [`ExecutionResult`]:
//! - **sequential**: one item at a time, optional delay between items
//! - **parallel**: chunks of `max_concurrency` items, each chunk fully
//!   awaited before the next
//! - **batch**: chunks of `batch_size` items with an optional pause between
//!   batches
//! - **workflow**: dependency levels dispatched in order, steps within a
//!   level concurrently
//!
//! Concurrency is cooperative: items in a chunk are polled together on the
//! calling task and counters are only touched between suspension points.
//! Cancellation is checked before every new dispatch; work already in
//! flight runs to completion.

mod options;
mod registry;
mod result;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

pub use options::{ExecuteOptions, ExecutionMode, DEFAULT_BATCH_SIZE};
pub use registry::ExecutionRegistry;
pub use result::{ExecutionResult, ExecutionStatus};

use crate::config::ExecutorConfig;
use crate::error::{FailureKind, ItemFailure};
use crate::observe::{LifecycleEvent, Reporter, ResultAggregator, TracingReporter};
use crate::transport::{HttpTransport, RequestDescriptor, Response, Transport};
use crate::validate::{ValidationResult, Validator};
use crate::workflow::context::now_ms;
use crate::workflow::{
    ChainContext, ContextRegistry, ExecutionPlan, RunSettings, Step, StepHandler, StepKind,
    StepReport, StepRuntime, StepStatus, Workflow,
};
use crate::{Error, Result};

/// Key under which item `index` of a flat run is recorded
pub fn item_key(index: usize) -> String {
    format!("request_{}", index)
}

fn new_execution_id() -> String {
    format!("exec-{}", uuid::Uuid::now_v7())
}

/// Sleep for `ms` unless `token` fires first. Returns `false` if cancelled.
async fn pause(token: &CancellationToken, ms: u64) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
        _ = token.cancelled() => false,
    }
}

/// What happened to one item of a flat run
#[derive(Debug)]
struct ItemOutcome {
    key: String,
    response: Option<Response>,
    validation: Option<ValidationResult>,
    failure: Option<ItemFailure>,
}

/// Counters and maps accumulated while a run progresses
#[derive(Debug, Default)]
struct RunTally {
    successful: usize,
    failed: usize,
    skipped: usize,
    responses: IndexMap<String, Response>,
    validations: IndexMap<String, ValidationResult>,
    errors: IndexMap<String, ItemFailure>,
    cancelled: bool,
}

impl RunTally {
    fn record(&mut self, outcome: ItemOutcome) {
        if let Some(response) = outcome.response {
            self.responses.insert(outcome.key.clone(), response);
        }
        if let Some(validation) = outcome.validation {
            self.validations.insert(outcome.key.clone(), validation);
        }
        match outcome.failure {
            Some(failure) => {
                self.failed += 1;
                self.errors.insert(outcome.key, failure);
            }
            None => self.successful += 1,
        }
    }
}

/// Runs request lists and workflows
pub struct Executor {
    runtime: Arc<StepRuntime>,
    reporter: Arc<dyn Reporter>,
    registry: Arc<ExecutionRegistry>,
    contexts: Arc<ContextRegistry>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("runtime", &self.runtime)
            .field("active", &self.registry.active_ids())
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

impl Executor {
    /// Executor with the basic validator, tracing reporter and fresh registries
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> ExecutorBuilder {
        ExecutorBuilder::new(transport)
    }

    /// Executor over an [`HttpTransport`] built from `config.http`
    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        let transport = HttpTransport::with_config(&config.http)?;
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<ContextRegistry> {
        &self.contexts
    }

    pub fn runtime(&self) -> &Arc<StepRuntime> {
        &self.runtime
    }

    /// Signal cancellation of an active run
    pub fn abort(&self, execution_id: &str) -> bool {
        let found = self.registry.abort(execution_id);
        if found {
            tracing::info!(execution_id, "abort requested");
        }
        found
    }

    /// Signal every active run; returns how many were signalled
    pub fn abort_all(&self) -> usize {
        let n = self.registry.abort_all();
        tracing::info!(count = n, "abort requested for all runs");
        n
    }

    pub fn get_execution_result(&self, execution_id: &str) -> Option<ExecutionResult> {
        self.registry.get(execution_id)
    }

    /// Drop every stored result
    pub fn clear_results(&self) -> usize {
        self.registry.clear()
    }

    fn notify(&self, event: LifecycleEvent) {
        self.reporter.notify(&event);
    }

    /// Run a flat list of requests under `options.mode`.
    ///
    /// Returns `Err` only for configuration problems, detected before
    /// anything is dispatched; item failures are recorded in the result.
    pub async fn execute(
        &self,
        items: Vec<RequestDescriptor>,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        options.validate()?;
        if options.mode == ExecutionMode::Workflow {
            return Err(Error::Config(
                "workflow mode needs a workflow; use execute_workflow".into(),
            ));
        }

        let id = options.execution_id.clone().unwrap_or_else(new_execution_id);
        let token = self.registry.register(&id)?;
        let started_at_ms = now_ms();
        let clock = Instant::now();

        self.notify(LifecycleEvent::RunStarted {
            execution_id: id.clone(),
            mode: options.mode,
            total: items.len(),
        });

        let mut tally = RunTally::default();
        match options.mode {
            ExecutionMode::Sequential => {
                self.run_sequential(&id, &items, &options, &token, &mut tally)
                    .await
            }
            ExecutionMode::Parallel => {
                let chunk = options.max_concurrency.unwrap_or(items.len()).max(1);
                self.run_chunked(&id, &items, chunk, None, &options, &token, &mut tally)
                    .await
            }
            ExecutionMode::Batch => {
                self.run_chunked(
                    &id,
                    &items,
                    options.batch_size,
                    options.delay_between_batches_ms,
                    &options,
                    &token,
                    &mut tally,
                )
                .await
            }
            ExecutionMode::Workflow => {}
        }

        Ok(self.finish_run(
            id,
            options.mode,
            items.len(),
            started_at_ms,
            clock,
            tally,
            Vec::new(),
            &options,
        ))
    }

    async fn run_sequential(
        &self,
        id: &str,
        items: &[RequestDescriptor],
        options: &ExecuteOptions,
        token: &CancellationToken,
        tally: &mut RunTally,
    ) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                if let Some(ms) = options.delay_between_requests_ms {
                    if !pause(token, ms).await {
                        tally.cancelled = true;
                        break;
                    }
                }
            }
            if token.is_cancelled() {
                tally.cancelled = true;
                break;
            }

            let outcome = self.run_item(id, item_key(i), item, options).await;
            let failed = outcome.failure.is_some();
            tally.record(outcome);

            if failed && options.stop_on_error {
                tracing::info!(execution_id = %id, index = i, "stopping after failed item");
                break;
            }
        }
    }

    /// Shared by parallel and batch mode: dispatch `chunk_size` items at a
    /// time and await the whole chunk before moving on.
    #[allow(clippy::too_many_arguments)]
    async fn run_chunked(
        &self,
        id: &str,
        items: &[RequestDescriptor],
        chunk_size: usize,
        delay_between_ms: Option<u64>,
        options: &ExecuteOptions,
        token: &CancellationToken,
        tally: &mut RunTally,
    ) {
        for (index, chunk) in items.chunks(chunk_size).enumerate() {
            if index > 0 {
                if let Some(ms) = delay_between_ms {
                    if !pause(token, ms).await {
                        tally.cancelled = true;
                        break;
                    }
                }
            }
            if token.is_cancelled() {
                tally.cancelled = true;
                break;
            }

            self.notify(LifecycleEvent::BatchStarted {
                execution_id: id.to_string(),
                index,
                size: chunk.len(),
            });

            let base = index * chunk_size;
            let outcomes = join_all(
                chunk
                    .iter()
                    .enumerate()
                    .map(|(j, item)| self.run_item(id, item_key(base + j), item, options)),
            )
            .await;

            let failed = outcomes.iter().filter(|o| o.failure.is_some()).count();
            let successful = outcomes.len() - failed;
            for outcome in outcomes {
                tally.record(outcome);
            }

            self.notify(LifecycleEvent::BatchCompleted {
                execution_id: id.to_string(),
                index,
                successful,
                failed,
            });

            if failed > 0 && options.stop_on_error {
                tracing::info!(execution_id = %id, batch = index, "stopping after failed batch");
                break;
            }
        }
    }

    /// Send one item, apply its timeout and optional validation
    async fn run_item(
        &self,
        id: &str,
        key: String,
        item: &RequestDescriptor,
        options: &ExecuteOptions,
    ) -> ItemOutcome {
        self.notify(LifecycleEvent::ItemStarted {
            execution_id: id.to_string(),
            key: key.clone(),
        });
        let started = Instant::now();

        let timeout = item.timeout_ms.map(Duration::from_millis).or(options.timeout());
        let send = self.runtime.transport().send(item);
        let sent = match timeout {
            Some(limit) => tokio::time::timeout(limit, send).await.unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "{} exceeded {}ms",
                    item.label(),
                    limit.as_millis()
                )))
            }),
            None => send.await,
        };

        let mut outcome = ItemOutcome {
            key,
            response: None,
            validation: None,
            failure: None,
        };

        match sent {
            Ok(response) => {
                if options.validate_responses || !item.validations.is_empty() {
                    let validation = self
                        .runtime
                        .validator()
                        .validate(&response, &item.validations)
                        .await;
                    if !validation.valid {
                        outcome.failure = Some(ItemFailure::new(
                            FailureKind::Validation,
                            validation.errors.join("; "),
                        ));
                    }
                    outcome.validation = Some(validation);
                }
                outcome.response = Some(response);
            }
            Err(e) => outcome.failure = Some(ItemFailure::from(&e)),
        }

        match &outcome.failure {
            None => self.notify(LifecycleEvent::ItemSucceeded {
                execution_id: id.to_string(),
                key: outcome.key.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Some(failure) => self.notify(LifecycleEvent::ItemFailed {
                execution_id: id.to_string(),
                key: outcome.key.clone(),
                failure: failure.clone(),
            }),
        }
        outcome
    }

    /// Run a workflow: level its steps, then dispatch level by level.
    ///
    /// Every step in a level runs to completion before the level is judged.
    /// With `stop_on_error`, a failed step that is not `continue_on_error`
    /// stops later levels. Steps that cannot be leveled are recorded as
    /// dependency failures and the run still returns normally.
    pub async fn execute_workflow(
        &self,
        workflow: Workflow,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        options.validate()?;
        workflow.validate()?;

        let id = options.execution_id.clone().unwrap_or_else(new_execution_id);
        let token = self.registry.register(&id)?;

        let outcome = self
            .drive_workflow(&id, Arc::new(workflow), &options, token)
            .await;
        if outcome.is_err() {
            self.registry.release(&id);
        }
        outcome
    }

    async fn drive_workflow(
        &self,
        id: &str,
        workflow: Arc<Workflow>,
        options: &ExecuteOptions,
        token: CancellationToken,
    ) -> Result<ExecutionResult> {
        let ctx = self.contexts.create_with_token(id, token.clone());
        ctx.initialize(Arc::clone(&workflow)).await?;

        let plan = ExecutionPlan::from_workflow(&workflow);
        if let Err(e) = plan.require_complete() {
            tracing::warn!(
                execution_id = %id,
                workflow = %workflow.id,
                error = %e,
                "steps could not be scheduled (cycle or missing dependency)"
            );
        }

        let started_at_ms = now_ms();
        let clock = Instant::now();
        self.notify(LifecycleEvent::RunStarted {
            execution_id: id.to_string(),
            mode: ExecutionMode::Workflow,
            total: workflow.steps.len(),
        });

        ctx.start().await?;

        let settings = RunSettings {
            default_timeout: options.timeout(),
            validate_responses: options.validate_responses,
        };
        let mut tally = RunTally::default();

        for (index, level) in plan.levels.iter().enumerate() {
            if token.is_cancelled() {
                tally.cancelled = true;
                break;
            }

            let steps: Vec<&Step> = level.iter().filter_map(|sid| workflow.step(sid)).collect();
            self.notify(LifecycleEvent::BatchStarted {
                execution_id: id.to_string(),
                index,
                size: steps.len(),
            });

            let reports = join_all(
                steps
                    .iter()
                    .map(|step| self.run_workflow_step(id, step, &ctx, &settings)),
            )
            .await;

            let mut halt = false;
            let (mut ok, mut bad) = (0, 0);
            for (step, report) in steps.iter().zip(reports) {
                match report.status {
                    StepStatus::Succeeded => {
                        ok += 1;
                        tally.successful += 1;
                    }
                    StepStatus::Skipped => tally.skipped += 1,
                    StepStatus::Failed => {
                        bad += 1;
                        tally.failed += 1;
                        if let Some(failure) = report.failure {
                            tally.errors.insert(step.id.clone(), failure);
                        }
                        if !step.continue_on_error {
                            halt = true;
                        }
                    }
                }
            }

            self.notify(LifecycleEvent::BatchCompleted {
                execution_id: id.to_string(),
                index,
                successful: ok,
                failed: bad,
            });

            if halt && options.stop_on_error {
                tracing::info!(execution_id = %id, level = index, "stopping workflow after failed level");
                break;
            }
        }

        for step_id in &plan.unscheduled {
            let failure = ItemFailure::new(
                FailureKind::Dependency,
                format!("step '{}' could not be scheduled (cycle or missing dependency)", step_id),
            );
            ctx.record_step(StepReport {
                step_id: step_id.clone(),
                status: StepStatus::Failed,
                attempts: 0,
                duration_ms: 0,
                failure: Some(failure.clone()),
                skip_reason: None,
            })
            .await;
            tally.failed += 1;
            tally.errors.insert(step_id.clone(), failure);
        }

        if token.is_cancelled() {
            tally.cancelled = true;
            ctx.cancel().await;
        } else {
            ctx.complete().await?;
        }

        let state = ctx.snapshot().await;
        tally.responses = state.responses;
        tally.validations = state.validations;
        for error in state.errors.iter().filter(|e| e.step_id.is_none()) {
            let key = error.source.clone().unwrap_or_else(|| "chain".to_string());
            tally.errors.entry(key).or_insert_with(|| error.failure.clone());
        }

        Ok(self.finish_run(
            id.to_string(),
            ExecutionMode::Workflow,
            workflow.steps.len(),
            started_at_ms,
            clock,
            tally,
            plan.unscheduled.clone(),
            options,
        ))
    }

    async fn run_workflow_step(
        &self,
        id: &str,
        step: &Step,
        ctx: &Arc<ChainContext>,
        settings: &RunSettings,
    ) -> StepReport {
        self.notify(LifecycleEvent::ItemStarted {
            execution_id: id.to_string(),
            key: step.id.clone(),
        });

        let report = self.runtime.execute_step(step, ctx, settings).await;

        match report.status {
            StepStatus::Succeeded => self.notify(LifecycleEvent::ItemSucceeded {
                execution_id: id.to_string(),
                key: step.id.clone(),
                duration_ms: report.duration_ms,
            }),
            StepStatus::Failed => {
                if let Some(failure) = &report.failure {
                    self.notify(LifecycleEvent::ItemFailed {
                        execution_id: id.to_string(),
                        key: step.id.clone(),
                        failure: failure.clone(),
                    });
                }
            }
            StepStatus::Skipped => self.notify(LifecycleEvent::StepSkipped {
                execution_id: id.to_string(),
                step_id: step.id.clone(),
                reason: report.skip_reason.clone().unwrap_or_default(),
            }),
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_run(
        &self,
        id: String,
        mode: ExecutionMode,
        total: usize,
        started_at_ms: u64,
        clock: Instant,
        tally: RunTally,
        unscheduled: Vec<String>,
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let status = ExecutionStatus::derive(total, tally.successful, tally.failed, tally.skipped);
        let mut result = ExecutionResult {
            id,
            mode,
            total,
            successful: tally.successful,
            failed: tally.failed,
            skipped: tally.skipped,
            responses: tally.responses,
            validations: tally.validations,
            errors: tally.errors,
            metrics: None,
            started_at_ms,
            duration_ms: clock.elapsed().as_millis() as u64,
            status,
            unscheduled,
            cancelled: tally.cancelled,
        };
        if options.collect_metrics {
            result.metrics = Some(ResultAggregator::summarize(&result));
        }

        self.registry.finish(result.clone());
        self.notify(LifecycleEvent::RunCompleted {
            execution_id: result.id.clone(),
            status: result.status,
            successful: result.successful,
            failed: result.failed,
            duration_ms: result.duration_ms,
        });
        result
    }
}

/// Builder for [`Executor`]
pub struct ExecutorBuilder {
    runtime: StepRuntime,
    reporter: Arc<dyn Reporter>,
    registry: Arc<ExecutionRegistry>,
    contexts: Arc<ContextRegistry>,
}

impl ExecutorBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            runtime: StepRuntime::new(transport),
            reporter: Arc::new(TracingReporter::default()),
            registry: Arc::new(ExecutionRegistry::new()),
            contexts: Arc::new(ContextRegistry::new()),
        }
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.runtime = self.runtime.with_validator(validator);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Share an existing result registry
    pub fn registry(mut self, registry: Arc<ExecutionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Share an existing context registry
    pub fn contexts(mut self, contexts: Arc<ContextRegistry>) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn handler(mut self, kind: StepKind, handler: Arc<dyn StepHandler>) -> Self {
        self.runtime = self.runtime.with_handler(kind, handler);
        self
    }

    pub fn script<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<ChainContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        self.runtime = self.runtime.with_script(name, f);
        self
    }

    pub fn build(self) -> Executor {
        Executor {
            runtime: Arc::new(self.runtime),
            reporter: self.reporter,
            registry: self.registry,
            contexts: self.contexts,
        }
    }
}
