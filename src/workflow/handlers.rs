//! Step Handlers
//!
//! Every [`StepKind`] is dispatched through a handler table on the
//! [`StepRuntime`]. The runtime also owns the per-step policy shared by the
//! executor and nested `parallel` steps: readiness, skip conditions,
//! retries with backoff, timeouts and cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Map, Value};

use super::context::ChainContext;
use super::definition::{Step, StepConfig, StepKind, StepReport, StepStatus, TransformOp};
use crate::error::ItemFailure;
use crate::path;
use crate::transport::{Response, Transport};
use crate::validate::{BasicValidator, ValidationResult, Validator};
use crate::{Error, Result};

/// Native function callable from `script` steps
pub type ScriptFn =
    Arc<dyn Fn(Arc<ChainContext>) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Run-wide settings a step inherits
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSettings {
    /// Used when the step has no timeout of its own
    pub default_timeout: Option<Duration>,
    /// Validate request responses even when they carry no rules
    pub validate_responses: bool,
}

/// What a handler produced
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub response: Option<Response>,
    pub validation: Option<ValidationResult>,
    pub value: Option<Value>,
}

impl StepOutput {
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }
}

/// Everything a handler needs for one invocation
#[derive(Clone, Copy)]
pub struct StepCall<'a> {
    /// Key under which responses and validations are stored
    pub step_id: &'a str,
    pub config: &'a StepConfig,
    pub ctx: &'a Arc<ChainContext>,
    pub runtime: &'a StepRuntime,
    pub settings: &'a RunSettings,
}

impl<'a> StepCall<'a> {
    fn with(self, step_id: &'a str, config: &'a StepConfig) -> Self {
        Self {
            step_id,
            config,
            ..self
        }
    }
}

/// Executes one step type
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput>;
}

fn mismatch(call: &StepCall<'_>, expected: StepKind) -> Error {
    Error::Step(format!(
        "step '{}': {} handler received {} config",
        call.step_id,
        expected,
        call.config.kind()
    ))
}

pub struct RequestHandler;

#[async_trait]
impl StepHandler for RequestHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Request(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Request));
        };

        let request = call.ctx.render_request(&cfg.request).await;
        let response = call.runtime.transport().send(&request).await?;
        call.ctx.set_response(call.step_id, response.clone()).await;

        for (variable, query) in &cfg.extract {
            call.ctx.extract_value(call.step_id, query, variable).await?;
        }

        let mut validation = None;
        if !request.validations.is_empty() || call.settings.validate_responses {
            let result = call
                .runtime
                .validator()
                .validate(&response, &request.validations)
                .await;
            call.ctx.set_validation(call.step_id, result.clone()).await;
            if !result.valid {
                return Err(Error::Validation(result.errors.join("; ")));
            }
            validation = Some(result);
        }

        Ok(StepOutput {
            response: Some(response),
            validation,
            value: None,
        })
    }
}

pub struct ValidationHandler;

#[async_trait]
impl StepHandler for ValidationHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Validation(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Validation));
        };
        let response = call
            .ctx
            .response(&cfg.response)
            .await
            .ok_or_else(|| Error::NotFound(format!("response '{}'", cfg.response)))?;

        let result = call.runtime.validator().validate(&response, &cfg.rules).await;
        call.ctx.set_validation(call.step_id, result.clone()).await;
        if !result.valid {
            return Err(Error::Validation(result.errors.join("; ")));
        }
        Ok(StepOutput {
            validation: Some(result),
            ..Default::default()
        })
    }
}

pub struct ExtractionHandler;

#[async_trait]
impl StepHandler for ExtractionHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Extraction(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Extraction));
        };
        let mut extracted = Map::new();
        for (variable, query) in &cfg.extract {
            let value = call.ctx.extract_value(&cfg.response, query, variable).await?;
            extracted.insert(variable.clone(), value.unwrap_or(Value::Null));
        }
        Ok(StepOutput::value(Value::Object(extracted)))
    }
}

pub struct TransformationHandler;

#[async_trait]
impl StepHandler for TransformationHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Transformation(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Transformation));
        };
        let ctx = call.ctx;
        for op in &cfg.ops {
            match op {
                TransformOp::Set { variable, value } => {
                    let rendered = ctx.render_value(value).await;
                    ctx.set_variable(variable.clone(), rendered).await;
                }
                TransformOp::Copy { from, to } => {
                    let value = ctx
                        .variable(from)
                        .await
                        .ok_or_else(|| Error::NotFound(format!("variable '{}'", from)))?;
                    ctx.set_variable(to.clone(), value).await;
                }
                TransformOp::Pluck { from, path: query, to } => {
                    let source = ctx
                        .variable(from)
                        .await
                        .ok_or_else(|| Error::NotFound(format!("variable '{}'", from)))?;
                    let value = path::extract(&source, query).unwrap_or(Value::Null);
                    ctx.set_variable(to.clone(), value).await;
                }
                TransformOp::Remove { variable } => {
                    ctx.remove_variable(variable).await;
                }
                TransformOp::Increment { counter, by } => {
                    ctx.increment(counter, *by).await;
                }
                TransformOp::Flag { name, value } => {
                    ctx.set_flag(name.clone(), *value).await;
                }
            }
        }
        Ok(StepOutput::default())
    }
}

pub struct ConditionHandler;

#[async_trait]
impl StepHandler for ConditionHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Condition(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Condition));
        };
        let outcome = call.ctx.evaluate_condition(&cfg.check).await?;
        let name = cfg.flag.clone().unwrap_or_else(|| call.step_id.to_string());
        call.ctx.set_flag(name.clone(), outcome).await;
        call.ctx.set_variable(name, Value::Bool(outcome)).await;
        Ok(StepOutput::value(Value::Bool(outcome)))
    }
}

/// Runs the body once per iteration under the key `{step_id}[{i}]`
pub struct LoopHandler;

#[async_trait]
impl StepHandler for LoopHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Loop(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Loop));
        };

        let items: Vec<Value> = match (&cfg.over, cfg.times) {
            (Some(variable), _) => match call.ctx.variable(variable).await {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(Error::Step(format!(
                        "step '{}': variable '{}' is not an array: {}",
                        call.step_id, variable, other
                    )))
                }
                None => return Err(Error::NotFound(format!("variable '{}'", variable))),
            },
            (None, Some(times)) => (0..times).map(Value::from).collect(),
            (None, None) => {
                return Err(Error::Config(format!(
                    "step '{}': loop needs `over` or `times`",
                    call.step_id
                )))
            }
        };

        let mut outputs = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            if call.ctx.is_cancelled() {
                return Err(Error::Cancelled(format!("step '{}' at iteration {}", call.step_id, i)));
            }
            call.ctx.set_variable(cfg.item_variable.clone(), item).await;
            call.ctx.set_variable(cfg.index_variable.clone(), Value::from(i)).await;

            let key = format!("{}[{}]", call.step_id, i);
            let out = call.runtime.dispatch(call.with(&key, &cfg.body)).await?;
            outputs.push(
                out.value
                    .or_else(|| out.response.map(|r| r.body))
                    .unwrap_or(Value::Null),
            );
        }
        Ok(StepOutput::value(Value::Array(outputs)))
    }
}

pub struct DelayHandler;

#[async_trait]
impl StepHandler for DelayHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Delay(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Delay));
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(cfg.duration_ms)) => Ok(StepOutput::default()),
            _ = call.ctx.cancellation().cancelled() => {
                Err(Error::Cancelled(format!("step '{}' during delay", call.step_id)))
            }
        }
    }
}

/// Runs nested steps concurrently; fails if any nested step failed
pub struct ParallelHandler;

#[async_trait]
impl StepHandler for ParallelHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Parallel(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Parallel));
        };

        let reports = join_all(
            cfg.steps
                .iter()
                .map(|step| call.runtime.execute_step(step, call.ctx, call.settings)),
        )
        .await;

        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .map(|r| r.step_id.as_str())
            .collect();
        if !failed.is_empty() {
            return Err(Error::Step(format!(
                "{} of {} nested steps failed: {}",
                failed.len(),
                reports.len(),
                failed.join(", ")
            )));
        }

        let summary = reports
            .iter()
            .map(|r| (r.step_id.clone(), serde_json::to_value(r.status).unwrap_or(Value::Null)))
            .collect::<Map<_, _>>();
        Ok(StepOutput::value(Value::Object(summary)))
    }
}

pub struct ScriptHandler;

#[async_trait]
impl StepHandler for ScriptHandler {
    async fn run(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let StepConfig::Script(cfg) = call.config else {
            return Err(mismatch(&call, StepKind::Script));
        };
        let script = call
            .runtime
            .script(&cfg.script)
            .ok_or_else(|| Error::NotFound(format!("script '{}'", cfg.script)))?;
        let value = script(Arc::clone(call.ctx)).await?;
        Ok(StepOutput::value(value))
    }
}

/// Collaborators and handler table used to run steps
pub struct StepRuntime {
    transport: Arc<dyn Transport>,
    validator: Arc<dyn Validator>,
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
    scripts: HashMap<String, ScriptFn>,
}

impl std::fmt::Debug for StepRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut scripts: Vec<&String> = self.scripts.keys().collect();
        scripts.sort();
        f.debug_struct("StepRuntime")
            .field("handlers", &self.handlers.len())
            .field("scripts", &scripts)
            .finish()
    }
}

impl StepRuntime {
    /// Runtime with the built-in handler for every step type
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let mut handlers: HashMap<StepKind, Arc<dyn StepHandler>> = HashMap::new();
        handlers.insert(StepKind::Request, Arc::new(RequestHandler));
        handlers.insert(StepKind::Validation, Arc::new(ValidationHandler));
        handlers.insert(StepKind::Extraction, Arc::new(ExtractionHandler));
        handlers.insert(StepKind::Transformation, Arc::new(TransformationHandler));
        handlers.insert(StepKind::Condition, Arc::new(ConditionHandler));
        handlers.insert(StepKind::Loop, Arc::new(LoopHandler));
        handlers.insert(StepKind::Delay, Arc::new(DelayHandler));
        handlers.insert(StepKind::Parallel, Arc::new(ParallelHandler));
        handlers.insert(StepKind::Script, Arc::new(ScriptHandler));

        Self {
            transport,
            validator: Arc::new(BasicValidator),
            handlers,
            scripts: HashMap::new(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the handler for `kind`
    pub fn with_handler(mut self, kind: StepKind, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Register a native function for `script` steps
    pub fn with_script<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<ChainContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let script: ScriptFn = Arc::new(move |ctx: Arc<ChainContext>| {
            Box::pin(f(ctx)) as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        });
        self.scripts.insert(name.into(), script);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn validator(&self) -> &Arc<dyn Validator> {
        &self.validator
    }

    pub fn script(&self, name: &str) -> Option<ScriptFn> {
        self.scripts.get(name).cloned()
    }

    /// Look up the handler for the call's config and run it once
    pub async fn dispatch(&self, call: StepCall<'_>) -> Result<StepOutput> {
        let kind = call.config.kind();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| Error::Config(format!("no handler registered for {} steps", kind)))?;
        handler.run(call).await
    }

    /// Run a step with its timeout and retry policy.
    ///
    /// Makes `retry + 1` attempts, sleeping `100ms * attempt` between them.
    /// Returns the last result and the number of attempts made.
    pub async fn run_with_retry(
        &self,
        step: &Step,
        ctx: &Arc<ChainContext>,
        settings: &RunSettings,
    ) -> (Result<StepOutput>, u32) {
        let max_attempts = step.retry.saturating_add(1);
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .or(settings.default_timeout);

        let mut attempt = 1;
        loop {
            if ctx.is_cancelled() {
                return (Err(Error::Cancelled(format!("step '{}'", step.id))), attempt - 1);
            }

            let call = StepCall {
                step_id: &step.id,
                config: &step.config,
                ctx,
                runtime: self,
                settings,
            };
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, self.dispatch(call))
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::Timeout(format!(
                            "step '{}' exceeded {}ms",
                            step.id,
                            limit.as_millis()
                        )))
                    }),
                None => self.dispatch(call).await,
            };

            match result {
                Ok(output) => return (Ok(output), attempt),
                Err(e) if attempt < max_attempts && !matches!(e, Error::Cancelled(_)) => {
                    tracing::warn!(step = %step.id, attempt, error = %e, "step attempt failed, retrying");
                    let backoff = Duration::from_millis(100 * attempt as u64);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = ctx.cancellation().cancelled() => {
                            return (Err(Error::Cancelled(format!("step '{}'", step.id))), attempt);
                        }
                    }
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    /// Full lifecycle of one step: readiness, condition, execution, record
    /// and callbacks.
    pub async fn execute_step(
        &self,
        step: &Step,
        ctx: &Arc<ChainContext>,
        settings: &RunSettings,
    ) -> StepReport {
        let started = Instant::now();

        if !ctx.is_step_ready(step).await {
            let mut missing = Vec::new();
            for dep in &step.depends_on {
                if ctx.step_report(dep).await.is_none() {
                    missing.push(dep.as_str());
                }
            }
            let failure = ItemFailure::from(&Error::Dependency(format!(
                "step '{}' has unmet dependencies: {}",
                step.id,
                missing.join(", ")
            )));
            return self.finish(step, ctx, StepStatus::Failed, 0, started, Some(failure), None).await;
        }

        if let Some(reason) = ctx.skip_reason(step).await {
            return self.finish(step, ctx, StepStatus::Skipped, 0, started, None, Some(reason)).await;
        }

        let (result, attempts) = self.run_with_retry(step, ctx, settings).await;
        match result {
            Ok(_) => {
                self.finish(step, ctx, StepStatus::Succeeded, attempts, started, None, None)
                    .await
            }
            Err(e) => {
                let failure = ItemFailure::from(&e);
                self.finish(step, ctx, StepStatus::Failed, attempts, started, Some(failure), None)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        step: &Step,
        ctx: &Arc<ChainContext>,
        status: StepStatus,
        attempts: u32,
        started: Instant,
        failure: Option<ItemFailure>,
        skip_reason: Option<String>,
    ) -> StepReport {
        let report = StepReport {
            step_id: step.id.clone(),
            status,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
            failure,
            skip_reason,
        };
        ctx.record_step(report.clone()).await;

        if let Some(workflow) = ctx.workflow() {
            let callback = match status {
                StepStatus::Failed => workflow.on_step_error.clone(),
                _ => workflow.on_step_complete.clone(),
            };
            if let Some(callback) = callback {
                callback(&report);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockReply, MockTransport, RequestDescriptor};
    use crate::validate::ValidationConfig;
    use crate::workflow::definition::{
        Condition, ConditionStep, ExtractionStep, LoopStep, ParallelStep, Workflow,
    };
    use indexmap::IndexMap;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runtime(mock: MockTransport) -> StepRuntime {
        StepRuntime::new(Arc::new(mock))
    }

    fn ctx() -> Arc<ChainContext> {
        Arc::new(ChainContext::new("test"))
    }

    #[tokio::test]
    async fn test_request_step_extracts_and_validates() {
        let rt = runtime(MockTransport::new().route(
            "http://api/login",
            MockReply::json(200, json!({"token": "abc", "user": {"id": 4}})),
        ));
        let ctx = ctx();
        let step = Step::request(
            "login",
            RequestDescriptor::post("http://api/login", json!({}))
                .with_validation(ValidationConfig::Status { expected: vec![200] }),
        )
        .extract("token", "$.token")
        .extract("user_id", "user.id");

        let report = rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert_eq!(ctx.variable("token").await, Some(json!("abc")));
        assert_eq!(ctx.variable("user_id").await, Some(json!(4)));
        assert!(ctx.validation("login").await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_request_uses_interpolated_variables() {
        let mock = Arc::new(MockTransport::new().route("http://api/users/4", MockReply::json(200, json!({}))));
        let rt = StepRuntime::new(mock.clone());
        let ctx = ctx();
        ctx.set_variable("uid", json!(4)).await;
        let step = Step::request("get", RequestDescriptor::get("http://api/users/{{uid}}"));
        let report = rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert_eq!(mock.calls_to("http://api/users/4").len(), 1);
    }

    #[tokio::test]
    async fn test_validate_responses_setting_applies_default_rule() {
        let rt = runtime(MockTransport::new().route("http://api/x", MockReply::json(404, json!({}))));
        let step = Step::request("x", RequestDescriptor::get("http://api/x"));

        let lenient = rt.execute_step(&step, &ctx(), &RunSettings::default()).await;
        assert_eq!(lenient.status, StepStatus::Succeeded);

        let strict = RunSettings {
            validate_responses: true,
            ..Default::default()
        };
        let report = rt.execute_step(&step, &ctx(), &strict).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, crate::error::FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mock = MockTransport::new()
            .route("http://api/flaky", MockReply::fail("reset"))
            .route("http://api/flaky", MockReply::json(200, json!({"ok": true})));
        let rt = runtime(mock);
        let step = Step::request("flaky", RequestDescriptor::get("http://api/flaky")).retry(2);
        let report = rt.execute_step(&step, &ctx(), &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_at_max_count() {
        let mock = MockTransport::new()
            .route("http://api/flaky", MockReply::fail("reset"))
            .route("http://api/flaky", MockReply::json(200, json!({})));
        let rt = runtime(mock);
        let step = Step::request("flaky", RequestDescriptor::get("http://api/flaky")).retry(u32::MAX);
        let report = rt.execute_step(&step, &ctx(), &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let rt = runtime(MockTransport::new().route("http://api/down", MockReply::fail("refused")));
        let step = Step::request("down", RequestDescriptor::get("http://api/down")).retry(1);
        let report = rt.execute_step(&step, &ctx(), &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.failure.unwrap().kind, crate::error::FailureKind::Transport);
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let rt = runtime(MockTransport::new().route(
            "http://api/slow",
            MockReply::json(200, json!({})).delayed(Duration::from_millis(200)),
        ));
        let step = Step::request("slow", RequestDescriptor::get("http://api/slow")).timeout_ms(20);
        let report = rt.execute_step(&step, &ctx(), &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, crate::error::FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_inherited_timeout() {
        let rt = runtime(MockTransport::new());
        let settings = RunSettings {
            default_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let report = rt.execute_step(&Step::delay("wait", 500), &ctx(), &settings).await;
        assert_eq!(report.failure.unwrap().kind, crate::error::FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_unready_step_fails_with_dependency() {
        let rt = runtime(MockTransport::new());
        let step = Step::delay("b", 0).depends_on(&["a"]);
        let report = rt.execute_step(&step, &ctx(), &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, crate::error::FailureKind::Dependency);
    }

    #[tokio::test]
    async fn test_condition_false_skips() {
        let rt = runtime(MockTransport::new());
        let step = Step::delay("gated", 0).when(Condition::Flag { name: "enabled".into() });
        let ctx = ctx();
        let report = rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Skipped);
        assert!(ctx.step_report("gated").await.is_some());
    }

    #[tokio::test]
    async fn test_transformation_ops() {
        let rt = runtime(MockTransport::new());
        let ctx = ctx();
        ctx.set_variable("user", json!({"profile": {"name": "ada"}})).await;
        let step = Step::transform(
            "t",
            vec![
                TransformOp::Set { variable: "greeting".into(), value: json!("hi {{user.profile.name}}") },
                TransformOp::Pluck { from: "user".into(), path: "$.profile.name".into(), to: "name".into() },
                TransformOp::Copy { from: "name".into(), to: "alias".into() },
                TransformOp::Increment { counter: "runs".into(), by: 1 },
                TransformOp::Flag { name: "seen".into(), value: true },
                TransformOp::Remove { variable: "user".into() },
            ],
        );
        let report = rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert_eq!(ctx.variable("greeting").await, Some(json!("hi ada")));
        assert_eq!(ctx.variable("alias").await, Some(json!("ada")));
        assert_eq!(ctx.counter("runs").await, 1);
        assert!(ctx.flag("seen").await);
        assert_eq!(ctx.variable("user").await, None);
    }

    #[tokio::test]
    async fn test_extraction_and_validation_steps() {
        let rt = runtime(MockTransport::new());
        let ctx = ctx();
        ctx.set_response("list", Response::new(200, json!({"items": [{"id": 1}, {"id": 2}]})))
            .await;

        let mut extract = IndexMap::new();
        extract.insert("last".to_string(), "$.items[-1].id".to_string());
        let step = Step::new(
            "pull",
            StepConfig::Extraction(ExtractionStep { response: "list".into(), extract }),
        );
        let report = rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert_eq!(ctx.variable("last").await, Some(json!(2)));

        let check = Step::validation(
            "check",
            "list",
            vec![ValidationConfig::Path { path: "$.items".into(), op: None, value: None }],
        );
        assert_eq!(
            rt.execute_step(&check, &ctx, &RunSettings::default()).await.status,
            StepStatus::Succeeded
        );

        let missing = Step::validation("check2", "nope", vec![]);
        let report = rt.execute_step(&missing, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_condition_step_sets_flag() {
        let rt = runtime(MockTransport::new());
        let ctx = ctx();
        ctx.set_variable("role", json!("admin")).await;
        let step = Step::new(
            "is_admin",
            StepConfig::Condition(ConditionStep {
                check: Condition::Equals { variable: "role".into(), value: json!("admin") },
                flag: None,
            }),
        );
        rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert!(ctx.flag("is_admin").await);
        assert_eq!(ctx.variable("is_admin").await, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_loop_over_variable() {
        let mock = Arc::new(
            MockTransport::new()
                .route("http://api/items/1", MockReply::json(200, json!({"n": 1})))
                .route("http://api/items/2", MockReply::json(200, json!({"n": 2}))),
        );
        let rt = StepRuntime::new(mock.clone());
        let ctx = ctx();
        ctx.set_variable("ids", json!([1, 2])).await;

        let body = StepConfig::Request(crate::workflow::definition::RequestStep {
            request: RequestDescriptor::get("http://api/items/{{item}}"),
            extract: IndexMap::new(),
        });
        let step = Step::new(
            "fetch",
            StepConfig::Loop(LoopStep {
                over: Some("ids".into()),
                times: None,
                body: Box::new(body),
                item_variable: "item".into(),
                index_variable: "index".into(),
            }),
        );
        let report = rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert!(ctx.response("fetch[0]").await.is_some());
        assert_eq!(ctx.response("fetch[1]").await.unwrap().body, json!({"n": 2}));
        assert_eq!(ctx.variable("index").await, Some(json!(1)));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_parallel_step_reports_nested_failures() {
        let rt = runtime(
            MockTransport::new()
                .route("http://api/a", MockReply::json(200, json!({})))
                .route("http://api/b", MockReply::fail("down")),
        );
        let ctx = ctx();
        let step = Step::new(
            "fan",
            StepConfig::Parallel(ParallelStep {
                steps: vec![
                    Step::request("a", RequestDescriptor::get("http://api/a")),
                    Step::request("b", RequestDescriptor::get("http://api/b")),
                ],
            }),
        );
        let report = rt.execute_step(&step, &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Failed);
        assert!(report.failure.unwrap().message.contains("1 of 2"));
        assert_eq!(ctx.step_report("a").await.unwrap().status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_script_step() {
        let rt = runtime(MockTransport::new()).with_script("double", |ctx: Arc<ChainContext>| async move {
            let n = ctx.variable("n").await.and_then(|v| v.as_i64()).unwrap_or(0);
            ctx.set_variable("doubled", json!(n * 2)).await;
            Ok(json!(n * 2))
        });
        let ctx = ctx();
        ctx.set_variable("n", json!(21)).await;
        let report = rt.execute_step(&Step::script("s", "double"), &ctx, &RunSettings::default()).await;
        assert_eq!(report.status, StepStatus::Succeeded);
        assert_eq!(ctx.variable("doubled").await, Some(json!(42)));

        let missing = rt.execute_step(&Step::script("m", "nope"), &ctx, &RunSettings::default()).await;
        assert_eq!(missing.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_delay_is_cancellable() {
        let rt = runtime(MockTransport::new());
        let ctx = ctx();
        let token = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let started = Instant::now();
        let report = rt.execute_step(&Step::delay("d", 5_000), &ctx, &RunSettings::default()).await;
        assert_eq!(report.failure.unwrap().kind, crate::error::FailureKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_callbacks_fire() {
        let completed = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));
        let (c, e) = (completed.clone(), errored.clone());
        let wf = Workflow::define("wf")
            .on_step_complete(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_step_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let ctx = ctx();
        ctx.initialize(Arc::new(wf)).await.unwrap();

        let rt = runtime(MockTransport::new());
        rt.execute_step(&Step::delay("ok", 0), &ctx, &RunSettings::default()).await;
        rt.execute_step(&Step::script("bad", "missing"), &ctx, &RunSettings::default()).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(errored.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_handler_overrides_builtin() {
        struct Fixed;
        #[async_trait]
        impl StepHandler for Fixed {
            async fn run(&self, _call: StepCall<'_>) -> Result<StepOutput> {
                Ok(StepOutput::value(json!("fixed")))
            }
        }
        let rt = runtime(MockTransport::new()).with_handler(StepKind::Delay, Arc::new(Fixed));
        let out = rt
            .dispatch(StepCall {
                step_id: "d",
                config: &Step::delay("d", 10_000).config,
                ctx: &ctx(),
                runtime: &rt,
                settings: &RunSettings::default(),
            })
            .await
            .unwrap();
        assert_eq!(out.value, Some(json!("fixed")));
    }
}
