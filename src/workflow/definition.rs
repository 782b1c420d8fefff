//! Workflow Definition
//!
//! A [`Workflow`] is an ordered list of [`Step`]s with dependency edges,
//! seed variables and optional lifecycle hooks. Step configuration is a
//! tagged union keyed by step type; each variant carries only the fields its
//! handler needs.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{ChainContext, ChainState};
use crate::error::ItemFailure;
use crate::path::{self, CmpOp};
use crate::transport::RequestDescriptor;
use crate::validate::ValidationConfig;
use crate::{Error, Result};

/// Async setup/teardown hook
pub type HookFn =
    Arc<dyn Fn(Arc<ChainContext>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Per-step completion/error callback
pub type StepCallback = Arc<dyn Fn(&StepReport) + Send + Sync>;

/// Programmatic step condition
pub type PredicateFn = Arc<dyn Fn(&ChainState) -> Result<bool> + Send + Sync>;

/// Step type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Request,
    Validation,
    Extraction,
    Transformation,
    Condition,
    Loop,
    Delay,
    Parallel,
    Script,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::Request => "request",
            StepKind::Validation => "validation",
            StepKind::Extraction => "extraction",
            StepKind::Transformation => "transformation",
            StepKind::Condition => "condition",
            StepKind::Loop => "loop",
            StepKind::Delay => "delay",
            StepKind::Parallel => "parallel",
            StepKind::Script => "script",
        };
        f.write_str(s)
    }
}

/// Send a request, then pull values out of the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStep {
    pub request: RequestDescriptor,
    /// variable name -> path into the response body
    #[serde(default)]
    pub extract: IndexMap<String, String>,
}

/// Validate a response stored under `response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStep {
    pub response: String,
    #[serde(default)]
    pub rules: Vec<ValidationConfig>,
}

/// Extract values from a response stored under `response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStep {
    pub response: String,
    pub extract: IndexMap<String, String>,
}

/// One variable-store operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    /// Set a variable; string values are rendered as templates
    Set { variable: String, value: Value },
    Copy { from: String, to: String },
    /// Apply a path to a variable's value and store the result
    Pluck { from: String, path: String, to: String },
    Remove { variable: String },
    Increment {
        counter: String,
        #[serde(default = "default_increment")]
        by: i64,
    },
    Flag { name: String, value: bool },
}

fn default_increment() -> i64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationStep {
    pub ops: Vec<TransformOp>,
}

/// Evaluate a condition and store the outcome as a flag and variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionStep {
    /// Named `check` so it does not collide with the step's own gating condition
    pub check: Condition,
    /// Flag/variable name for the outcome; the step id when omitted
    #[serde(default)]
    pub flag: Option<String>,
}

/// Run `body` once per element of the array variable `over`, or `times` times
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStep {
    #[serde(default)]
    pub over: Option<String>,
    #[serde(default)]
    pub times: Option<usize>,
    pub body: Box<StepConfig>,
    #[serde(default = "default_item_variable")]
    pub item_variable: String,
    #[serde(default = "default_index_variable")]
    pub index_variable: String,
}

fn default_item_variable() -> String {
    "item".to_string()
}

fn default_index_variable() -> String {
    "index".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayStep {
    #[serde(with = "crate::config::duration_ms")]
    pub duration_ms: u64,
}

/// Run nested steps concurrently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelStep {
    pub steps: Vec<Step>,
}

/// Invoke a native function registered on the step runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub script: String,
}

/// Type-specific step configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    Request(RequestStep),
    Validation(ValidationStep),
    Extraction(ExtractionStep),
    Transformation(TransformationStep),
    Condition(ConditionStep),
    Loop(LoopStep),
    Delay(DelayStep),
    Parallel(ParallelStep),
    Script(ScriptStep),
}

impl StepConfig {
    pub fn kind(&self) -> StepKind {
        match self {
            StepConfig::Request(_) => StepKind::Request,
            StepConfig::Validation(_) => StepKind::Validation,
            StepConfig::Extraction(_) => StepKind::Extraction,
            StepConfig::Transformation(_) => StepKind::Transformation,
            StepConfig::Condition(_) => StepKind::Condition,
            StepConfig::Loop(_) => StepKind::Loop,
            StepConfig::Delay(_) => StepKind::Delay,
            StepConfig::Parallel(_) => StepKind::Parallel,
            StepConfig::Script(_) => StepKind::Script,
        }
    }
}

/// Wrapper giving a programmatic predicate a `Debug` impl
#[derive(Clone)]
pub struct StepPredicate(pub PredicateFn);

impl std::fmt::Debug for StepPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StepPredicate(<fn>)")
    }
}

/// Condition gating a step, evaluated against the current chain state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum Condition {
    Exists { variable: String },
    Equals { variable: String, value: Value },
    NotEquals { variable: String, value: Value },
    Flag { name: String },
    /// Compare a value inside a stored response
    Path {
        response: String,
        path: String,
        #[serde(default)]
        op: Option<CmpOp>,
        #[serde(default)]
        value: Option<Value>,
    },
    Not { condition: Box<Condition> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    #[serde(skip)]
    Custom(StepPredicate),
}

impl Condition {
    /// Programmatic condition
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&ChainState) -> Result<bool> + Send + Sync + 'static,
    {
        Condition::Custom(StepPredicate(Arc::new(f)))
    }

    /// Evaluate against `state`. Errors mean the condition could not be
    /// decided; callers treat that as "skip".
    pub fn evaluate(&self, state: &ChainState) -> Result<bool> {
        match self {
            Condition::Exists { variable } => Ok(state.variables.contains_key(variable)),
            Condition::Equals { variable, value } => Ok(state
                .variables
                .get(variable)
                .map(|v| path::compare(v, CmpOp::Eq, value))
                .unwrap_or(false)),
            Condition::NotEquals { variable, value } => Ok(state
                .variables
                .get(variable)
                .map(|v| path::compare(v, CmpOp::Ne, value))
                .unwrap_or(true)),
            Condition::Flag { name } => Ok(state.flags.get(name).copied().unwrap_or(false)),
            Condition::Path {
                response,
                path: query,
                op,
                value,
            } => {
                let stored = state
                    .responses
                    .get(response)
                    .ok_or_else(|| Error::NotFound(format!("response '{}'", response)))?;
                let actual = path::extract(&stored.body, query);
                Ok(match (actual, op, value) {
                    (None, _, _) => false,
                    (Some(actual), Some(op), Some(expected)) => path::compare(&actual, *op, expected),
                    (Some(actual), None, Some(expected)) => path::compare(&actual, CmpOp::Eq, expected),
                    (Some(_), _, None) => true,
                })
            }
            Condition::Not { condition } => Ok(!condition.evaluate(state)?),
            Condition::All { conditions } => {
                for c in conditions {
                    if !c.evaluate(state)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { conditions } => {
                for c in conditions {
                    if c.evaluate(state)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Custom(predicate) => (predicate.0)(state),
        }
    }
}

/// A single step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step id (must be unique within workflow)
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub config: StepConfig,
    /// Steps that must have a recorded result before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Extra attempts after the first failure
    #[serde(default)]
    pub retry: u32,
    #[serde(default, with = "crate::config::opt_duration_ms")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Step {
    pub fn new(id: impl Into<String>, config: StepConfig) -> Self {
        Self {
            id: id.into(),
            name: None,
            config,
            depends_on: Vec::new(),
            condition: None,
            retry: 0,
            timeout_ms: None,
            continue_on_error: false,
        }
    }

    pub fn request(id: impl Into<String>, request: RequestDescriptor) -> Self {
        Self::new(
            id,
            StepConfig::Request(RequestStep {
                request,
                extract: IndexMap::new(),
            }),
        )
    }

    pub fn delay(id: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(id, StepConfig::Delay(DelayStep { duration_ms }))
    }

    pub fn script(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(id, StepConfig::Script(ScriptStep { script: script.into() }))
    }

    pub fn validation(id: impl Into<String>, response: impl Into<String>, rules: Vec<ValidationConfig>) -> Self {
        Self::new(
            id,
            StepConfig::Validation(ValidationStep {
                response: response.into(),
                rules,
            }),
        )
    }

    pub fn transform(id: impl Into<String>, ops: Vec<TransformOp>) -> Self {
        Self::new(id, StepConfig::Transformation(TransformationStep { ops }))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        for id in ids {
            if !self.depends_on.iter().any(|d| d == id) {
                self.depends_on.push(id.to_string());
            }
        }
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn retry(mut self, retries: u32) -> Self {
        self.retry = retries;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Add an extraction rule; only meaningful on request and extraction steps
    pub fn extract(mut self, variable: impl Into<String>, path: impl Into<String>) -> Self {
        match &mut self.config {
            StepConfig::Request(cfg) => {
                cfg.extract.insert(variable.into(), path.into());
            }
            StepConfig::Extraction(cfg) => {
                cfg.extract.insert(variable.into(), path.into());
            }
            _ => {}
        }
        self
    }

    pub fn kind(&self) -> StepKind {
        self.config.kind()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Terminal status of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// What happened to one step, passed to callbacks and collected by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub failure: Option<ItemFailure>,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

/// A complete workflow definition
#[derive(Clone)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    /// Steps in declaration order
    pub steps: Vec<Step>,
    /// Seed variables copied into the chain context on initialization
    pub variables: IndexMap<String, Value>,
    pub setup: Option<HookFn>,
    pub teardown: Option<HookFn>,
    pub on_step_complete: Option<StepCallback>,
    pub on_step_error: Option<StepCallback>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| &s.id).collect::<Vec<_>>())
            .field("variables", &self.variables)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

impl Workflow {
    /// Start building a new workflow
    pub fn define(id: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(id)
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Structural checks run before anything is dispatched.
    ///
    /// Step ids (including steps nested in `parallel` steps) must be
    /// non-empty and unique. Unknown dependency ids and cycles are not
    /// rejected here; dependency leveling reports them instead.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("workflow id must not be empty".into()));
        }

        let mut seen = HashSet::new();
        validate_steps(&self.steps, &mut seen)
    }
}

fn validate_steps<'a>(steps: &'a [Step], seen: &mut HashSet<&'a str>) -> Result<()> {
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(Error::Config("step id must not be empty".into()));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(Error::Config(format!("duplicate step id '{}'", step.id)));
        }
        validate_config(&step.id, &step.config)?;
        if let StepConfig::Parallel(cfg) = &step.config {
            validate_steps(&cfg.steps, seen)?;
        }
    }
    Ok(())
}

fn validate_config(step_id: &str, config: &StepConfig) -> Result<()> {
    match config {
        StepConfig::Request(cfg) if cfg.request.url.trim().is_empty() => Err(Error::Config(format!(
            "step '{}': request url must not be empty",
            step_id
        ))),
        StepConfig::Loop(cfg) => {
            if cfg.over.is_none() && cfg.times.is_none() {
                return Err(Error::Config(format!(
                    "step '{}': loop needs `over` or `times`",
                    step_id
                )));
            }
            validate_config(step_id, &cfg.body)
        }
        StepConfig::Script(cfg) if cfg.script.trim().is_empty() => Err(Error::Config(format!(
            "step '{}': script name must not be empty",
            step_id
        ))),
        _ => Ok(()),
    }
}

/// Builder for creating workflows
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            workflow: Workflow {
                name: id.clone(),
                id,
                steps: Vec::new(),
                variables: IndexMap::new(),
                setup: None,
                teardown: None,
                on_step_complete: None,
                on_step_error: None,
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.workflow.name = name.into();
        self
    }

    /// Seed a variable
    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.workflow.variables.insert(name.into(), value);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.workflow.steps.push(step);
        self
    }

    /// Add a request step
    pub fn request(self, id: impl Into<String>, request: RequestDescriptor) -> Self {
        self.step(Step::request(id, request))
    }

    pub fn setup<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<ChainContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.workflow.setup = Some(into_hook(f));
        self
    }

    pub fn teardown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<ChainContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.workflow.teardown = Some(into_hook(f));
        self
    }

    pub fn on_step_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepReport) + Send + Sync + 'static,
    {
        self.workflow.on_step_complete = Some(Arc::new(f));
        self
    }

    pub fn on_step_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepReport) + Send + Sync + 'static,
    {
        self.workflow.on_step_error = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Workflow {
        self.workflow
    }
}

fn into_hook<F, Fut>(f: F) -> HookFn
where
    F: Fn(Arc<ChainContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx: Arc<ChainContext>| {
        let fut = f(ctx);
        Box::pin(fut) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
    })
}
