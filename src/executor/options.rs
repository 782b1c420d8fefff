use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Dispatch strategy for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One item at a time, in list order
    #[default]
    Sequential,
    /// Chunks of `max_concurrency` items dispatched concurrently
    Parallel,
    /// Chunks of `batch_size` items with an optional pause between batches
    Batch,
    /// Dependency-leveled workflow steps
    Workflow,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Batch => "batch",
            ExecutionMode::Workflow => "workflow",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            "batch" => Ok(ExecutionMode::Batch),
            "workflow" => Ok(ExecutionMode::Workflow),
            other => Err(Error::Config(format!("unknown execution mode '{}'", other))),
        }
    }
}

pub const DEFAULT_BATCH_SIZE: usize = 10;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Options for one `execute` / `execute_workflow` call.
///
/// Durations deserialize from integer milliseconds or humantime strings
/// (`"250ms"`, `"2s"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    pub mode: ExecutionMode,
    /// Chunk size in parallel mode; all items at once when unset
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(with = "crate::config::opt_duration_ms")]
    pub delay_between_requests_ms: Option<u64>,
    #[serde(with = "crate::config::opt_duration_ms")]
    pub delay_between_batches_ms: Option<u64>,
    pub stop_on_error: bool,
    /// Per-item timeout, inherited by workflow steps without their own
    #[serde(with = "crate::config::opt_duration_ms")]
    pub timeout_ms: Option<u64>,
    pub validate_responses: bool,
    pub collect_metrics: bool,
    /// Use this id instead of generating one
    pub execution_id: Option<String>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            max_concurrency: None,
            batch_size: DEFAULT_BATCH_SIZE,
            delay_between_requests_ms: None,
            delay_between_batches_ms: None,
            stop_on_error: false,
            timeout_ms: None,
            validate_responses: false,
            collect_metrics: false,
            execution_id: None,
        }
    }
}

impl ExecuteOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel(max_concurrency: usize) -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_concurrency: Some(max_concurrency),
            ..Self::default()
        }
    }

    pub fn batch(batch_size: usize) -> Self {
        Self {
            mode: ExecutionMode::Batch,
            batch_size,
            ..Self::default()
        }
    }

    pub fn workflow() -> Self {
        Self {
            mode: ExecutionMode::Workflow,
            ..Self::default()
        }
    }

    pub fn with_delay_between_requests_ms(mut self, ms: u64) -> Self {
        self.delay_between_requests_ms = Some(ms);
        self
    }

    pub fn with_delay_between_batches_ms(mut self, ms: u64) -> Self {
        self.delay_between_batches_ms = Some(ms);
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn stop_on_error(mut self) -> Self {
        self.stop_on_error = true;
        self
    }

    pub fn validate_responses(mut self) -> Self {
        self.validate_responses = true;
        self
    }

    pub fn collect_metrics(mut self) -> Self {
        self.collect_metrics = true;
        self
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == Some(0) {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        if matches!(&self.execution_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::Config("execution_id must not be empty".into()));
        }
        Ok(())
    }
}
