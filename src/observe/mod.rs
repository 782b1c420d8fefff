//! Observability Module
//!
//! Lifecycle notifications and run metrics for reqchain executions:
//! - [`Reporter`]: fire-and-forget lifecycle events (run, batch, item)
//! - [`logs`]: reporters that emit to `tracing`, memory or a channel
//! - [`metrics`]: post-hoc latency/throughput summaries of a finished run
//!
//! Reporters are called inline by the scheduler and must never block.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reqchain::observe::{init_logging, TracingReporter};
//!
//! init_logging("info");
//! let reporter = Arc::new(TracingReporter::default());
//! ```

pub mod logs;
pub mod metrics;

use serde::Serialize;

use crate::error::ItemFailure;
use crate::executor::{ExecutionMode, ExecutionStatus};

pub use logs::{ChannelReporter, LogLevel, MemoryReporter, NoopReporter, TracingReporter};
pub use metrics::{ExecutionMetrics, ResultAggregator};

/// A lifecycle notification emitted while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    RunStarted {
        execution_id: String,
        mode: ExecutionMode,
        total: usize,
    },
    RunCompleted {
        execution_id: String,
        status: ExecutionStatus,
        successful: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// A chunk, batch or dependency level is about to be dispatched
    BatchStarted {
        execution_id: String,
        index: usize,
        size: usize,
    },
    BatchCompleted {
        execution_id: String,
        index: usize,
        successful: usize,
        failed: usize,
    },
    ItemStarted {
        execution_id: String,
        key: String,
    },
    ItemSucceeded {
        execution_id: String,
        key: String,
        duration_ms: u64,
    },
    ItemFailed {
        execution_id: String,
        key: String,
        failure: ItemFailure,
    },
    StepSkipped {
        execution_id: String,
        step_id: String,
        reason: String,
    },
}

impl LifecycleEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            LifecycleEvent::RunStarted { execution_id, .. }
            | LifecycleEvent::RunCompleted { execution_id, .. }
            | LifecycleEvent::BatchStarted { execution_id, .. }
            | LifecycleEvent::BatchCompleted { execution_id, .. }
            | LifecycleEvent::ItemStarted { execution_id, .. }
            | LifecycleEvent::ItemSucceeded { execution_id, .. }
            | LifecycleEvent::ItemFailed { execution_id, .. }
            | LifecycleEvent::StepSkipped { execution_id, .. } => execution_id,
        }
    }

    /// Short event name, e.g. `item_failed`
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::RunStarted { .. } => "run_started",
            LifecycleEvent::RunCompleted { .. } => "run_completed",
            LifecycleEvent::BatchStarted { .. } => "batch_started",
            LifecycleEvent::BatchCompleted { .. } => "batch_completed",
            LifecycleEvent::ItemStarted { .. } => "item_started",
            LifecycleEvent::ItemSucceeded { .. } => "item_succeeded",
            LifecycleEvent::ItemFailed { .. } => "item_failed",
            LifecycleEvent::StepSkipped { .. } => "step_skipped",
        }
    }
}

/// Receives lifecycle notifications.
///
/// Called synchronously from the scheduler between suspension points, so
/// implementations must return promptly and never wait on I/O.
pub trait Reporter: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

/// Install a `tracing` subscriber reading `RUST_LOG`, falling back to
/// `default_filter`. Safe to call more than once; later calls are no-ops.
pub fn init_logging(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init();
}
