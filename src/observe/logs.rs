//! Reporter implementations
//!
//! - [`TracingReporter`]: structured `tracing` events (the default)
//! - [`MemoryReporter`]: keeps events in memory (useful for tests)
//! - [`ChannelReporter`]: forwards events into an unbounded channel
//! - [`NoopReporter`]: discards everything

use std::sync::Mutex;

use tokio::sync::mpsc;

use super::{LifecycleEvent, Reporter};

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Emits lifecycle events as `tracing` events.
///
/// Run and batch events go out at `run_level`, per-item events at
/// `item_level`. Item failures are always logged at `warn`.
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter {
    pub run_level: LogLevel,
    pub item_level: LogLevel,
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self {
            run_level: LogLevel::Info,
            item_level: LogLevel::Debug,
        }
    }
}

macro_rules! emit {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => tracing::trace!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
            LogLevel::Error => tracing::error!($($arg)+),
        }
    };
}

impl Reporter for TracingReporter {
    fn notify(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::RunStarted { execution_id, mode, total } => {
                emit!(self.run_level, execution_id = %execution_id, ?mode, total, "run started")
            }
            LifecycleEvent::RunCompleted {
                execution_id,
                status,
                successful,
                failed,
                duration_ms,
            } => emit!(
                self.run_level,
                execution_id = %execution_id,
                ?status,
                successful,
                failed,
                duration_ms,
                "run completed"
            ),
            LifecycleEvent::BatchStarted { execution_id, index, size } => {
                emit!(self.run_level, execution_id = %execution_id, index, size, "batch started")
            }
            LifecycleEvent::BatchCompleted {
                execution_id,
                index,
                successful,
                failed,
            } => emit!(
                self.run_level,
                execution_id = %execution_id,
                index,
                successful,
                failed,
                "batch completed"
            ),
            LifecycleEvent::ItemStarted { execution_id, key } => {
                emit!(self.item_level, execution_id = %execution_id, key = %key, "item started")
            }
            LifecycleEvent::ItemSucceeded {
                execution_id,
                key,
                duration_ms,
            } => emit!(
                self.item_level,
                execution_id = %execution_id,
                key = %key,
                duration_ms,
                "item succeeded"
            ),
            LifecycleEvent::ItemFailed {
                execution_id,
                key,
                failure,
            } => tracing::warn!(
                execution_id = %execution_id,
                key = %key,
                kind = %failure.kind,
                "item failed: {}",
                failure.message
            ),
            LifecycleEvent::StepSkipped {
                execution_id,
                step_id,
                reason,
            } => emit!(
                self.item_level,
                execution_id = %execution_id,
                step_id = %step_id,
                "step skipped: {}",
                reason
            ),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<LifecycleEvent>>,
    max_entries: Option<usize>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max` events, dropping the oldest
    pub fn bounded(max: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_entries: Some(max),
        }
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events with the given [`LifecycleEvent::name`]
    pub fn named(&self, name: &str) -> Vec<LifecycleEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Reporter for MemoryReporter {
    fn notify(&self, event: &LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            if let Some(max) = self.max_entries {
                if events.len() >= max && !events.is_empty() {
                    events.remove(0);
                }
            }
            events.push(event.clone());
        }
    }
}

/// Forwards events into an unbounded channel; a dropped receiver is ignored
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn notify(&self, event: &LifecycleEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn notify(&self, _event: &LifecycleEvent) {}
}
