//! Execution registry: finished results plus cancellation tokens of runs in
//! flight. Results stay until the caller removes or clears them.

use std::collections::HashMap;
use std::sync::Mutex;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use super::result::ExecutionResult;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    results: Mutex<IndexMap<String, ExecutionResult>>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active run and hand back its token.
    /// Fails if a run with the same id is still active.
    pub fn register(&self, id: &str) -> Result<CancellationToken> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.contains_key(id) {
            return Err(Error::Config(format!("execution '{}' is already running", id)));
        }
        let token = CancellationToken::new();
        active.insert(id.to_string(), token.clone());
        Ok(token)
    }

    /// Store a finished result and retire its token
    pub fn finish(&self, result: ExecutionResult) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&result.id);
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(result.id.clone(), result);
    }

    /// Retire a token without storing a result (the run errored out)
    pub fn release(&self, id: &str) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Signal cancellation for an active run
    pub fn abort(&self, id: &str) -> bool {
        match self.active.lock().unwrap_or_else(|e| e.into_inner()).get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every active run; returns how many were signalled
    pub fn abort_all(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for token in active.values() {
            token.cancel();
        }
        active.len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<ExecutionResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Ids of stored results, oldest first
    pub fn list_ids(&self) -> Vec<String> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn remove(&self, id: &str) -> Option<ExecutionResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shift_remove(id)
    }

    /// Drop every stored result; active runs are untouched
    pub fn clear(&self) -> usize {
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        let n = results.len();
        results.clear();
        n
    }
}
