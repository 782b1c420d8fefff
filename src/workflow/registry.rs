//! Registry of live chain contexts, keyed by execution id.
//!
//! Constructed explicitly and shared by whoever needs it; the executor
//! creates contexts here but never removes them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use super::context::ChainContext;

#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: RwLock<HashMap<String, Arc<ChainContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context for `id`, replacing any existing one
    pub fn create(&self, id: impl Into<String>) -> Arc<ChainContext> {
        self.create_with_token(id, CancellationToken::new())
    }

    pub fn create_with_token(&self, id: impl Into<String>, token: CancellationToken) -> Arc<ChainContext> {
        let id = id.into();
        let ctx = Arc::new(ChainContext::with_token(id.clone(), token));
        let mut contexts = self.contexts.write().unwrap_or_else(|e| e.into_inner());
        if contexts.insert(id.clone(), Arc::clone(&ctx)).is_some() {
            tracing::debug!(context = %id, "replaced existing chain context");
        }
        ctx
    }

    pub fn get(&self, id: &str) -> Option<Arc<ChainContext>> {
        self.contexts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ChainContext>> {
        self.contexts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    /// Replace an existing context with a fresh one under the same id.
    /// Returns `None` if `id` is unknown.
    pub fn reset(&self, id: &str) -> Option<Arc<ChainContext>> {
        let mut contexts = self.contexts.write().unwrap_or_else(|e| e.into_inner());
        if !contexts.contains_key(id) {
            return None;
        }
        let fresh = Arc::new(ChainContext::new(id));
        contexts.insert(id.to_string(), Arc::clone(&fresh));
        Some(fresh)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .contexts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.contexts.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.contexts.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
