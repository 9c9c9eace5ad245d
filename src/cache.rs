//! In-memory cache of active model records.
//!
//! Request-time validation reads from here; the store is only consulted when
//! the cache is empty, expired or explicitly invalidated after a sync.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::pricing::ModelRecord;
use crate::store::{ModelStore, StoreError};

#[derive(Default)]
struct CacheState {
    models: HashMap<String, ModelRecord>,
    loaded_at: Option<Instant>,
}

/// Shared, TTL-bounded view of the active catalog.
#[derive(Clone)]
pub struct ModelCache {
    state: Arc<RwLock<CacheState>>,
    store: ModelStore,
    ttl: Duration,
}

impl ModelCache {
    pub fn new(store: ModelStore, ttl: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(CacheState::default())),
            store,
            ttl,
        }
    }

    fn is_fresh(&self, state: &CacheState) -> bool {
        state
            .loaded_at
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Reload from the store if the cached copy is missing or stale.
    async fn ensure_loaded(&self) -> Result<(), StoreError> {
        {
            let state = self.state.read().await;
            if self.is_fresh(&state) {
                return Ok(());
            }
        }

        let mut state = self.state.write().await;
        // Another task may have reloaded while we waited for the write lock.
        if self.is_fresh(&state) {
            return Ok(());
        }
        let records = self.store.list_models(true).await?;
        tracing::debug!(model_count = records.len(), "Reloaded model cache from database");
        state.models = records
            .into_iter()
            .map(|r| (r.model_id.clone(), r))
            .collect();
        state.loaded_at = Some(Instant::now());
        Ok(())
    }

    /// All active models, sorted by id.
    pub async fn get_all(&self) -> Result<Vec<ModelRecord>, StoreError> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        let mut models: Vec<ModelRecord> = state.models.values().cloned().collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    pub async fn get(&self, model_id: &str) -> Result<Option<ModelRecord>, StoreError> {
        self.ensure_loaded().await?;
        Ok(self.state.read().await.models.get(model_id).cloned())
    }

    /// Look up an id ignoring ASCII case, returning the canonical record.
    pub async fn find_case_insensitive(
        &self,
        model_id: &str,
    ) -> Result<Option<ModelRecord>, StoreError> {
        self.ensure_loaded().await?;
        let state = self.state.read().await;
        if let Some(exact) = state.models.get(model_id) {
            return Ok(Some(exact.clone()));
        }
        let wanted = model_id.trim().to_lowercase();
        Ok(state
            .models
            .values()
            .find(|m| m.model_id.to_lowercase() == wanted)
            .cloned())
    }

    pub async fn model_count(&self) -> Result<usize, StoreError> {
        self.ensure_loaded().await?;
        Ok(self.state.read().await.models.len())
    }

    /// Drop the cached catalog; the next read reloads from the store.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.models.clear();
        state.loaded_at = None;
        tracing::debug!("Model cache invalidated");
    }
}
