//! Catalog synchronization pipeline.
//!
//! fetch → normalize → drift check → persist → cache invalidate.
//!
//! The pipeline is resilient by construction: nothing is written until the
//! whole catalog has been fetched and normalized, and the database write is
//! a single transaction, so a failure leaves the previous catalog in place.

mod updater;

use std::time::Instant;

use serde::Serialize;

pub use updater::{AutoUpdater, UpdaterHandle, UpdaterStatus};

use crate::cache::ModelCache;
use crate::catalog::{CatalogClient, CatalogError};
use crate::monitor::ChangeMonitor;
use crate::pricing::normalize_all;
use crate::store::{ModelStore, StoreError, SyncRun, SyncRunOutcome, LAST_CHECKED_KEY};
use crate::util::now_string;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Catalog fetch failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog contained no priceable models")]
    NothingToStore,
}

/// Result of a single synchronizer pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub changed: bool,
    pub model_count: usize,
    pub added: usize,
    pub removed: usize,
    pub repriced: usize,
    pub duration_ms: u64,
}

/// Runs catalog syncs against a store and cache.
#[derive(Clone)]
pub struct Synchronizer {
    client: CatalogClient,
    store: ModelStore,
    monitor: ChangeMonitor,
    cache: ModelCache,
    markup: f64,
}

impl Synchronizer {
    pub fn new(client: CatalogClient, store: ModelStore, cache: ModelCache, markup: f64) -> Self {
        let monitor = ChangeMonitor::new(store.clone(), markup);
        Self {
            client,
            store,
            monitor,
            cache,
            markup,
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Run one pass. With `force`, the catalog is rewritten even when neither
    /// the fingerprint nor the markup changed.
    pub async fn run_once(&self, force: bool) -> Result<SyncOutcome, SyncError> {
        let started_at = now_string();
        let start = Instant::now();

        match self.run_inner(force, &started_at, start).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let run = SyncRun {
                    id: None,
                    started_at,
                    finished_at: now_string(),
                    outcome: SyncRunOutcome::Failed,
                    model_count: 0,
                    added: 0,
                    removed: 0,
                    repriced: 0,
                    error: Some(e.to_string()),
                };
                if let Err(log_err) = self.store.record_sync_run(run).await {
                    tracing::warn!("Failed to record failed sync run: {}", log_err);
                }
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        force: bool,
        started_at: &str,
        start: Instant,
    ) -> Result<SyncOutcome, SyncError> {
        let catalog = self.client.fetch_models().await?;
        let fetched_at = now_string();
        let records = normalize_all(&catalog, self.markup, &fetched_at);
        if records.is_empty() {
            return Err(SyncError::NothingToStore);
        }

        let report = self.monitor.check(&catalog, &records).await?;
        self.store.set_state(LAST_CHECKED_KEY, &fetched_at).await?;

        let mut outcome = SyncOutcome {
            changed: report.changed,
            model_count: records.len(),
            added: report.diff.added.len(),
            removed: report.diff.removed.len(),
            repriced: report.diff.repriced.len(),
            duration_ms: 0,
        };

        if !report.changed && !force {
            outcome.duration_ms = start.elapsed().as_millis() as u64;
            self.store
                .record_sync_run(self.run_entry(started_at, SyncRunOutcome::Unchanged, &outcome))
                .await?;
            return Ok(outcome);
        }

        let run = self.run_entry(started_at, SyncRunOutcome::Updated, &outcome);
        self.store
            .apply_sync(records, report.fingerprint.clone(), self.markup, run)
            .await?;
        self.cache.invalidate().await;

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            model_count = outcome.model_count,
            added = outcome.added,
            removed = outcome.removed,
            repriced = outcome.repriced,
            markup_changed = report.markup_changed,
            forced = force && !report.changed,
            duration_ms = outcome.duration_ms,
            "Model catalog synchronized"
        );
        Ok(outcome)
    }

    fn run_entry(&self, started_at: &str, outcome: SyncRunOutcome, stats: &SyncOutcome) -> SyncRun {
        SyncRun {
            id: None,
            started_at: started_at.to_string(),
            finished_at: now_string(),
            outcome,
            model_count: stats.model_count,
            added: stats.added,
            removed: stats.removed,
            repriced: stats.repriced,
            error: None,
        }
    }
}
