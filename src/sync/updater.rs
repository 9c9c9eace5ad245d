//! Background auto-updater.
//!
//! Runs an initial sync immediately on startup, then one per interval.
//! Errors never stop the loop; they are logged, counted and retried next
//! interval while the previously stored catalog keeps serving requests.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::{SyncError, SyncOutcome, Synchronizer};
use crate::util::now_string;

/// Snapshot of the updater loop for health and status endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdaterStatus {
    pub running: bool,
    pub last_check_at: Option<String>,
    pub last_change_at: Option<String>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub runs: u64,
}

impl UpdaterStatus {
    fn record(&mut self, result: &Result<SyncOutcome, SyncError>) {
        let now = now_string();
        self.runs += 1;
        self.last_check_at = Some(now.clone());
        match result {
            Ok(outcome) => {
                if outcome.changed {
                    self.last_change_at = Some(now);
                }
                self.last_error = None;
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.consecutive_failures += 1;
            }
        }
    }
}

pub struct AutoUpdater;

impl AutoUpdater {
    /// Spawn the updater loop on the current runtime.
    pub fn spawn(synchronizer: Synchronizer, interval: Duration) -> UpdaterHandle {
        let status = Arc::new(RwLock::new(UpdaterStatus {
            running: true,
            ..Default::default()
        }));
        // One pending trigger is enough; extra requests coalesce.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            sync_interval_secs = interval.as_secs(),
            "Starting model catalog auto-updater"
        );

        let task = tokio::spawn(run_loop(
            synchronizer,
            interval,
            Arc::clone(&status),
            trigger_rx,
            shutdown_rx,
        ));

        UpdaterHandle {
            status,
            trigger_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

async fn run_loop(
    synchronizer: Synchronizer,
    interval: Duration,
    status: Arc<RwLock<UpdaterStatus>>,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    run_and_record(&synchronizer, &status, false, "initial").await;

    loop {
        let force = tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            Some(()) = trigger_rx.recv() => true,
            _ = shutdown_rx.changed() => break,
        };
        if *shutdown_rx.borrow() {
            break;
        }
        let label = if force { "manual" } else { "scheduled" };
        run_and_record(&synchronizer, &status, force, label).await;
    }

    status.write().await.running = false;
    tracing::info!("Model catalog auto-updater stopped");
}

async fn run_and_record(
    synchronizer: &Synchronizer,
    status: &RwLock<UpdaterStatus>,
    force: bool,
    label: &str,
) {
    let result = synchronizer.run_once(force).await;
    match &result {
        Ok(outcome) => tracing::debug!(
            run = label,
            changed = outcome.changed,
            model_count = outcome.model_count,
            duration_ms = outcome.duration_ms,
            "Model catalog check complete"
        ),
        Err(e) => tracing::warn!(
            run = label,
            error = %e,
            "Model catalog sync failed, keeping existing data"
        ),
    }
    status.write().await.record(&result);
}

/// Control handle for a running [`AutoUpdater`].
#[derive(Clone)]
pub struct UpdaterHandle {
    status: Arc<RwLock<UpdaterStatus>>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl UpdaterHandle {
    /// Request an immediate forced refresh. Returns false when the loop
    /// has stopped.
    pub fn trigger(&self) -> bool {
        match self.trigger_tx.try_send(()) {
            Ok(()) => true,
            // A refresh is already queued
            Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub async fn status(&self) -> UpdaterStatus {
        self.status.read().await.clone()
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Auto-updater task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::catalog_json;
    use super::*;
    use crate::cache::ModelCache;
    use crate::catalog::CatalogClient;
    use crate::store::ModelStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn synchronizer(server: &MockServer) -> Synchronizer {
        let store = ModelStore::open_in_memory().unwrap();
        let cache = ModelCache::new(store.clone(), Duration::from_secs(60));
        Synchronizer::new(CatalogClient::new(server.uri(), None), store, cache, 2.0)
    }

    async fn wait_for_runs(handle: &UpdaterHandle, runs: u64) -> UpdaterStatus {
        for _ in 0..200 {
            let status = handle.status().await;
            if status.runs >= runs {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("updater did not reach {} runs", runs);
    }

    #[tokio::test]
    async fn test_initial_run_and_trigger() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_json()))
            .mount(&server)
            .await;

        let handle = AutoUpdater::spawn(synchronizer(&server), Duration::from_secs(3600));
        let status = wait_for_runs(&handle, 1).await;
        assert!(status.running);
        assert!(status.last_change_at.is_some());
        assert_eq!(status.consecutive_failures, 0);

        assert!(handle.trigger());
        let status = wait_for_runs(&handle, 2).await;
        assert!(status.last_error.is_none());

        handle.shutdown().await;
        assert!(!handle.status().await.running);
        assert!(!handle.trigger());
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_loop_survives() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let handle = AutoUpdater::spawn(synchronizer(&server), Duration::from_millis(10));
        let status = wait_for_runs(&handle, 3).await;
        assert!(status.running);
        assert!(status.consecutive_failures >= 3);
        assert!(status.last_error.as_deref().unwrap().contains("503"));
        assert!(status.last_change_at.is_none());

        handle.shutdown().await;
    }
}
