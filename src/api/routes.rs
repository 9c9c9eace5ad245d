//! Router, shared state and service-level handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::ModelCache;
use crate::catalog::CatalogClient;
use crate::chat::ChatService;
use crate::config::Config;
use crate::llm::OpenRouterClient;
use crate::selection::ModelSelector;
use crate::store::{ModelStore, SyncRun, CATALOG_HASH_KEY, LAST_CHECKED_KEY, PRICE_MARKUP_KEY};
use crate::sync::{AutoUpdater, SyncOutcome, Synchronizer, UpdaterHandle, UpdaterStatus};

use super::chat as chat_api;
use super::error::ApiError;
use super::models as models_api;

const RECENT_RUNS: usize = 20;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: ModelStore,
    pub cache: ModelCache,
    pub synchronizer: Synchronizer,
    /// None when the background updater is disabled
    pub updater: Option<UpdaterHandle>,
    pub chat: ChatService,
}

impl AppState {
    /// Wire the service together from configuration. Spawns the updater
    /// when enabled, so this must run inside a tokio runtime.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = ModelStore::open(&config.database_path).await?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: ModelStore) -> Self {
        let cache = ModelCache::new(store.clone(), config.sync.cache_ttl);
        let catalog = CatalogClient::new(config.base_url.clone(), Some(config.api_key.clone()));
        let synchronizer =
            Synchronizer::new(catalog, store.clone(), cache.clone(), config.price_markup);

        let updater = if config.sync.enabled {
            Some(AutoUpdater::spawn(synchronizer.clone(), config.sync.interval))
        } else {
            tracing::info!("Model catalog auto-updater disabled by configuration");
            None
        };

        let selector = ModelSelector::new(
            cache.clone(),
            config.default_model.clone(),
            config.fallback_models.clone(),
        );
        let client = Arc::new(OpenRouterClient::new(
            config.base_url.clone(),
            config.api_key.clone(),
        ));
        let chat = ChatService::new(selector, cache.clone(), client);

        Self {
            config,
            store,
            cache,
            synchronizer,
            updater,
            chat,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/models", get(models_api::list_models))
        .route("/api/models/*id", get(models_api::get_model))
        .route("/api/prices", get(models_api::prices))
        .route("/api/sync", get(sync_status))
        .route("/api/sync/refresh", post(refresh))
        .route("/api/chat", post(chat_api::chat))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::from_config(config).await?);
    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(updater) = &state.updater {
        updater.shutdown().await;
    }
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model_count: usize,
    updater: Option<UpdaterStatus>,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let model_count = state.cache.model_count().await?;
    let updater = match &state.updater {
        Some(handle) => Some(handle.status().await),
        None => None,
    };
    Ok(Json(HealthResponse {
        status: if model_count > 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        model_count,
        updater,
    }))
}

#[derive(Debug, Serialize)]
pub(crate) struct SyncStatusResponse {
    updater: Option<UpdaterStatus>,
    catalog_hash: Option<String>,
    /// Markup the stored prices were computed with
    price_markup: Option<f64>,
    last_checked_at: Option<String>,
    recent_runs: Vec<SyncRun>,
}

async fn sync_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let updater = match &state.updater {
        Some(handle) => Some(handle.status().await),
        None => None,
    };
    Ok(Json(SyncStatusResponse {
        updater,
        catalog_hash: state.store.get_state(CATALOG_HASH_KEY).await?,
        price_markup: state
            .store
            .get_state(PRICE_MARKUP_KEY)
            .await?
            .and_then(|raw| raw.parse().ok()),
        last_checked_at: state.store.get_state(LAST_CHECKED_KEY).await?,
        recent_runs: state.store.recent_sync_runs(RECENT_RUNS).await?,
    }))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub(crate) enum RefreshResponse {
    /// Handed to the background updater
    Queued,
    /// Ran inline because the updater is disabled
    Completed { outcome: SyncOutcome },
}

async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<RefreshResponse>), ApiError> {
    if let Some(updater) = &state.updater {
        if updater.trigger() {
            tracing::info!("Manual catalog refresh queued");
            return Ok((StatusCode::ACCEPTED, Json(RefreshResponse::Queued)));
        }
    }
    let outcome = state.synchronizer.run_once(true).await?;
    Ok((StatusCode::OK, Json(RefreshResponse::Completed { outcome })))
}


#[cfg(test)]
mod tests {
    use super::test_support::state;
    use super::*;
    use crate::sync::test_support::catalog_json;
    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_health_degraded_until_first_sync() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_json()))
            .mount(&server)
            .await;
        let state = state(&server.uri());

        let Json(before) = health(State(Arc::clone(&state))).await.unwrap();
        assert_eq!(before.status, "degraded");
        assert!(before.updater.is_none());

        let (status, Json(resp)) = refresh(State(Arc::clone(&state))).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(resp, RefreshResponse::Completed { .. }));

        let Json(after) = health(State(Arc::clone(&state))).await.unwrap();
        assert_eq!(after.status, "ok");
        assert_eq!(after.model_count, 4);

        let Json(sync) = sync_status(State(state)).await.unwrap();
        assert_eq!(sync.recent_runs.len(), 1);
        assert!(sync.catalog_hash.is_some());
        assert_eq!(sync.price_markup, Some(2.0));
    }

    #[tokio::test]
    async fn test_refresh_upstream_failure_is_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let err = refresh(State(state(&server.uri()))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    async fn serve_router(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_routes_over_http() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_json()))
            .mount(&upstream)
            .await;
        let base = serve_router(state(&upstream.uri())).await;
        let http = reqwest::Client::new();
        let get = |route: &str| http.get(format!("{}{}", base, route)).send();

        // Nothing synced yet
        let resp = get("/api/models/openai/gpt-4o").await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("openai/gpt-4o"));

        // Updater disabled: refresh runs inline
        let resp = http
            .post(format!("{}/api/sync/refresh", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "completed");
        assert_eq!(body["outcome"]["model_count"], 4);

        // Slash-containing ids reach the wildcard route whole
        let resp = get("/api/models/openai/gpt-4o").await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let model: Value = resp.json().await.unwrap();
        assert_eq!(model["model_id"], "openai/gpt-4o");
        assert_eq!(model["supports_pdf"], true);

        let resp = get("/api/models/meta-llama/llama-3.3-70b-instruct:free").await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = get("/api/prices").await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let prices: Value = resp.json().await.unwrap();
        let input = prices["openai/gpt-4o"]["input"].as_f64().unwrap();
        assert!((input - 5.0).abs() < 1e-9);
        assert_eq!(prices["openai/gpt-4o"]["cost_band"], "$$$");
        assert!(prices.get("openrouter/auto").is_none());

        let vision: Value = get("/api/models?multimodal=true")
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(vision.as_array().unwrap().len(), 2);

        let sync: Value = get("/api/sync").await.unwrap().json().await.unwrap();
        assert_eq!(sync["recent_runs"].as_array().unwrap().len(), 1);
        assert_eq!(sync["price_markup"], 2.0);

        let health: Value = get("/api/health").await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["model_count"], 4);
    }
}
