//! HTTP client for the OpenRouter models endpoint.

use std::time::Duration;

use reqwest::Client;

use super::types::{CatalogModel, ModelsResponse};
use crate::util::truncate_for_log;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Catalog fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Catalog response contained no models")]
    Empty,
}

/// Fetches the live model list from OpenRouter.
#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    /// Fetch and decode the full catalog.
    ///
    /// Entries that fail to decode (e.g. missing `id`) are skipped. A response
    /// with no usable entries is an error so callers never replace a good
    /// catalog with an empty one.
    pub async fn fetch_models(&self) -> Result<Vec<CatalogModel>, CatalogError> {
        let url = self.models_url();
        tracing::debug!(url = %url, "Fetching OpenRouter model catalog");

        let mut request = self.client.get(&url).timeout(FETCH_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CatalogError::Network(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                CatalogError::Network(format!("Connection failed: {}", e))
            } else {
                CatalogError::Network(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = truncate_for_log(&body, 200),
                "Models endpoint returned an error"
            );
            return Err(CatalogError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ModelsResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))?;

        let total = envelope.data.len();
        let models: Vec<CatalogModel> = envelope
            .data
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<CatalogModel>(raw) {
                Ok(model) if !model.id.trim().is_empty() => Some(model),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!("Skipping malformed catalog entry: {}", e);
                    None
                }
            })
            .collect();

        if models.is_empty() {
            return Err(CatalogError::Empty);
        }
        if models.len() < total {
            tracing::warn!(
                skipped = total - models.len(),
                "Some catalog entries could not be decoded"
            );
        }

        tracing::info!(model_count = models.len(), "Fetched OpenRouter model catalog");
        Ok(models)
    }
}
