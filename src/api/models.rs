//! Model catalog endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::pricing::{CostBand, ModelRecord};
use crate::selection::rank_models;

use super::error::ApiError;
use super::routes::AppState;

/// Query filters for `GET /api/models`. Unset filters match everything.
#[derive(Debug, Default, Deserialize)]
pub struct ModelFilter {
    pub multimodal: Option<bool>,
    pub free: Option<bool>,
    pub pdf: Option<bool>,
    pub reasoning: Option<bool>,
}

impl ModelFilter {
    fn matches(&self, m: &ModelRecord) -> bool {
        let check = |wanted: Option<bool>, actual: bool| wanted.map_or(true, |w| w == actual);
        check(self.multimodal, m.is_multimodal)
            && check(self.free, m.is_free)
            && check(self.pdf, m.supports_pdf)
            && check(self.reasoning, m.supports_reasoning)
    }
}

pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ModelFilter>,
) -> Result<Json<Vec<ModelRecord>>, ApiError> {
    let models: Vec<ModelRecord> = state
        .cache
        .get_all()
        .await?
        .into_iter()
        .filter(|m| filter.matches(m))
        .collect();
    Ok(Json(rank_models(models)))
}

/// Active models are served from the cache (case-insensitively); retired
/// ones are still visible through the store.
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ModelRecord>, ApiError> {
    if let Some(model) = state.cache.find_case_insensitive(&id).await? {
        return Ok(Json(model));
    }
    state
        .store
        .get_model(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Unknown model: {}", id)))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PriceEntry {
    /// Marked-up USD per million input tokens
    pub input: f64,
    pub output: f64,
    pub cost_band: CostBand,
    pub is_free: bool,
}

pub async fn prices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, PriceEntry>>, ApiError> {
    let map = state
        .cache
        .get_all()
        .await?
        .into_iter()
        .map(|m| {
            let entry = PriceEntry {
                input: m.input_price_per_million,
                output: m.output_price_per_million,
                cost_band: m.cost_band,
                is_free: m.is_free,
            };
            (m.model_id, entry)
        })
        .collect();
    Ok(Json(map))
}
