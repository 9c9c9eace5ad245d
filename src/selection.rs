//! Request-time model validation and fallback.
//!
//! # Algorithm
//! 1. No requested model: use the configured default
//! 2. Exact id match among active models, else a case-insensitive match
//! 3. The model must satisfy the request's capability and price requirements
//! 4. Otherwise walk the fallback chain, then the best-ranked suitable model
//!    (preferring the requested model's cost band)
//!
//! Models that failed upstream during the current request can be excluded;
//! they are treated as not listed.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::cache::ModelCache;
use crate::pricing::{CostBand, ModelRecord};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("No active model satisfies the request (requested: {requested})")]
    NoModelAvailable { requested: String },

    #[error("Failed to load models: {0}")]
    Store(#[from] StoreError),
}

/// What the outgoing request needs from a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelRequirements {
    pub needs_image: bool,
    pub needs_pdf: bool,
    pub needs_reasoning: bool,
    pub allow_paid: bool,
}

impl ModelRequirements {
    /// Requirements for a paying user with no attachments.
    pub fn paid() -> Self {
        Self {
            allow_paid: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Image,
    Pdf,
    Reasoning,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Reasoning => "reasoning",
        };
        f.write_str(s)
    }
}

/// Why the resolved model was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "capability", rename_all = "snake_case")]
pub enum SelectionReason {
    Requested,
    CaseCorrected,
    Unavailable,
    MissingCapability(Capability),
    PaidNotAllowed,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub model_id: String,
    pub requested: Option<String>,
    /// True when a different model than the one asked for is used
    pub substituted: bool,
    pub reason: SelectionReason,
}

/// Sort by ELO descending (unknown last), then cheaper input price, then id.
pub fn rank_models(mut records: Vec<ModelRecord>) -> Vec<ModelRecord> {
    records.sort_by(compare_rank);
    records
}

fn compare_rank(a: &ModelRecord, b: &ModelRecord) -> Ordering {
    let by_elo = match (a.elo_score, b.elo_score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_elo
        .then_with(|| a.input_price_per_million.total_cmp(&b.input_price_per_million))
        .then_with(|| a.model_id.cmp(&b.model_id))
}

/// The first requirement `record` fails, if any.
fn unmet_requirement(record: &ModelRecord, req: &ModelRequirements) -> Option<SelectionReason> {
    if req.needs_image && !record.is_multimodal {
        return Some(SelectionReason::MissingCapability(Capability::Image));
    }
    if req.needs_pdf && !record.supports_pdf {
        return Some(SelectionReason::MissingCapability(Capability::Pdf));
    }
    if req.needs_reasoning && !record.supports_reasoning {
        return Some(SelectionReason::MissingCapability(Capability::Reasoning));
    }
    if !req.allow_paid && !record.is_free {
        return Some(SelectionReason::PaidNotAllowed);
    }
    None
}

fn find<'a>(models: &'a [ModelRecord], id: &str) -> Option<(&'a ModelRecord, bool)> {
    if let Some(exact) = models.iter().find(|m| m.model_id == id) {
        return Some((exact, false));
    }
    let wanted = id.to_lowercase();
    models
        .iter()
        .find(|m| m.model_id.to_lowercase() == wanted)
        .map(|m| (m, true))
}

/// Validates requested models against the cached catalog.
#[derive(Clone)]
pub struct ModelSelector {
    cache: ModelCache,
    default_model: String,
    fallback_models: Vec<String>,
}

impl ModelSelector {
    pub fn new(cache: ModelCache, default_model: String, fallback_models: Vec<String>) -> Self {
        Self {
            cache,
            default_model,
            fallback_models,
        }
    }

    pub async fn resolve(
        &self,
        requested: Option<&str>,
        req: &ModelRequirements,
    ) -> Result<Resolution, SelectionError> {
        self.resolve_excluding(requested, req, &[]).await
    }

    /// Like [`resolve`](Self::resolve), ignoring the `excluded` model ids.
    pub async fn resolve_excluding(
        &self,
        requested: Option<&str>,
        req: &ModelRequirements,
        excluded: &[String],
    ) -> Result<Resolution, SelectionError> {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());
        let mut models = self.cache.get_all().await?;
        models.retain(|m| !excluded.contains(&m.model_id));
        let target = requested.unwrap_or(&self.default_model);

        let found = find(&models, target);
        let failure = match found {
            Some((record, case_corrected)) => match unmet_requirement(record, req) {
                None => {
                    let reason = match (requested, case_corrected) {
                        (None, _) => SelectionReason::Default,
                        (Some(_), true) => SelectionReason::CaseCorrected,
                        (Some(_), false) => SelectionReason::Requested,
                    };
                    if case_corrected {
                        tracing::info!(
                            requested = target,
                            model_id = %record.model_id,
                            "Model id case-corrected"
                        );
                    }
                    return Ok(Resolution {
                        model_id: record.model_id.clone(),
                        requested: requested.map(str::to_string),
                        substituted: false,
                        reason,
                    });
                }
                Some(reason) => reason,
            },
            None => SelectionReason::Unavailable,
        };

        let preferred_band = found.map(|(record, _)| record.cost_band);
        let replacement = self
            .fallback(&models, target, req, preferred_band)
            .ok_or_else(|| SelectionError::NoModelAvailable {
                requested: target.to_string(),
            })?;

        let reason = if requested.is_some() {
            failure
        } else {
            SelectionReason::Default
        };
        tracing::info!(
            requested = target,
            model_id = %replacement.model_id,
            reason = ?failure,
            "Substituting model"
        );
        Ok(Resolution {
            model_id: replacement.model_id.clone(),
            requested: requested.map(str::to_string),
            substituted: requested.is_some(),
            reason,
        })
    }

    fn fallback<'a>(
        &self,
        models: &'a [ModelRecord],
        target: &str,
        req: &ModelRequirements,
        preferred_band: Option<CostBand>,
    ) -> Option<&'a ModelRecord> {
        let usable = |m: &&ModelRecord| {
            !m.model_id.eq_ignore_ascii_case(target) && unmet_requirement(m, req).is_none()
        };

        let chained = self
            .fallback_models
            .iter()
            .filter_map(|id| find(models, id).map(|(m, _)| m))
            .find(usable);
        if chained.is_some() {
            return chained;
        }

        let mut candidates: Vec<&ModelRecord> = models.iter().filter(usable).collect();
        candidates.sort_by(|a, b| compare_rank(a, b));
        if let Some(band) = preferred_band {
            if let Some(same_band) = candidates.iter().find(|m| m.cost_band == band) {
                return Some(*same_band);
            }
        }
        candidates.first().copied()
    }
}
