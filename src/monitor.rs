//! Catalog drift detection.
//!
//! A SHA-256 fingerprint is computed over the fields that matter for pricing
//! and capabilities. The fingerprint is compared against the one committed by
//! the last successful sync to decide whether a refresh is needed. Stored
//! prices also depend on the configured markup, so a markup that differs from
//! the committed one counts as drift too.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::catalog::CatalogModel;
use crate::pricing::ModelRecord;
use crate::store::{ModelStore, StoreError, CATALOG_HASH_KEY, PRICE_MARKUP_KEY};

/// Relative price change below which a model does not count as repriced.
const REPRICE_EPSILON: f64 = 1e-9;

#[derive(Serialize)]
struct FingerprintEntry<'a> {
    id: &'a str,
    name: Option<&'a str>,
    pricing: BTreeMap<&'static str, &'a str>,
    modality: Option<&'a str>,
    tokenizer: Option<&'a str>,
    input_modalities: Vec<&'a str>,
    output_modalities: Vec<&'a str>,
    supported_parameters: Vec<&'a str>,
}

/// Order-independent fingerprint of a catalog.
pub fn catalog_fingerprint(models: &[CatalogModel]) -> String {
    let mut entries: Vec<FingerprintEntry<'_>> = models
        .iter()
        .map(|m| {
            let mut pricing = BTreeMap::new();
            pricing.insert("prompt", m.pricing.prompt.as_str());
            pricing.insert("completion", m.pricing.completion.as_str());
            if let Some(image) = m.pricing.image.as_deref() {
                pricing.insert("image", image);
            }
            if let Some(request) = m.pricing.request.as_deref() {
                pricing.insert("request", request);
            }
            FingerprintEntry {
                id: &m.id,
                name: m.name.as_deref(),
                pricing,
                modality: m.architecture.modality.as_deref(),
                tokenizer: m.architecture.tokenizer.as_deref(),
                input_modalities: sorted(&m.architecture.input_modalities),
                output_modalities: sorted(&m.architecture.output_modalities),
                supported_parameters: sorted(&m.supported_parameters),
            }
        })
        .collect();
    entries.sort_by(|a, b| a.id.cmp(b.id));

    let mut hasher = Sha256::new();
    for entry in &entries {
        // Serializing borrowed strings and maps cannot fail.
        let line = serde_json::to_string(entry).unwrap_or_default();
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn sorted(items: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = items.iter().map(String::as_str).collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Per-model differences between a fresh catalog and stored rows.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CatalogDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub repriced: Vec<String>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.repriced.is_empty()
    }
}

/// Compare fresh records against the active stored rows.
pub fn diff_records(fresh: &[ModelRecord], stored: &[ModelRecord]) -> CatalogDiff {
    let stored_by_id: HashMap<&str, &ModelRecord> = stored
        .iter()
        .filter(|r| r.is_active)
        .map(|r| (r.model_id.as_str(), r))
        .collect();
    let fresh_by_id: HashMap<&str, &ModelRecord> =
        fresh.iter().map(|r| (r.model_id.as_str(), r)).collect();

    let mut diff = CatalogDiff::default();
    for record in fresh {
        match stored_by_id.get(record.model_id.as_str()) {
            None => diff.added.push(record.model_id.clone()),
            Some(old) if price_changed(old, record) => {
                diff.repriced.push(record.model_id.clone())
            }
            Some(_) => {}
        }
    }
    for id in stored_by_id.keys() {
        if !fresh_by_id.contains_key(id) {
            diff.removed.push(id.to_string());
        }
    }

    diff.added.sort();
    diff.removed.sort();
    diff.repriced.sort();
    diff
}

// Compares what is billed, so a markup change reprices every paid model.
fn price_changed(old: &ModelRecord, new: &ModelRecord) -> bool {
    let differs =
        |a: f64, b: f64| (a - b).abs() > REPRICE_EPSILON * a.abs().max(b.abs()).max(1.0);
    differs(old.input_price_per_million, new.input_price_per_million)
        || differs(old.output_price_per_million, new.output_price_per_million)
}

/// Outcome of a drift check.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeReport {
    pub changed: bool,
    pub fingerprint: String,
    pub previous_fingerprint: Option<String>,
    /// Markup of the committed prices, when one was recorded
    pub previous_markup: Option<f64>,
    pub markup_changed: bool,
    pub diff: CatalogDiff,
}

/// Compares fetched catalogs against the committed fingerprint and markup.
#[derive(Clone)]
pub struct ChangeMonitor {
    store: ModelStore,
    markup: f64,
}

impl ChangeMonitor {
    pub fn new(store: ModelStore, markup: f64) -> Self {
        Self { store, markup }
    }

    /// Check a freshly fetched (and normalized) catalog for drift.
    ///
    /// No stored fingerprint or markup counts as a change.
    pub async fn check(
        &self,
        models: &[CatalogModel],
        records: &[ModelRecord],
    ) -> Result<ChangeReport, StoreError> {
        let fingerprint = catalog_fingerprint(models);
        let previous_fingerprint = self.store.get_state(CATALOG_HASH_KEY).await?;
        let previous_markup = self
            .store
            .get_state(PRICE_MARKUP_KEY)
            .await?
            .and_then(|raw| raw.parse::<f64>().ok());
        let stored = self.store.list_models(true).await?;
        let diff = diff_records(records, &stored);

        let markup_changed = previous_markup != Some(self.markup);
        let changed =
            markup_changed || previous_fingerprint.as_deref() != Some(fingerprint.as_str());
        if changed {
            tracing::info!(
                previous = previous_fingerprint.as_deref().unwrap_or("<none>"),
                current = %fingerprint,
                previous_markup = ?previous_markup,
                markup = self.markup,
                added = diff.added.len(),
                removed = diff.removed.len(),
                repriced = diff.repriced.len(),
                "Model catalog changed"
            );
        } else {
            tracing::debug!(fingerprint = %fingerprint, "Model catalog unchanged");
        }

        Ok(ChangeReport {
            changed,
            fingerprint,
            previous_fingerprint,
            previous_markup,
            markup_changed,
            diff,
        })
    }

    /// Persist a fingerprint and this monitor's markup after a successful
    /// update.
    pub async fn commit(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.store.set_state(CATALOG_HASH_KEY, fingerprint).await?;
        self.store
            .set_state(PRICE_MARKUP_KEY, &self.markup.to_string())
            .await
    }
}
