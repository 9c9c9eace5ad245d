//! Reconciled model records and the normalization from catalog entries.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogModel;

/// Context window assumed when the catalog omits one.
const DEFAULT_CONTEXT_LENGTH: u64 = 4096;

/// Coarse price classification shown next to model names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CostBand {
    Free,
    Low,
    Medium,
    High,
    Premium,
}

impl CostBand {
    /// Classify a marked-up per-million price (USD).
    pub fn from_price_per_million(price: f64) -> Self {
        if price <= 0.0 {
            Self::Free
        } else if price < 1.0 {
            Self::Low
        } else if price < 10.0 {
            Self::Medium
        } else if price < 50.0 {
            Self::High
        } else {
            Self::Premium
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Free => "",
            Self::Low => "$",
            Self::Medium => "$$",
            Self::High => "$$$",
            Self::Premium => "$$$$",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "" => Some(Self::Free),
            "$" => Some(Self::Low),
            "$$" => Some(Self::Medium),
            "$$$" => Some(Self::High),
            "$$$$" => Some(Self::Premium),
            _ => None,
        }
    }
}

impl std::fmt::Display for CostBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for CostBand {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for CostBand {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Self::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown cost band '{}'", label)))
    }
}

/// A model as reconciled into the local database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRecord {
    /// Model identifier (e.g., "openai/gpt-4o-mini")
    pub model_id: String,

    pub display_name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Marked-up cost per 1M input tokens in dollars
    pub input_price_per_million: f64,

    /// Marked-up cost per 1M output tokens in dollars
    pub output_price_per_million: f64,

    /// Upstream cost per input token, before markup
    pub raw_prompt_price: f64,

    /// Upstream cost per output token, before markup
    pub raw_completion_price: f64,

    /// Marked-up cost per input image, if the model prices images
    #[serde(default)]
    pub image_price: Option<f64>,

    pub context_length: u64,

    #[serde(default)]
    pub max_output_tokens: Option<u64>,

    pub cost_band: CostBand,

    pub is_multimodal: bool,
    pub supports_pdf: bool,
    pub supports_reasoning: bool,
    pub supports_tools: bool,
    pub is_free: bool,

    /// Chatbot Arena rating, when a match was found
    #[serde(default)]
    pub elo_score: Option<f64>,

    pub is_active: bool,

    /// RFC 3339 timestamp of the catalog fetch that produced this row
    pub last_fetched_at: String,
}

impl ModelRecord {
    /// Estimated charge in dollars (markup included) for a request.
    ///
    /// # Postcondition
    /// `result >= 0`
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = (input_tokens as f64) * self.input_price_per_million / 1_000_000.0;
        let output = (output_tokens as f64) * self.output_price_per_million / 1_000_000.0;
        (input + output).max(0.0)
    }
}

/// Parse a price string from the OpenRouter API.
///
/// Unparsable or missing values are treated as zero.
pub fn parse_price(price: &str) -> f64 {
    let parsed: f64 = price.trim().parse().unwrap_or(0.0);
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

/// Turn a catalog entry into a priced record.
///
/// Returns `None` for entries with negative (variable) pricing, such as
/// OpenRouter's auto-router, which cannot be billed per token.
pub fn normalize(model: &CatalogModel, markup: f64, fetched_at: &str) -> Option<ModelRecord> {
    let prompt = parse_price(&model.pricing.prompt);
    let completion = parse_price(&model.pricing.completion);
    if prompt < 0.0 || completion < 0.0 {
        tracing::debug!(model = %model.id, "Skipping model with variable pricing");
        return None;
    }

    let input_price_per_million = prompt * 1_000_000.0 * markup;
    let output_price_per_million = completion * 1_000_000.0 * markup;
    let image_price = model
        .pricing
        .image
        .as_deref()
        .map(parse_price)
        .filter(|p| *p > 0.0)
        .map(|p| p * markup);

    let is_free = model.id.ends_with(":free") || (prompt == 0.0 && completion == 0.0);
    let cost_band = if is_free {
        CostBand::Free
    } else {
        CostBand::from_price_per_million(input_price_per_million.max(output_price_per_million))
    };

    let inputs = model.architecture.inputs();
    let has_input = |name: &str| inputs.iter().any(|m| m == name);

    Some(ModelRecord {
        model_id: model.id.clone(),
        display_name: model.display_name().to_string(),
        description: model.description.clone(),
        input_price_per_million,
        output_price_per_million,
        raw_prompt_price: prompt,
        raw_completion_price: completion,
        image_price,
        context_length: model.context_length.unwrap_or(DEFAULT_CONTEXT_LENGTH),
        max_output_tokens: model
            .top_provider
            .as_ref()
            .and_then(|p| p.max_completion_tokens),
        cost_band,
        is_multimodal: has_input("image"),
        supports_pdf: has_input("file"),
        supports_reasoning: model.supports_parameter("reasoning")
            || model.supports_parameter("include_reasoning"),
        supports_tools: model.supports_parameter("tools"),
        is_free,
        elo_score: None,
        is_active: true,
        last_fetched_at: fetched_at.to_string(),
    })
}

/// Normalize a whole catalog, dropping entries that cannot be priced.
pub fn normalize_all(models: &[CatalogModel], markup: f64, fetched_at: &str) -> Vec<ModelRecord> {
    models
        .iter()
        .filter_map(|m| normalize(m, markup, fetched_at))
        .collect()
}
