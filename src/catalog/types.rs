use serde::{Deserialize, Serialize};

/// Response envelope of the OpenRouter models endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ModelsResponse {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// One model as listed by OpenRouter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogModel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub pricing: CatalogPricing,
    #[serde(default)]
    pub architecture: CatalogArchitecture,
    #[serde(default)]
    pub top_provider: Option<CatalogTopProvider>,
    #[serde(default)]
    pub supported_parameters: Vec<String>,
}

/// Prices as decimal strings in USD per token (or per image/request).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogPricing {
    #[serde(default, deserialize_with = "price_string")]
    pub prompt: String,
    #[serde(default, deserialize_with = "price_string")]
    pub completion: String,
    #[serde(default, deserialize_with = "optional_price_string")]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "optional_price_string")]
    pub request: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogArchitecture {
    /// Legacy modality string, e.g. `text+image->text`
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub output_modalities: Vec<String>,
    #[serde(default)]
    pub tokenizer: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogTopProvider {
    #[serde(default)]
    pub max_completion_tokens: Option<u64>,
}

impl CatalogArchitecture {
    /// Input modalities, falling back to the input side of the legacy modality string.
    pub fn inputs(&self) -> Vec<String> {
        if !self.input_modalities.is_empty() {
            return self
                .input_modalities
                .iter()
                .map(|m| m.trim().to_lowercase())
                .collect();
        }
        self.modality
            .as_deref()
            .and_then(|m| m.split("->").next())
            .map(|input| {
                input
                    .split('+')
                    .map(|m| m.trim().to_lowercase())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl CatalogModel {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn supports_parameter(&self, name: &str) -> bool {
        self.supported_parameters.iter().any(|p| p == name)
    }
}

// OpenRouter normally sends prices as strings but some mirrors emit numbers.
fn price_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(optional_price_string(deserializer)?.unwrap_or_default())
}

fn optional_price_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_full_entry() {
        let model: CatalogModel = serde_json::from_value(json!({
            "id": "anthropic/claude-3.5-sonnet",
            "name": "Anthropic: Claude 3.5 Sonnet",
            "context_length": 200000,
            "pricing": {
                "prompt": "0.000003",
                "completion": "0.000015",
                "image": "0.0048",
                "request": "0"
            },
            "architecture": {
                "modality": "text+image->text",
                "input_modalities": ["text", "image"],
                "output_modalities": ["text"],
                "tokenizer": "Claude"
            },
            "top_provider": {"max_completion_tokens": 8192},
            "supported_parameters": ["tools", "temperature"]
        }))
        .unwrap();

        assert_eq!(model.pricing.prompt, "0.000003");
        assert_eq!(model.pricing.image.as_deref(), Some("0.0048"));
        assert_eq!(model.architecture.inputs(), vec!["text", "image"]);
        assert_eq!(model.top_provider.unwrap().max_completion_tokens, Some(8192));
        assert!(model.supported_parameters.contains(&"tools".to_string()));
    }

    #[test]
    fn test_numeric_prices_and_missing_fields() {
        let model: CatalogModel = serde_json::from_value(json!({
            "id": "x/y",
            "pricing": {"prompt": 0.5, "completion": 1}
        }))
        .unwrap();
        assert_eq!(model.pricing.prompt, "0.5");
        assert_eq!(model.pricing.completion, "1");
        assert_eq!(model.pricing.image, None);
        assert_eq!(model.display_name(), "x/y");
        assert!(model.architecture.inputs().is_empty());
    }

    #[test]
    fn test_legacy_modality_inputs() {
        let arch = CatalogArchitecture {
            modality: Some("text+image->text".to_string()),
            ..Default::default()
        };
        assert_eq!(arch.inputs(), vec!["text", "image"]);
    }
}
