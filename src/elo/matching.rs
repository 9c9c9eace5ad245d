//! Fuzzy matching between OpenRouter model ids and arena leaderboard names.
//!
//! Matching works on normalized names: provider prefix, variant suffix, date
//! stamps and release markers are stripped so that e.g.
//! `anthropic/claude-3.5-sonnet` and `claude-3-5-sonnet-20240620` compare
//! equal. Fuzzy scores are Jaro-Winkler, with hard rejections for differing
//! versions or parameter sizes and a penalty per unshared variant keyword.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use strsim::jaro_winkler;

use super::arena::ArenaEntry;
use crate::pricing::ModelRecord;

/// Minimum fuzzy score for a usable match.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

const HIGH_CONFIDENCE: f64 = 0.93;
const LOW_CONFIDENCE: f64 = 0.6;
const VARIANT_PENALTY: f64 = 0.1;

const VARIANT_KEYWORDS: &[&str] = &[
    "mini", "nano", "turbo", "flash", "pro", "lite", "haiku", "sonnet", "opus", "instruct",
    "vision", "thinking",
];

const RELEASE_MARKERS: &[&str] = &["latest", "preview", "exp"];

fn date_stamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-_@](?:20\d{2}-\d{2}-\d{2}|20\d{6}|\d{4})\b").expect("valid date regex")
    })
}

fn split_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(^|[-_ ])(\d)[-_](\d)([-_ ]|$)").expect("valid version regex")
    })
}

fn size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:\d+x)?\d+(?:\.\d+)?[bm]$").expect("valid size regex"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:\.\d+)?[a-z]?$").expect("valid version regex"))
}

/// Reduce a model id or leaderboard name to a comparable form.
pub fn normalize_model_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let base = lowered.rsplit('/').next().unwrap_or_default();
    let base = base.split(':').next().unwrap_or_default();

    let undated = date_stamp_re().replace_all(base, "");
    let dotted = split_version_re().replace_all(&undated, "${1}${2}.${3}${4}");

    dotted
        .split(['-', '_', ' '])
        .filter(|t| !t.is_empty() && !RELEASE_MARKERS.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Distinguishing traits extracted from a normalized name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelFeatures {
    /// First version-like token (`3.5`, `4o`)
    pub version: Option<String>,
    /// Parameter sizes (`70b`, `8x7b`)
    pub sizes: BTreeSet<String>,
    pub variants: BTreeSet<String>,
}

impl ModelFeatures {
    pub fn extract(normalized: &str) -> Self {
        let mut features = Self::default();
        for token in normalized.split_whitespace() {
            if size_re().is_match(token) {
                features.sizes.insert(token.to_string());
            } else if version_re().is_match(token) {
                if features.version.is_none() {
                    features.version = Some(token.to_string());
                }
            } else if VARIANT_KEYWORDS.contains(&token) {
                features.variants.insert(token.to_string());
            }
        }
        features
    }

    /// Why two models cannot be the same, if anything rules it out.
    fn conflict(&self, other: &Self) -> Option<&'static str> {
        if let (Some(a), Some(b)) = (&self.version, &other.version) {
            if a != b {
                return Some("Version mismatch");
            }
        }
        if !self.sizes.is_empty() && !other.sizes.is_empty() && self.sizes != other.sizes {
            return Some("Parameter size mismatch");
        }
        None
    }

    fn unshared_variants(&self, other: &Self) -> usize {
        self.variants.symmetric_difference(&other.variants).count()
    }
}

/// Match confidence level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MatchConfidence {
    None = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Exact = 4,
}

/// Result of comparing two model names
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub confidence: MatchConfidence,
    pub score: f64,
    pub reason: String,
}

impl MatchResult {
    fn none(reason: &str) -> Self {
        Self {
            confidence: MatchConfidence::None,
            score: 0.0,
            reason: reason.to_string(),
        }
    }

    fn exact(reason: &str) -> Self {
        Self {
            confidence: MatchConfidence::Exact,
            score: 1.0,
            reason: reason.to_string(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.confidence >= MatchConfidence::Medium
    }
}

/// Compare an OpenRouter id with an arena name at the default threshold.
pub fn match_score(openrouter_id: &str, arena_name: &str) -> MatchResult {
    match_score_with(openrouter_id, arena_name, DEFAULT_MATCH_THRESHOLD)
}

pub fn match_score_with(openrouter_id: &str, arena_name: &str, threshold: f64) -> MatchResult {
    let a = normalize_model_name(openrouter_id);
    let b = normalize_model_name(arena_name);
    score_normalized(&a, &ModelFeatures::extract(&a), &b, &ModelFeatures::extract(&b), threshold)
}

fn score_normalized(
    a: &str,
    a_features: &ModelFeatures,
    b: &str,
    b_features: &ModelFeatures,
    threshold: f64,
) -> MatchResult {
    if a.is_empty() || b.is_empty() {
        return MatchResult::none("Empty name");
    }
    if a == b {
        return MatchResult::exact("Normalized names equal");
    }
    if let Some(reason) = a_features.conflict(b_features) {
        return MatchResult::none(reason);
    }

    let penalty = VARIANT_PENALTY * a_features.unshared_variants(b_features) as f64;
    let score = (jaro_winkler(a, b) - penalty).max(0.0);

    let confidence = if score >= HIGH_CONFIDENCE && score >= threshold {
        MatchConfidence::High
    } else if score >= threshold {
        MatchConfidence::Medium
    } else if score >= LOW_CONFIDENCE {
        MatchConfidence::Low
    } else {
        MatchConfidence::None
    };

    MatchResult {
        confidence,
        score,
        reason: format!("Jaro-Winkler {:.3} (variant penalty {:.1})", score + penalty, penalty),
    }
}

/// A model id paired with the arena entry it was matched to.
#[derive(Debug, Clone, Serialize)]
pub struct EloMatch {
    pub model_id: String,
    pub arena_name: String,
    pub elo: f64,
    pub confidence: MatchConfidence,
    pub score: f64,
}

/// Matches catalog models against a leaderboard.
pub struct EloMatcher {
    threshold: f64,
    /// OpenRouter id -> arena name
    overrides: HashMap<String, String>,
}

impl Default for EloMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl EloMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Best arena entry per model at `Medium` confidence or better.
    /// Overrides take precedence over fuzzy matching.
    pub fn match_all(&self, models: &[ModelRecord], arena: &[ArenaEntry]) -> Vec<EloMatch> {
        let prepared: Vec<(String, ModelFeatures, &ArenaEntry)> = arena
            .iter()
            .map(|entry| {
                let normalized = normalize_model_name(&entry.name);
                let features = ModelFeatures::extract(&normalized);
                (normalized, features, entry)
            })
            .collect();

        let mut matches = Vec::new();
        for model in models {
            if let Some(found) = self.override_match(model, arena) {
                matches.push(found);
                continue;
            }

            let normalized = normalize_model_name(&model.model_id);
            let features = ModelFeatures::extract(&normalized);
            let mut best: Option<(MatchResult, &ArenaEntry)> = None;
            for (arena_norm, arena_features, entry) in &prepared {
                let result = score_normalized(
                    &normalized,
                    &features,
                    arena_norm,
                    arena_features,
                    self.threshold,
                );
                if !result.is_match() {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some((current, current_entry)) => {
                        result.score > current.score
                            || (result.score == current.score && entry.elo > current_entry.elo)
                    }
                };
                if better {
                    best = Some((result, entry));
                }
            }

            if let Some((result, entry)) = best {
                tracing::debug!(
                    model_id = %model.model_id,
                    arena_name = %entry.name,
                    score = result.score,
                    "Matched model to arena entry"
                );
                matches.push(EloMatch {
                    model_id: model.model_id.clone(),
                    arena_name: entry.name.clone(),
                    elo: entry.elo,
                    confidence: result.confidence,
                    score: result.score,
                });
            }
        }
        matches
    }

    fn override_match(&self, model: &ModelRecord, arena: &[ArenaEntry]) -> Option<EloMatch> {
        let wanted = self.overrides.get(&model.model_id)?;
        let entry = arena
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(wanted));
        if entry.is_none() {
            tracing::warn!(
                model_id = %model.model_id,
                arena_name = %wanted,
                "Override names an arena entry that is not on the leaderboard"
            );
        }
        entry.map(|entry| EloMatch {
            model_id: model.model_id.clone(),
            arena_name: entry.name.clone(),
            elo: entry.elo,
            confidence: MatchConfidence::Exact,
            score: 1.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::CostBand;

    fn record(id: &str) -> ModelRecord {
        ModelRecord {
            model_id: id.to_string(),
            display_name: id.to_string(),
            description: None,
            input_price_per_million: 1.0,
            output_price_per_million: 2.0,
            raw_prompt_price: 0.0000005,
            raw_completion_price: 0.000001,
            image_price: None,
            context_length: 8192,
            max_output_tokens: None,
            cost_band: CostBand::Medium,
            is_multimodal: false,
            supports_pdf: false,
            supports_reasoning: false,
            supports_tools: false,
            is_free: false,
            elo_score: None,
            is_active: true,
            last_fetched_at: "t".to_string(),
        }
    }

    fn entry(name: &str, elo: f64) -> ArenaEntry {
        ArenaEntry {
            name: name.to_string(),
            elo,
        }
    }

    #[test]
    fn test_normalize_model_name() {
        assert_eq!(normalize_model_name("anthropic/claude-3.5-sonnet"), "claude 3.5 sonnet");
        assert_eq!(normalize_model_name("claude-3-5-sonnet-20240620"), "claude 3.5 sonnet");
        assert_eq!(normalize_model_name("gpt-4o-2024-08-06"), "gpt 4o");
        assert_eq!(normalize_model_name("gpt-4-0613"), "gpt 4");
        assert_eq!(normalize_model_name("chatgpt-4o-latest"), "chatgpt 4o");
        assert_eq!(
            normalize_model_name("meta-llama/Llama-3.3-70B-Instruct:free"),
            "llama 3.3 70b instruct"
        );
        assert_eq!(normalize_model_name("gemini-2.0-flash-exp"), "gemini 2.0 flash");
        assert_eq!(normalize_model_name(""), "");
    }

    #[test]
    fn test_features() {
        let f = ModelFeatures::extract("mixtral 8x7b instruct");
        assert!(f.sizes.contains("8x7b"));
        assert!(f.variants.contains("instruct"));
        assert_eq!(f.version, None);

        let f = ModelFeatures::extract("gpt 4o mini");
        assert_eq!(f.version.as_deref(), Some("4o"));
        assert!(f.variants.contains("mini"));
    }

    #[test]
    fn test_match_score_exact_after_normalization() {
        let result = match_score("anthropic/claude-3.5-sonnet", "claude-3-5-sonnet-20240620");
        assert_eq!(result.confidence, MatchConfidence::Exact);
        assert!(result.is_match());
    }

    #[test]
    fn test_match_score_rejects_version_and_size_mismatch() {
        let version = match_score("openai/gpt-4o", "gpt-4-turbo-2024-04-09");
        assert_eq!(version.confidence, MatchConfidence::None);
        assert_eq!(version.reason, "Version mismatch");

        let size = match_score("meta-llama/llama-3.1-8b-instruct", "llama-3.1-70b-instruct");
        assert_eq!(size.confidence, MatchConfidence::None);
        assert_eq!(size.reason, "Parameter size mismatch");
    }

    #[test]
    fn test_variant_penalty_blocks_mini_vs_full() {
        let result = match_score("openai/gpt-4o-mini", "gpt-4o-2024-05-13");
        assert!(!result.is_match());
    }

    #[test]
    fn test_match_all_picks_best_and_honours_overrides() {
        let models = vec![
            record("anthropic/claude-3.5-sonnet"),
            record("openai/gpt-4o"),
            record("openai/gpt-4o-mini"),
            record("acme/unknown-model"),
        ];
        let arena = vec![
            entry("claude-3-5-sonnet-20240620", 1271.0),
            entry("gpt-4o-2024-05-13", 1287.0),
            entry("gpt-4o-2024-08-06", 1265.0),
            entry("gpt-4o-mini-2024-07-18", 1272.0),
            entry("chatgpt-4o-latest", 1316.0),
        ];

        let mut overrides = HashMap::new();
        overrides.insert("openai/gpt-4o".to_string(), "chatgpt-4o-latest".to_string());
        let matches = EloMatcher::default()
            .with_overrides(overrides)
            .match_all(&models, &arena);

        let by_id: HashMap<&str, &EloMatch> =
            matches.iter().map(|m| (m.model_id.as_str(), m)).collect();
        assert_eq!(matches.len(), 3);
        assert_eq!(by_id["anthropic/claude-3.5-sonnet"].elo, 1271.0);
        assert_eq!(by_id["openai/gpt-4o"].arena_name, "chatgpt-4o-latest");
        assert_eq!(by_id["openai/gpt-4o-mini"].elo, 1272.0);
        assert!(!by_id.contains_key("acme/unknown-model"));
    }

    #[test]
    fn test_equal_scores_prefer_higher_elo() {
        let models = vec![record("openai/gpt-4o")];
        let arena = vec![entry("gpt-4o-2024-08-06", 1265.0), entry("gpt-4o-2024-05-13", 1287.0)];
        let matches = EloMatcher::default().match_all(&models, &arena);
        assert_eq!(matches[0].elo, 1287.0);
    }
}
