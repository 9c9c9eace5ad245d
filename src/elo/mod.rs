//! Quality ranking from the LMSYS Chatbot Arena leaderboard.
//!
//! # Flow
//! 1. Load the leaderboard (CSV file or download)
//! 2. Match each stored model to its best arena entry
//! 3. Persist the scores; catalog syncs never overwrite them

mod arena;
mod matching;

use std::collections::HashMap;
use std::io::Read;

pub use arena::{fetch_arena, load_arena_csv, ArenaEntry};
pub use matching::{
    match_score, match_score_with, normalize_model_name, EloMatch, EloMatcher, MatchConfidence,
    MatchResult, ModelFeatures, DEFAULT_MATCH_THRESHOLD,
};

use crate::store::{EloAssignment, ModelStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EloError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Leaderboard download failed (HTTP {status})")]
    Http { status: u16 },

    #[error("Invalid leaderboard CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Leaderboard has no column named {0}")]
    MissingColumn(String),

    #[error("Invalid overrides file: {0}")]
    Overrides(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read a JSON object mapping OpenRouter ids to arena names.
pub fn load_overrides<R: Read>(reader: R) -> Result<HashMap<String, String>, EloError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Persist matched scores. Returns the number of rows updated.
pub async fn import_elo(store: &ModelStore, matches: &[EloMatch]) -> Result<usize, EloError> {
    let assignments: Vec<EloAssignment> = matches
        .iter()
        .map(|m| EloAssignment {
            model_id: m.model_id.clone(),
            elo: m.elo,
            source_name: m.arena_name.clone(),
        })
        .collect();
    let updated = store.set_elo_scores(assignments).await?;
    tracing::info!(matched = matches.len(), updated, "Imported arena ELO scores");
    Ok(updated)
}
