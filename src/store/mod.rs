//! Relational persistence for reconciled models and sync bookkeeping.

mod sqlite;

use serde::{Deserialize, Serialize};

pub use sqlite::ModelStore;

/// `sync_state` key holding the last committed catalog fingerprint.
pub const CATALOG_HASH_KEY: &str = "catalog_hash";

/// `sync_state` key holding the markup the stored prices were computed with.
pub const PRICE_MARKUP_KEY: &str = "price_markup";

/// `sync_state` key holding the time of the last catalog check.
pub const LAST_CHECKED_KEY: &str = "last_checked_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    Join(String),

    #[error("Corrupt row for {model_id}: {reason}")]
    Corrupt { model_id: String, reason: String },
}

/// How a sync run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunOutcome {
    Updated,
    Unchanged,
    Failed,
}

impl SyncRunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "updated" => Self::Updated,
            "unchanged" => Self::Unchanged,
            _ => Self::Failed,
        }
    }
}

/// Audit row for one synchronizer pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    #[serde(default)]
    pub id: Option<i64>,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: SyncRunOutcome,
    pub model_count: usize,
    pub added: usize,
    pub removed: usize,
    pub repriced: usize,
    #[serde(default)]
    pub error: Option<String>,
}

/// An arena rating to attach to a stored model.
#[derive(Debug, Clone, PartialEq)]
pub struct EloAssignment {
    pub model_id: String,
    pub elo: f64,
    /// Arena leaderboard name the score came from
    pub source_name: String,
}
