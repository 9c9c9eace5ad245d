//! SQLite-backed model store.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tokio::sync::Mutex;

use super::{
    EloAssignment, StoreError, SyncRun, SyncRunOutcome, CATALOG_HASH_KEY, PRICE_MARKUP_KEY,
};
use crate::pricing::{CostBand, ModelRecord};
use crate::util::now_string;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS models (
    model_id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    description TEXT,
    input_price_per_million REAL NOT NULL DEFAULT 0,
    output_price_per_million REAL NOT NULL DEFAULT 0,
    raw_prompt_price REAL NOT NULL DEFAULT 0,
    raw_completion_price REAL NOT NULL DEFAULT 0,
    image_price REAL,
    context_length INTEGER NOT NULL DEFAULT 4096,
    max_output_tokens INTEGER,
    cost_band TEXT NOT NULL DEFAULT '',
    is_multimodal INTEGER NOT NULL DEFAULT 0,
    supports_pdf INTEGER NOT NULL DEFAULT 0,
    supports_reasoning INTEGER NOT NULL DEFAULT 0,
    is_free INTEGER NOT NULL DEFAULT 0,
    elo_score REAL,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_fetched_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_models_active ON models(is_active);

CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    outcome TEXT NOT NULL,
    model_count INTEGER NOT NULL DEFAULT 0,
    added INTEGER NOT NULL DEFAULT 0,
    removed INTEGER NOT NULL DEFAULT 0,
    repriced INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at DESC);
"#;

const MODEL_COLUMNS: &str = "model_id, display_name, description, input_price_per_million,
    output_price_per_million, raw_prompt_price, raw_completion_price, image_price,
    context_length, max_output_tokens, cost_band, is_multimodal, supports_pdf,
    supports_reasoning, supports_tools, is_free, elo_score, is_active, last_fetched_at";

/// Persistent store of reconciled models.
#[derive(Clone)]
pub struct ModelStore {
    conn: Arc<Mutex<Connection>>,
}

impl ModelStore {
    /// Open (or create) the database file and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            Self::init(&conn)?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database (tests and dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA)?;
        Self::run_migrations(conn)
    }

    /// Additive migrations for databases created by older releases.
    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        let migrations = [
            (
                "supports_tools",
                "ALTER TABLE models ADD COLUMN supports_tools INTEGER NOT NULL DEFAULT 0",
            ),
            ("elo_source", "ALTER TABLE models ADD COLUMN elo_source TEXT"),
        ];

        for (column, ddl) in migrations {
            let exists: bool = conn
                .prepare("SELECT 1 FROM pragma_table_info('models') WHERE name = ?1")?
                .exists([column])?;
            if !exists {
                tracing::info!("Running migration: adding '{}' column to models table", column);
                conn.execute(ddl, [])?;
            }
        }
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Insert or update a batch of records in a single transaction.
    ///
    /// A stored ELO score is kept when the incoming record carries none.
    pub async fn upsert_models(&self, records: Vec<ModelRecord>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count = upsert_in(&tx, &records)?;
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    /// Mark every active model not in `active_ids` as inactive.
    pub async fn deactivate_missing(&self, active_ids: Vec<String>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count = deactivate_in(&tx, &active_ids)?;
            tx.commit()?;
            Ok(count)
        })
        .await
    }

    /// Persist a full catalog sync atomically: rows, deactivations,
    /// fingerprint, markup and audit entry all commit together or not at all.
    pub async fn apply_sync(
        &self,
        records: Vec<ModelRecord>,
        fingerprint: String,
        markup: f64,
        run: SyncRun,
    ) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            upsert_in(&tx, &records)?;
            let active_ids: Vec<String> = records.iter().map(|r| r.model_id.clone()).collect();
            let deactivated = deactivate_in(&tx, &active_ids)?;
            set_state_in(&tx, CATALOG_HASH_KEY, &fingerprint)?;
            set_state_in(&tx, PRICE_MARKUP_KEY, &markup.to_string())?;
            insert_run_in(&tx, &run)?;
            tx.commit()?;
            Ok(deactivated)
        })
        .await
    }

    pub async fn list_models(&self, active_only: bool) -> Result<Vec<ModelRecord>, StoreError> {
        self.with_conn(move |conn| {
            let sql = if active_only {
                format!(
                    "SELECT {} FROM models WHERE is_active = 1 ORDER BY model_id",
                    MODEL_COLUMNS
                )
            } else {
                format!("SELECT {} FROM models ORDER BY model_id", MODEL_COLUMNS)
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_record)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
        .await
    }

    pub async fn get_model(&self, model_id: &str) -> Result<Option<ModelRecord>, StoreError> {
        let model_id = model_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM models WHERE model_id = ?1", MODEL_COLUMNS);
            let row = conn
                .query_row(&sql, [&model_id], row_to_record)
                .optional()?;
            row.transpose()
        })
        .await
    }

    /// Attach arena ratings; unknown model ids are ignored.
    pub async fn set_elo_scores(&self, scores: Vec<EloAssignment>) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE models SET elo_score = ?2, elo_source = ?3, updated_at = ?4
                     WHERE model_id = ?1",
                )?;
                let now = now_string();
                for score in &scores {
                    updated += stmt.execute(params![
                        score.model_id,
                        score.elo,
                        score.source_name,
                        now
                    ])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM sync_state WHERE key = ?1", [&key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
        .await
    }

    pub async fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| set_state_in(conn, &key, &value)).await
    }

    pub async fn record_sync_run(&self, run: SyncRun) -> Result<i64, StoreError> {
        self.with_conn(move |conn| insert_run_in(conn, &run)).await
    }

    /// Most recent sync runs, newest first.
    pub async fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, finished_at, outcome, model_count, added, removed,
                        repriced, error
                 FROM sync_runs ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit as i64], |row| {
                let outcome: String = row.get(3)?;
                Ok(SyncRun {
                    id: Some(row.get(0)?),
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    outcome: SyncRunOutcome::parse(&outcome),
                    model_count: row.get::<_, i64>(4)? as usize,
                    added: row.get::<_, i64>(5)? as usize,
                    removed: row.get::<_, i64>(6)? as usize,
                    repriced: row.get::<_, i64>(7)? as usize,
                    error: row.get(8)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn upsert_in(tx: &Transaction<'_>, records: &[ModelRecord]) -> Result<usize, StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO models (
            model_id, display_name, description, input_price_per_million,
            output_price_per_million, raw_prompt_price, raw_completion_price, image_price,
            context_length, max_output_tokens, cost_band, is_multimodal, supports_pdf,
            supports_reasoning, supports_tools, is_free, elo_score, is_active,
            last_fetched_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
        )
        ON CONFLICT(model_id) DO UPDATE SET
            display_name = excluded.display_name,
            description = excluded.description,
            input_price_per_million = excluded.input_price_per_million,
            output_price_per_million = excluded.output_price_per_million,
            raw_prompt_price = excluded.raw_prompt_price,
            raw_completion_price = excluded.raw_completion_price,
            image_price = excluded.image_price,
            context_length = excluded.context_length,
            max_output_tokens = excluded.max_output_tokens,
            cost_band = excluded.cost_band,
            is_multimodal = excluded.is_multimodal,
            supports_pdf = excluded.supports_pdf,
            supports_reasoning = excluded.supports_reasoning,
            supports_tools = excluded.supports_tools,
            is_free = excluded.is_free,
            elo_score = COALESCE(excluded.elo_score, models.elo_score),
            is_active = excluded.is_active,
            last_fetched_at = excluded.last_fetched_at,
            updated_at = excluded.updated_at",
    )?;

    let now = now_string();
    for r in records {
        stmt.execute(params![
            r.model_id,
            r.display_name,
            r.description,
            r.input_price_per_million,
            r.output_price_per_million,
            r.raw_prompt_price,
            r.raw_completion_price,
            r.image_price,
            r.context_length as i64,
            r.max_output_tokens.map(|t| t as i64),
            r.cost_band.label(),
            r.is_multimodal,
            r.supports_pdf,
            r.supports_reasoning,
            r.supports_tools,
            r.is_free,
            r.elo_score,
            r.is_active,
            r.last_fetched_at,
            now,
        ])?;
    }
    Ok(records.len())
}

fn deactivate_in(tx: &Transaction<'_>, active_ids: &[String]) -> Result<usize, StoreError> {
    let keep: HashSet<&str> = active_ids.iter().map(String::as_str).collect();
    let stored: Vec<String> = {
        let mut stmt = tx.prepare("SELECT model_id FROM models WHERE is_active = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<_, _>>()?
    };

    let now = now_string();
    let mut stmt =
        tx.prepare("UPDATE models SET is_active = 0, updated_at = ?2 WHERE model_id = ?1")?;
    let mut count = 0;
    for id in stored.iter().filter(|id| !keep.contains(id.as_str())) {
        count += stmt.execute(params![id, now])?;
    }
    if count > 0 {
        tracing::info!(deactivated = count, "Deactivated models missing from catalog");
    }
    Ok(count)
}

fn set_state_in(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now_string()],
    )?;
    Ok(())
}

fn insert_run_in(conn: &Connection, run: &SyncRun) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO sync_runs (started_at, finished_at, outcome, model_count, added, removed,
                                repriced, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.started_at,
            run.finished_at,
            run.outcome.as_str(),
            run.model_count as i64,
            run.added as i64,
            run.removed as i64,
            run.repriced as i64,
            run.error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// Outer Result is the SQLite read; inner is row validation.
fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Result<ModelRecord, StoreError>> {
    let model_id: String = row.get(0)?;
    let band_label: String = row.get(10)?;
    let Some(cost_band) = CostBand::from_label(&band_label) else {
        return Ok(Err(StoreError::Corrupt {
            model_id,
            reason: format!("unknown cost band '{}'", band_label),
        }));
    };

    Ok(Ok(ModelRecord {
        model_id,
        display_name: row.get(1)?,
        description: row.get(2)?,
        input_price_per_million: row.get(3)?,
        output_price_per_million: row.get(4)?,
        raw_prompt_price: row.get(5)?,
        raw_completion_price: row.get(6)?,
        image_price: row.get(7)?,
        context_length: row.get::<_, i64>(8)?.max(0) as u64,
        max_output_tokens: row.get::<_, Option<i64>>(9)?.map(|t| t.max(0) as u64),
        cost_band,
        is_multimodal: row.get(11)?,
        supports_pdf: row.get(12)?,
        supports_reasoning: row.get(13)?,
        supports_tools: row.get(14)?,
        is_free: row.get(15)?,
        elo_score: row.get(16)?,
        is_active: row.get(17)?,
        last_fetched_at: row.get(18)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, input: f64) -> ModelRecord {
        ModelRecord {
            model_id: id.to_string(),
            display_name: id.to_string(),
            description: None,
            input_price_per_million: input,
            output_price_per_million: input * 4.0,
            raw_prompt_price: input / 2_000_000.0,
            raw_completion_price: input * 2.0 / 1_000_000.0,
            image_price: None,
            context_length: 128_000,
            max_output_tokens: Some(4096),
            cost_band: CostBand::from_price_per_million(input * 4.0),
            is_multimodal: false,
            supports_pdf: false,
            supports_reasoning: false,
            supports_tools: true,
            is_free: input == 0.0,
            elo_score: None,
            is_active: true,
            last_fetched_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn run(outcome: SyncRunOutcome) -> SyncRun {
        SyncRun {
            id: None,
            started_at: now_string(),
            finished_at: now_string(),
            outcome,
            model_count: 2,
            added: 2,
            removed: 0,
            repriced: 0,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let store = ModelStore::open_in_memory().unwrap();
        let mut vision = record("openai/gpt-4o", 5.0);
        vision.is_multimodal = true;
        store
            .upsert_models(vec![vision.clone(), record("openai/gpt-4o-mini", 0.3)])
            .await
            .unwrap();

        let all = store.list_models(true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], vision);

        let fetched = store.get_model("openai/gpt-4o-mini").await.unwrap().unwrap();
        assert_eq!(fetched.cost_band, CostBand::Medium);
        assert!(store.get_model("missing/model").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_preserves_elo() {
        let store = ModelStore::open_in_memory().unwrap();
        store.upsert_models(vec![record("a/b", 1.0)]).await.unwrap();
        let updated = store
            .set_elo_scores(vec![
                EloAssignment {
                    model_id: "a/b".to_string(),
                    elo: 1250.0,
                    source_name: "b".to_string(),
                },
                EloAssignment {
                    model_id: "not/stored".to_string(),
                    elo: 1000.0,
                    source_name: "x".to_string(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(updated, 1);

        // Re-sync with a new price and no score
        store.upsert_models(vec![record("a/b", 2.0)]).await.unwrap();
        let row = store.get_model("a/b").await.unwrap().unwrap();
        assert_eq!(row.elo_score, Some(1250.0));
        assert_eq!(row.input_price_per_million, 2.0);
    }

    #[tokio::test]
    async fn test_deactivate_missing_keeps_rows() {
        let store = ModelStore::open_in_memory().unwrap();
        store
            .upsert_models(vec![record("a/one", 1.0), record("a/two", 1.0), record("a/three", 1.0)])
            .await
            .unwrap();

        let count = store
            .deactivate_missing(vec!["a/one".to_string(), "a/three".to_string()])
            .await
            .unwrap();
        assert_eq!(count, 1);

        let active: Vec<String> = store
            .list_models(true)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.model_id)
            .collect();
        assert_eq!(active, vec!["a/one", "a/three"]);
        assert_eq!(store.list_models(false).await.unwrap().len(), 3);

        // Re-listing reactivates
        store.upsert_models(vec![record("a/two", 1.0)]).await.unwrap();
        assert!(store.get_model("a/two").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_apply_sync_is_atomic_unit() {
        let store = ModelStore::open_in_memory().unwrap();
        store.upsert_models(vec![record("old/model", 1.0)]).await.unwrap();

        let deactivated = store
            .apply_sync(
                vec![record("new/one", 1.0), record("new/two", 3.0)],
                "abc123".to_string(),
                2.5,
                run(SyncRunOutcome::Updated),
            )
            .await
            .unwrap();

        assert_eq!(deactivated, 1);
        assert_eq!(
            store.get_state(CATALOG_HASH_KEY).await.unwrap().as_deref(),
            Some("abc123")
        );
        assert_eq!(
            store.get_state(PRICE_MARKUP_KEY).await.unwrap().as_deref(),
            Some("2.5")
        );
        let runs = store.recent_sync_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, SyncRunOutcome::Updated);
        assert_eq!(store.list_models(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_state_roundtrip_and_overwrite() {
        let store = ModelStore::open_in_memory().unwrap();
        assert!(store.get_state("k").await.unwrap().is_none());
        store.set_state("k", "v1").await.unwrap();
        store.set_state("k", "v2").await.unwrap();
        assert_eq!(store.get_state("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_recent_runs_newest_first() {
        let store = ModelStore::open_in_memory().unwrap();
        store.record_sync_run(run(SyncRunOutcome::Updated)).await.unwrap();
        let mut failed = run(SyncRunOutcome::Failed);
        failed.error = Some("boom".to_string());
        store.record_sync_run(failed).await.unwrap();

        let runs = store.recent_sync_runs(1).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, SyncRunOutcome::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_open_on_disk_runs_migrations_twice() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("models.db");
        {
            let store = ModelStore::open(&path).await.unwrap();
            store.upsert_models(vec![record("a/b", 1.0)]).await.unwrap();
        }
        let reopened = ModelStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_models(false).await.unwrap().len(), 1);
    }
}
