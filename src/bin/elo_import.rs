//! Import Chatbot Arena ELO ratings into the model database.
//!
//! Usage:
//!   elo-import (--csv PATH | --url URL) [--overrides PATH] [--db PATH]
//!              [--threshold SCORE] [--dry-run]
//!
//! `--db` defaults to `DATABASE_PATH` (or `gloriamundo.db`), `--threshold`
//! to `ELO_THRESHOLD` (or 0.85). Overrides are a JSON object mapping
//! OpenRouter ids to arena names.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gloriamundo::config;
use gloriamundo::elo::{self, EloMatcher};
use gloriamundo::store::ModelStore;

enum Source {
    Csv(PathBuf),
    Url(String),
}

struct Args {
    source: Source,
    overrides: Option<PathBuf>,
    database: PathBuf,
    threshold: f64,
    dry_run: bool,
}

fn usage() -> &'static str {
    "usage: elo-import (--csv PATH | --url URL) [--overrides PATH] [--db PATH] \
     [--threshold SCORE] [--dry-run]"
}

fn parse_args() -> anyhow::Result<Args> {
    let mut source = None;
    let mut overrides = None;
    let mut database = std::env::var("DATABASE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("gloriamundo.db"));
    let mut threshold = config::elo_threshold_from_env()?;
    let mut dry_run = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .with_context(|| format!("{} needs a value\n{}", name, usage()))
        };
        match arg.as_str() {
            "--csv" => source = Some(Source::Csv(PathBuf::from(value("--csv")?))),
            "--url" => source = Some(Source::Url(value("--url")?)),
            "--overrides" => overrides = Some(PathBuf::from(value("--overrides")?)),
            "--db" => database = PathBuf::from(value("--db")?),
            "--threshold" => {
                threshold = config::parse_elo_threshold(&value("--threshold")?)?;
            }
            "--dry-run" => dry_run = true,
            "-h" | "--help" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other => bail!("unknown argument '{}'\n{}", other, usage()),
        }
    }

    let Some(source) = source else {
        bail!("one of --csv or --url is required\n{}", usage());
    };

    Ok(Args {
        source,
        overrides,
        database,
        threshold,
        dry_run,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gloriamundo=info,elo_import=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    let arena = match &args.source {
        Source::Csv(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            elo::load_arena_csv(file)?
        }
        Source::Url(url) => elo::fetch_arena(url).await?,
    };
    info!(entries = arena.len(), "Loaded arena leaderboard");

    let overrides = match &args.overrides {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            elo::load_overrides(file)?
        }
        None => Default::default(),
    };

    let store = ModelStore::open(&args.database).await?;
    let models = store.list_models(false).await?;
    if models.is_empty() {
        bail!(
            "no models in {}; run a catalog sync first",
            args.database.display()
        );
    }

    let matches = EloMatcher::new(args.threshold)
        .with_overrides(overrides)
        .match_all(&models, &arena);

    for m in &matches {
        println!(
            "{:<50} {:<45} {:>7.1}  {:?} ({:.3})",
            m.model_id, m.arena_name, m.elo, m.confidence, m.score
        );
    }
    println!(
        "{} of {} models matched ({} arena entries)",
        matches.len(),
        models.len(),
        arena.len()
    );

    if args.dry_run {
        info!("Dry run, nothing written");
        return Ok(());
    }

    let updated = elo::import_elo(&store, &matches).await?;
    println!("Updated {} models", updated);
    Ok(())
}
