//! # GloriaMundo model service
//!
//! Keeps a local, priced and ranked copy of the OpenRouter model catalog and
//! uses it to validate and route chat requests.
//!
//! This library provides:
//! - A catalog synchronizer with change detection and a background updater
//! - Price normalization (markup, cost bands) and capability flags
//! - Arena ELO import for quality ranking
//! - Request-time model selection with graceful fallback
//! - Multimodal (text, image, PDF) payload shaping for OpenRouter
//!
//! ## Architecture
//!
//! ```text
//!   AutoUpdater ──► Synchronizer ──► CatalogClient (GET /models)
//!                        │
//!                        ├─► pricing::normalize_all
//!                        ├─► ChangeMonitor (SHA-256 fingerprint)
//!                        └─► ModelStore (SQLite) ──► ModelCache
//!                                                       │
//!   POST /api/chat ──► ChatService ──► ModelSelector ◄──┘
//!                           │
//!                           └─► OpenRouterClient (POST /chat/completions)
//! ```
//!
//! ## Modules
//! - `catalog`: OpenRouter `/models` client and wire types
//! - `pricing`: Normalized model records and cost bands
//! - `monitor`: Catalog fingerprinting and diffs
//! - `store`: SQLite persistence
//! - `cache`: TTL-bounded in-memory view of active models
//! - `sync`: Sync pipeline and background updater
//! - `elo`: Chatbot Arena leaderboard matching
//! - `selection`: Model validation and fallback
//! - `chat`/`llm`: Outgoing chat payloads and the OpenRouter client
//! - `api`: HTTP endpoints

pub mod api;
pub mod cache;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod elo;
pub mod llm;
pub mod monitor;
pub mod pricing;
pub mod selection;
pub mod store;
pub mod sync;
pub mod util;

pub use config::Config;
pub use pricing::{CostBand, ModelRecord};
pub use store::ModelStore;
