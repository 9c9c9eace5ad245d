//! HTTP API for the model catalog and chat turns.
//!
//! ## Endpoints
//! - `GET /api/health` - Service and updater status
//! - `GET /api/models` - Ranked active models (filters: `multimodal`, `free`, `pdf`)
//! - `GET /api/models/*id` - One model by OpenRouter id
//! - `GET /api/prices` - Per-model price map for the front end
//! - `GET /api/sync` - Updater status and recent sync runs
//! - `POST /api/sync/refresh` - Force a catalog sync
//! - `POST /api/chat` - Run one chat turn

mod chat;
mod error;
mod models;
mod routes;

pub use error::ApiError;
pub use routes::{build_router, serve, AppState};
