//! OpenRouter model catalog.
//!
//! Wire types for `GET /models` and the client that fetches them.

mod client;
mod types;

pub use client::{CatalogClient, CatalogError};
pub use types::{CatalogArchitecture, CatalogModel, CatalogPricing, CatalogTopProvider};
