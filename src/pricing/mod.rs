//! Pricing module - normalizes catalog entries into priced model records.
//!
//! # Key Concepts
//! - Markup: multiplier applied to upstream per-token prices before display/billing
//! - Cost band: coarse `$`..`$$$$` label derived from marked-up per-million prices
//! - Capability flags: multimodal, PDF, reasoning and tool support from catalog metadata

mod record;

pub use record::{normalize, normalize_all, parse_price, CostBand, ModelRecord};
