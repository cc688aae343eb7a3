//! Context management for a run.
//!
//! | Stage | Module | Bound |
//! |-------|--------|-------|
//! | Initial messages | [`builder`] | Per-input character caps |
//! | Every iteration | [`trim`] | Estimated token ceiling |
//! | Estimates | [`token`] | [`token::CHARS_PER_TOKEN`] heuristic |

pub mod builder;
pub mod token;
pub mod trim;

pub use builder::{
    ContextInput, ContextLimits, DocumentContext, OpenFile, build_initial_messages,
    truncate_data_urls,
};
pub use trim::{TrimLimits, TrimReport, trim_to_budget};
