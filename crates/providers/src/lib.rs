//! Provider adapters for Turnwright.
//!
//! One adapter per wire-protocol family, all implementing
//! `turnwright_core::ProviderAdapter`. The registry maps model ids to
//! adapters and is built once from configuration.

pub mod anthropic;
pub mod local;
pub mod pairing;
pub mod registry;
pub mod responses;
mod sse;

pub use anthropic::AnthropicAdapter;
pub use local::LocalAdapter;
pub use pairing::strip_orphans;
pub use registry::{ProviderRegistry, build_from_config};
pub use responses::{ResponsesAdapter, ResponsesVariant};
