//! # Turnwright Core
//!
//! Domain types, traits, and error definitions for the Turnwright
//! tool-calling engine. This crate has **no transport dependencies**: it
//! defines the model that the adapters, the engine, and the host all
//! implement against.
//!
//! ## Seams
//!
//! - [`ProviderAdapter`]: one implementation per backend wire-protocol family
//! - [`ToolExecutor`]: the host's tool runtime, behind its own security boundary
//! - [`EventSink`]: optional progress consumer for streaming callers

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use event::{AgentEvent, ChannelSink, EventEmitter, EventSink, SinkError};
pub use message::{ImagePart, Message, MessageToolCall, Role};
pub use provider::{
    PerformanceHints, ProtocolFamily, ProviderAdapter, ProviderHandle, SessionState,
    ToolDefinition, TurnOutput, TurnRequest, Usage,
};
pub use tool::{
    ParsedArguments, PendingEdit, ToolCall, ToolCategory, ToolContext, ToolExecutor, ToolValue,
    parse_arguments,
};
