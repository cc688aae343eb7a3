//! The Turnwright iteration engine.
//!
//! A run follows a **turn → dispatch → observe** cycle:
//!
//! 1. **Build context**: bounded initial messages from the caller's inputs
//! 2. **Turn**: the provider adapter runs one model turn
//! 3. **If tool calls**: clip, execute concurrently, sanitize, append, loop
//! 4. **If text only**: the run completes with that text
//!
//! The loop also stops on a transport failure, on cancellation, or when the
//! iteration cap is reached. Results always come back as a [`RunResult`].

pub mod context;
pub mod dispatch;
pub mod engine;
pub mod images;
pub mod sanitize;
pub mod text;

pub use context::{
    ContextInput, ContextLimits, DocumentContext, OpenFile, TrimLimits, TrimReport,
    build_initial_messages, trim_to_budget,
};
pub use dispatch::{CallOutcome, execute_batch};
pub use engine::{AgentEngine, EngineSettings, RunParams, RunResult, StopReason, filter_tools};
pub use images::{ImageLimits, extract_image, image_context_message, retire_stale_images};
pub use sanitize::{CIRCULAR_SENTINEL, Sanitizer, SanitizerLimits, render_tool_content};
pub use text::{TRUNCATION_MARKER, smart_truncate};
