//! LLM client layer - the oracle boundary
//!
//! - Message and completion types
//! - LlmClient trait for API abstraction
//! - AnthropicClient implementation
//! - MockLlmClient for tests and offline runs

pub mod anthropic;
pub mod client;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use client::{LlmClient, MockLlmClient};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, Usage};
