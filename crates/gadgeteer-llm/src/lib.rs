//! LLM provider contract and reference adapters for gadgeteer.
//!
//! The agent core only sees the `ProviderAdapter` trait and the
//! `ProviderDispatcher`; the Anthropic and OpenAI adapters here are
//! reference implementations of the contract.

pub mod anthropic;
pub mod dispatch;
pub mod estimate;
pub mod openai;
pub mod pricing;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicAdapter;
pub use dispatch::ProviderDispatcher;
pub use openai::OpenAiAdapter;
pub use pricing::compute_cost;
pub use provider::{
    LlmError, LlmResult, LlmStream, ModelFeatures, ModelSpec, Pricing, ProviderAdapter,
};
pub use types::{GenerationOptions, ModelRef, StreamChunk, ThinkingChunk, ThinkingKind};
