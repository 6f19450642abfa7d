//! Provider adapter contract

use crate::estimate;
use crate::types::{GenerationOptions, ModelRef, StreamChunk};
use futures::Stream;
use gadgeteer_core::Message;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("invalid model identifier: {0} (expected provider:model-id)")]
    InvalidModelRef(String),

    #[error("no adapter supports model: {0}")]
    NoAdapter(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Per-million-token prices in USD.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_input: Option<f64>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelFeatures {
    pub streaming: bool,
    pub vision: bool,
    pub thinking: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub pricing: Pricing,
    pub features: ModelFeatures,
}

/// Stream type for normalized provider responses
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamChunk>> + Send>>;

/// The contract every provider adapter fulfills. Adapters normalize vendor
/// quirks (system-message placement, same-role merging, SSE framing) so the
/// core can treat the message list as an opaque sequence.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Does this adapter handle the given `provider:model-id`?
    fn supports(&self, model: &ModelRef) -> bool;

    fn model_specs(&self) -> Vec<ModelSpec>;

    /// Stream a completion. When `cancel` fires, the underlying connection
    /// is dropped and the stream terminates.
    async fn stream(
        &self,
        opts: GenerationOptions,
        model: &ModelRef,
        spec: Option<&ModelSpec>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmStream>;

    /// Count tokens for a message list. The default is the character
    /// estimate with a per-media surcharge; adapters with a real tokenizer
    /// endpoint override this.
    fn count_tokens(&self, messages: &[Message], _model: &ModelRef) -> usize {
        estimate::estimate_messages(messages)
    }
}

impl dyn ProviderAdapter {
    pub fn spec_for(&self, model: &ModelRef) -> Option<ModelSpec> {
        self.model_specs()
            .into_iter()
            .find(|s| s.model_id == model.model)
    }
}
