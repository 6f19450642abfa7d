//! Request and streaming-response types for the provider contract

use gadgeteer_core::{Message, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::provider::LlmError;

/// A `provider:model-id` pair, e.g. `anthropic:claude-sonnet-4-5`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl FromStr for ModelRef {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(Self::new(provider, model))
            }
            _ => Err(LlmError::InvalidModelRef(s.to_string())),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Options for one LLM generation. Cancellation is threaded separately as a
/// `CancellationToken`.
#[derive(Clone, Debug)]
pub struct GenerationOptions {
    /// Full `provider:model-id` identifier.
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "anthropic:claude-sonnet-4-5".to_string(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: Some(8192),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingKind {
    Thinking,
    Redacted,
}

/// A reasoning fragment streamed alongside regular text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThinkingChunk {
    pub content: String,
    pub kind: ThinkingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// One normalized chunk of a provider stream. Adapters map vendor events
/// into this shape; unknown vendor events go into `raw_event`.
#[derive(Clone, Debug, Default)]
pub struct StreamChunk {
    pub text: Option<String>,
    pub thinking: Option<ThinkingChunk>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub raw_event: Option<Value>,
}

impl StreamChunk {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            text: Some(s.into()),
            ..Default::default()
        }
    }

    pub fn finish(reason: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            usage,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_ref_parses_provider_and_model() {
        let r: ModelRef = "anthropic:claude-sonnet-4-5".parse().unwrap();
        assert_eq!(r.provider, "anthropic");
        assert_eq!(r.model, "claude-sonnet-4-5");
        assert_eq!(r.to_string(), "anthropic:claude-sonnet-4-5");
    }

    #[test]
    fn model_ref_rejects_missing_parts() {
        assert!("claude-sonnet-4-5".parse::<ModelRef>().is_err());
        assert!(":model".parse::<ModelRef>().is_err());
        assert!("provider:".parse::<ModelRef>().is_err());
    }
}
