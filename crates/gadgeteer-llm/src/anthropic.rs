//! Anthropic messages API adapter with SSE streaming

use crate::provider::{
    LlmError, LlmResult, LlmStream, ModelFeatures, ModelSpec, Pricing, ProviderAdapter,
};
use crate::types::{GenerationOptions, ModelRef, StreamChunk, ThinkingChunk, ThinkingKind};
use futures::StreamExt;
use gadgeteer_core::{ContentPart, ImageSource, Message, MessageContent, Role, Usage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Provider quirk normalization: system messages move to the top-level
/// `system` field, and consecutive same-role messages are merged.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
    let mut system_parts = Vec::new();
    let mut wire: Vec<WireMessage> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_parts.push(message.text()),
            role => {
                let role_str = match role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!(),
                };
                let content = convert_content(&message.content);
                match wire.last_mut() {
                    Some(last) if last.role == role_str => last.content.extend(content),
                    _ => wire.push(WireMessage {
                        role: role_str,
                        content,
                    }),
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, wire)
}

fn convert_content(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(s) => vec![json!({"type": "text", "text": s})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentPart::Image { source, media_type } => Some(match source {
                    ImageSource::Base64 { data } => json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    }),
                    ImageSource::Url { url } => json!({
                        "type": "image",
                        "source": {"type": "url", "url": url},
                    }),
                }),
                ContentPart::Audio { .. } => {
                    warn!("dropping audio part: not supported by the messages API");
                    None
                }
            })
            .collect(),
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports(&self, model: &ModelRef) -> bool {
        model.provider == "anthropic"
    }

    fn model_specs(&self) -> Vec<ModelSpec> {
        vec![
            ModelSpec {
                model_id: "claude-sonnet-4-5".to_string(),
                context_window: 200_000,
                max_output_tokens: 64_000,
                pricing: Pricing {
                    input: 3.0,
                    output: 15.0,
                    cached_input: Some(0.3),
                    cache_write_input: Some(3.75),
                },
                features: ModelFeatures {
                    streaming: true,
                    vision: true,
                    thinking: true,
                },
            },
            ModelSpec {
                model_id: "claude-haiku-4-5".to_string(),
                context_window: 200_000,
                max_output_tokens: 64_000,
                pricing: Pricing {
                    input: 1.0,
                    output: 5.0,
                    cached_input: Some(0.1),
                    cache_write_input: Some(1.25),
                },
                features: ModelFeatures {
                    streaming: true,
                    vision: true,
                    thinking: true,
                },
            },
        ]
    }

    async fn stream(
        &self,
        opts: GenerationOptions,
        model: &ModelRef,
        spec: Option<&ModelSpec>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmStream> {
        let (system, messages) = convert_messages(&opts.messages);
        let max_tokens = opts
            .max_tokens
            .or(spec.map(|s| s.max_output_tokens))
            .unwrap_or(8192);

        let body = WireRequest {
            model: model.model.clone(),
            messages,
            max_tokens,
            stream: true,
            system,
            temperature: opts.temperature,
        };

        debug!("anthropic request: model={}", body.model);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("anthropic error {}: {}", status, error_text);
            return Err(match status.as_u16() {
                401 => LlmError::AuthFailed(error_text),
                429 => LlmError::RateLimited {
                    retry_after_ms: 60_000,
                },
                _ => LlmError::RequestFailed(format!("{}: {}", status, error_text)),
            });
        }

        Ok(Box::pin(parse_sse_stream(response.bytes_stream(), cancel)))
    }
}

fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = LlmResult<StreamChunk>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        let mut usage = Usage::default();
        let mut finish_reason: Option<String> = None;

        tokio::pin!(bytes_stream);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    yield Err(LlmError::Cancelled);
                    return;
                }
                next = bytes_stream.next() => match next {
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        yield Err(LlmError::StreamError(e.to_string()));
                        continue;
                    }
                    None => break,
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(event_end) = buffer.find("\n\n") {
                let event_str = buffer[..event_end].to_string();
                buffer = buffer[event_end + 2..].to_string();

                let mut event_type = String::new();
                let mut event_data = String::new();
                for line in event_str.lines() {
                    if let Some(rest) = line.strip_prefix("event: ") {
                        event_type = rest.to_string();
                    } else if let Some(rest) = line.strip_prefix("data: ") {
                        event_data = rest.to_string();
                    }
                }
                if event_data.is_empty() {
                    continue;
                }

                match event_type.as_str() {
                    "message_start" => {
                        if let Ok(data) = serde_json::from_str::<MessageStart>(&event_data) {
                            usage.input_tokens = data.message.usage.input_tokens.unwrap_or(0);
                            usage.cached_input_tokens = data.message.usage.cache_read_input_tokens;
                            usage.cache_creation_input_tokens =
                                data.message.usage.cache_creation_input_tokens;
                        }
                    }
                    "content_block_delta" => {
                        if let Ok(data) = serde_json::from_str::<ContentBlockDelta>(&event_data) {
                            match data.delta {
                                DeltaType::TextDelta { text } => {
                                    yield Ok(StreamChunk::text(text));
                                }
                                DeltaType::ThinkingDelta { thinking } => {
                                    yield Ok(StreamChunk {
                                        thinking: Some(ThinkingChunk {
                                            content: thinking,
                                            kind: ThinkingKind::Thinking,
                                            signature: None,
                                        }),
                                        ..Default::default()
                                    });
                                }
                                DeltaType::SignatureDelta { signature } => {
                                    yield Ok(StreamChunk {
                                        thinking: Some(ThinkingChunk {
                                            content: String::new(),
                                            kind: ThinkingKind::Thinking,
                                            signature: Some(signature),
                                        }),
                                        ..Default::default()
                                    });
                                }
                            }
                        }
                    }
                    "message_delta" => {
                        if let Ok(data) = serde_json::from_str::<MessageDelta>(&event_data) {
                            if let Some(reason) = data.delta.stop_reason {
                                finish_reason = Some(reason);
                            }
                            if let Some(u) = data.usage {
                                usage.output_tokens = u.output_tokens.unwrap_or(0);
                            }
                        }
                    }
                    "message_stop" => {
                        usage.total_tokens = usage.input_tokens + usage.output_tokens;
                        yield Ok(StreamChunk::finish(
                            finish_reason.clone().unwrap_or_else(|| "end_turn".to_string()),
                            Some(usage.clone()),
                        ));
                    }
                    "error" => {
                        if let Ok(data) = serde_json::from_str::<ErrorEvent>(&event_data) {
                            yield Err(LlmError::StreamError(data.error.message));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Deserialize)]
struct MessageStartBody {
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum DeltaType {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta { signature: String },
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct MessageDeltaContent {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_system_field() {
        let messages = vec![
            Message::system("Be brief."),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let (system, wire) = convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("Be brief."));
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "user");
        assert_eq!(wire[1].role, "assistant");
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let messages = vec![
            Message::user("first"),
            Message::user("second"),
            Message::assistant("ok"),
        ];
        let (_, wire) = convert_messages(&messages);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].content.len(), 2);
    }

    #[test]
    fn image_parts_convert_to_source_blocks() {
        let messages = vec![Message::user_parts(vec![
            ContentPart::text("see"),
            ContentPart::image_base64("aGk=", "image/png"),
        ])];
        let (_, wire) = convert_messages(&messages);
        assert_eq!(wire[0].content[1]["type"], "image");
        assert_eq!(wire[0].content[1]["source"]["media_type"], "image/png");
    }
}
