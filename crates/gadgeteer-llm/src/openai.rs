//! OpenAI chat-completions adapter with SSE streaming

use crate::provider::{
    LlmError, LlmResult, LlmStream, ModelFeatures, ModelSpec, Pricing, ProviderAdapter,
};
use crate::types::{GenerationOptions, ModelRef, StreamChunk};
use futures::StreamExt;
use gadgeteer_core::{ContentPart, ImageSource, Message, MessageContent, Role, Usage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    /// Point at an OpenAI-compatible server (vLLM, llama.cpp, ...).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = match &message.content {
                MessageContent::Text(s) => Value::String(s.clone()),
                MessageContent::Parts(parts) => Value::Array(
                    parts
                        .iter()
                        .filter_map(|part| match part {
                            ContentPart::Text { text } => {
                                Some(json!({"type": "text", "text": text}))
                            }
                            ContentPart::Image { source, media_type } => {
                                let url = match source {
                                    ImageSource::Base64 { data } => {
                                        format!("data:{};base64,{}", media_type, data)
                                    }
                                    ImageSource::Url { url } => url.clone(),
                                };
                                Some(json!({"type": "image_url", "image_url": {"url": url}}))
                            }
                            ContentPart::Audio { .. } => {
                                warn!("dropping audio part: not supported by chat completions");
                                None
                            }
                        })
                        .collect(),
                ),
            };
            WireMessage {
                role: role.to_string(),
                content,
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports(&self, model: &ModelRef) -> bool {
        model.provider == "openai"
    }

    fn model_specs(&self) -> Vec<ModelSpec> {
        vec![
            ModelSpec {
                model_id: "gpt-4o".to_string(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                pricing: Pricing {
                    input: 2.5,
                    output: 10.0,
                    cached_input: Some(1.25),
                    cache_write_input: None,
                },
                features: ModelFeatures {
                    streaming: true,
                    vision: true,
                    thinking: false,
                },
            },
            ModelSpec {
                model_id: "gpt-4o-mini".to_string(),
                context_window: 128_000,
                max_output_tokens: 16_384,
                pricing: Pricing {
                    input: 0.15,
                    output: 0.6,
                    cached_input: Some(0.075),
                    cache_write_input: None,
                },
                features: ModelFeatures {
                    streaming: true,
                    vision: true,
                    thinking: false,
                },
            },
        ]
    }

    async fn stream(
        &self,
        opts: GenerationOptions,
        model: &ModelRef,
        _spec: Option<&ModelSpec>,
        cancel: CancellationToken,
    ) -> LlmResult<LlmStream> {
        let body = WireRequest {
            model: model.model.clone(),
            messages: convert_messages(&opts.messages),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        };

        debug!("openai request: model={}", body.model);

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("openai error {}: {}", status, error_text);
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
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<Usage> = None;

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

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    yield Ok(StreamChunk::finish(
                        finish_reason.clone().unwrap_or_else(|| "stop".to_string()),
                        usage.clone(),
                    ));
                    return;
                }

                let parsed: WireChunk = match serde_json::from_str(data) {
                    Ok(p) => p,
                    Err(e) => {
                        yield Err(LlmError::InvalidResponse(e.to_string()));
                        continue;
                    }
                };

                if let Some(u) = parsed.usage {
                    usage = Some(Usage {
                        input_tokens: u.prompt_tokens,
                        output_tokens: u.completion_tokens,
                        total_tokens: u.total_tokens,
                        ..Default::default()
                    });
                }
                if let Some(choice) = parsed.choices.into_iter().next() {
                    if let Some(reason) = choice.finish_reason {
                        finish_reason = Some(reason);
                    }
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            yield Ok(StreamChunk::text(content));
                        }
                    }
                }
            }
        }
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: Value,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_pass_through() {
        let wire = convert_messages(&[Message::system("be brief"), Message::user("hi")]);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[0].content, Value::String("be brief".into()));
    }

    #[test]
    fn base64_images_become_data_urls() {
        let wire = convert_messages(&[Message::user_parts(vec![ContentPart::image_base64(
            "aGk=",
            "image/png",
        )])]);
        let url = wire[0].content[0]["image_url"]["url"].as_str().unwrap();
        assert_eq!(url, "data:image/png;base64,aGk=");
    }
}
