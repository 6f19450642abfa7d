//! Gadget executor: validation, timeout, cancellation, side-channel
//! translation, media persistence, and output spillover.
//!
//! Every path funnels into a plain `GadgetResult`; exceptions a gadget uses
//! for control flow (human input, task completion, timeout) never propagate
//! past this module.

use crate::hooks::Hooks;
use gadgeteer_core::{GadgetCall, GadgetResult, MediaStore, OutputStore};
use gadgeteer_gadgets::{GadgetContext, GadgetOutcome, GadgetRegistry, OUTPUT_VIEWER_NAME};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Host-provided answer channel for gadgets that raise a human-input
/// request. The run suspends until this returns.
#[async_trait::async_trait]
pub trait HumanInputHandler: Send + Sync {
    async fn request_human_input(&self, question: &str) -> Result<String, String>;
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Applied when a gadget declares no timeout of its own.
    pub default_timeout: Duration,
    /// Result bytes beyond this budget spill into the output store.
    pub output_char_budget: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(120),
            output_char_budget: 50_000,
        }
    }
}

pub struct GadgetExecutor {
    registry: Arc<GadgetRegistry>,
    hooks: Arc<Hooks>,
    output_store: Arc<OutputStore>,
    media_store: Arc<MediaStore>,
    human_input: Option<Arc<dyn HumanInputHandler>>,
    config: ExecutorConfig,
}

impl GadgetExecutor {
    pub fn new(
        registry: Arc<GadgetRegistry>,
        hooks: Arc<Hooks>,
        output_store: Arc<OutputStore>,
        media_store: Arc<MediaStore>,
        human_input: Option<Arc<dyn HumanInputHandler>>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            hooks,
            output_store,
            media_store,
            human_input,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one call to completion. Never panics, never returns an error —
    /// failures of every kind become an error `GadgetResult`.
    pub async fn execute(&self, call: &GadgetCall, ctx: &GadgetContext) -> GadgetResult {
        let started = Instant::now();

        if let Some(parse_error) = &call.parse_error {
            let result = GadgetResult::failure(
                &call.invocation_id,
                &call.name,
                call.parameters.clone(),
                format!("gadget call could not be parsed: {}", parse_error),
            );
            return self.finalize(result, started);
        }

        let Some(gadget) = self.registry.get(&call.name) else {
            let result = GadgetResult::failure(
                &call.invocation_id,
                &call.name,
                call.parameters.clone(),
                format!("unknown gadget: {}", call.name),
            );
            return self.finalize(result, started);
        };

        let params = match gadget.schema().validate(&call.parameters) {
            Ok(p) => p,
            Err(e) => {
                let result = GadgetResult::failure(
                    &call.invocation_id,
                    &call.name,
                    call.parameters.clone(),
                    e.to_string(),
                );
                return self.finalize(result, started);
            }
        };

        let timeout = gadget.timeout().unwrap_or(self.config.default_timeout);
        debug!(gadget = %call.name, invocation = %call.invocation_id, ?timeout, "executing gadget");

        let mut timed_out = false;
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => GadgetOutcome::error("cancelled"),
            outcome = tokio::time::timeout(timeout, gadget.execute(params.clone(), ctx)) => {
                match outcome {
                    Ok(o) => o,
                    Err(_) => {
                        timed_out = true;
                        GadgetOutcome::error(format!("timed out after {}s", timeout.as_secs()))
                    }
                }
            }
        };

        let mut result = self
            .translate(outcome, &call.invocation_id, &call.name, &params)
            .await;
        result.timed_out = timed_out;
        if !result.is_error() && gadget.breaks_loop() {
            result.breaks_loop = true;
        }
        self.finalize(result, started)
    }

    /// Map a gadget outcome onto the uniform result shape.
    async fn translate(
        &self,
        outcome: GadgetOutcome,
        invocation_id: &str,
        name: &str,
        params: &serde_json::Value,
    ) -> GadgetResult {
        match outcome {
            GadgetOutcome::Text(text) => {
                GadgetResult::success(invocation_id, name, params.clone(), text)
            }
            GadgetOutcome::Json(value) => GadgetResult::success(
                invocation_id,
                name,
                params.clone(),
                serde_json::to_string_pretty(&value).unwrap_or_default(),
            ),
            GadgetOutcome::Media(payload) => match self.media_store.insert(payload) {
                Ok(handle) => {
                    let mut result = GadgetResult::success(
                        invocation_id,
                        name,
                        params.clone(),
                        format!(
                            "[media {} ({} bytes) stored as {}]",
                            handle.mime_type, handle.size_bytes, handle.id
                        ),
                    );
                    result.media.push(handle);
                    result
                }
                Err(e) => GadgetResult::failure(
                    invocation_id,
                    name,
                    params.clone(),
                    format!("failed to store media: {}", e),
                ),
            },
            GadgetOutcome::HumanInput { question } => match &self.human_input {
                Some(handler) => match handler.request_human_input(&question).await {
                    Ok(answer) => {
                        GadgetResult::success(invocation_id, name, params.clone(), answer)
                    }
                    Err(e) => GadgetResult::failure(
                        invocation_id,
                        name,
                        params.clone(),
                        format!("human input failed: {}", e),
                    ),
                },
                None => GadgetResult::failure(
                    invocation_id,
                    name,
                    params.clone(),
                    "human input required but no handler is configured",
                ),
            },
            GadgetOutcome::Complete { message } => {
                let mut result = GadgetResult::success(
                    invocation_id,
                    name,
                    params.clone(),
                    message.unwrap_or_else(|| "task complete".to_string()),
                );
                result.breaks_loop = true;
                result
            }
            GadgetOutcome::Error(e) => {
                GadgetResult::failure(invocation_id, name, params.clone(), e)
            }
        }
    }

    /// Interceptor rewrite, then spillover if the rewritten result is over
    /// budget. The original text is what lands in the store.
    fn finalize(&self, mut result: GadgetResult, started: Instant) -> GadgetResult {
        result.execution_time_ms = started.elapsed().as_millis() as u64;

        let original = result.result.clone();
        result = self.hooks.run_gadget_result(result);

        if result.gadget_name != OUTPUT_VIEWER_NAME {
            if let Some(text) = &result.result {
                if text.len() > self.config.output_char_budget {
                    let stored = original.unwrap_or_else(|| text.clone());
                    let id = self.output_store.insert(&result.gadget_name, stored);
                    warn!(
                        gadget = %result.gadget_name,
                        bytes = text.len(),
                        id = %id,
                        "gadget output over budget; spilled to output store"
                    );
                    result.result = Some(format!(
                        "[Gadget \"{}\" returned too much data: {} chars exceeds the {} char \
                         budget. Use {} with id \"{}\" to retrieve the full output.]",
                        result.gadget_name,
                        text.len(),
                        self.config.output_char_budget,
                        OUTPUT_VIEWER_NAME,
                        id
                    ));
                }
            }
        }
        result
    }
}
