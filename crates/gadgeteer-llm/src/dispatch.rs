//! Adapter dispatch: first registered adapter whose `supports` matches wins

use crate::provider::{LlmError, LlmResult, LlmStream, ModelSpec, ProviderAdapter};
use crate::types::{GenerationOptions, ModelRef};
use gadgeteer_core::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct ProviderDispatcher {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn resolve(&self, model: &ModelRef) -> LlmResult<Arc<dyn ProviderAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.supports(model))
            .cloned()
            .ok_or_else(|| LlmError::NoAdapter(model.to_string()))
    }

    pub fn spec_for(&self, model: &ModelRef) -> Option<ModelSpec> {
        self.resolve(model).ok().and_then(|a| a.spec_for(model))
    }

    /// Resolve the adapter from `opts.model` and open the stream.
    pub async fn stream(
        &self,
        opts: GenerationOptions,
        cancel: CancellationToken,
    ) -> LlmResult<LlmStream> {
        let model: ModelRef = opts.model.parse()?;
        let adapter = self.resolve(&model)?;
        let spec = adapter.spec_for(&model);
        tracing::debug!(adapter = adapter.name(), model = %model, "dispatching stream");
        adapter.stream(opts, &model, spec.as_ref(), cancel).await
    }

    pub fn count_tokens(&self, messages: &[Message], model: &ModelRef) -> LlmResult<usize> {
        Ok(self.resolve(model)?.count_tokens(messages, model))
    }
}
