//! Hook system: observers, interceptors, and controllers.
//!
//! Dispatch order within one iteration is fixed: observers see fully
//! computed events and cannot affect the caller; interceptors are pure
//! synchronous transforms composing in registration order; the single
//! controller returns typed actions that direct the loop.

use gadgeteer_core::{CompactionEvent, GadgetCall, GadgetResult, Message, Usage};
use gadgeteer_llm::{GenerationOptions, LlmError};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Immutable snapshot handed to LLM-call hooks.
#[derive(Clone, Debug)]
pub struct LlmCallContext {
    pub iteration: u32,
    pub model: String,
    pub message_count: usize,
}

/// Immutable snapshot handed to chunk hooks.
#[derive(Clone, Debug)]
pub struct ChunkContext {
    pub iteration: u32,
}

/// Read-only lifecycle listener. Failures are caught and logged; they never
/// alter the emitted event sequence or affect other observers.
pub trait Observer: Send + Sync {
    fn on_llm_call_start(&self, _ctx: &LlmCallContext) {}
    fn on_llm_call_ready(&self, _ctx: &LlmCallContext) {}
    fn on_llm_call_complete(&self, _ctx: &LlmCallContext, _usage: Option<&Usage>) {}
    fn on_llm_call_error(&self, _ctx: &LlmCallContext, _error: &LlmError) {}
    fn on_stream_chunk(&self, _chunk: &str, _ctx: &ChunkContext) {}
    fn on_gadget_execution_start(&self, _call: &GadgetCall) {}
    fn on_gadget_execution_complete(&self, _result: &GadgetResult) {}
    fn on_abort(&self) {}
    fn on_compaction(&self, _event: &CompactionEvent) {}
}

/// Pure synchronous transform. Returning `None` from a chunk slot suppresses
/// the chunk; for the assistant-message slot suppression collapses to the
/// empty string rather than omission.
pub trait Interceptor: Send + Sync {
    fn intercept_raw_chunk(&self, chunk: String, _ctx: &ChunkContext) -> Option<String> {
        Some(chunk)
    }
    fn intercept_text_chunk(&self, chunk: String, _ctx: &ChunkContext) -> Option<String> {
        Some(chunk)
    }
    fn intercept_gadget_parameters(&self, params: Value, _call: &GadgetCall) -> Value {
        params
    }
    fn intercept_gadget_result(&self, result: GadgetResult) -> GadgetResult {
        result
    }
    fn intercept_assistant_message(&self, message: String) -> Option<String> {
        Some(message)
    }
}

#[derive(Clone, Debug)]
pub enum BeforeLlmAction {
    Proceed {
        modified_options: Option<GenerationOptions>,
    },
    Skip {
        synthetic_response: String,
    },
}

#[derive(Clone, Debug)]
pub enum AfterLlmAction {
    Continue,
    ModifyAndContinue {
        modified_message: String,
    },
    AppendMessages {
        messages: Vec<Message>,
    },
    AppendAndModify {
        messages: Vec<Message>,
        modified_message: String,
    },
}

#[derive(Clone, Debug)]
pub enum LlmErrorAction {
    Recover { fallback_response: String },
    Rethrow,
}

#[derive(Clone, Debug)]
pub enum BeforeGadgetAction {
    Proceed,
    Skip { synthetic_result: GadgetResult },
}

#[derive(Clone, Debug)]
pub enum AfterGadgetAction {
    Continue,
    Recover { fallback_result: GadgetResult },
}

/// Async decision points. At most one controller per agent; each slot's
/// action set is closed, so an out-of-shape action cannot be constructed.
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    async fn before_llm_call(
        &self,
        _ctx: &LlmCallContext,
        _opts: &GenerationOptions,
    ) -> BeforeLlmAction {
        BeforeLlmAction::Proceed {
            modified_options: None,
        }
    }

    async fn after_llm_call(&self, _ctx: &LlmCallContext, _message: &str) -> AfterLlmAction {
        AfterLlmAction::Continue
    }

    async fn after_llm_error(&self, _ctx: &LlmCallContext, _error: &LlmError) -> LlmErrorAction {
        LlmErrorAction::Rethrow
    }

    async fn before_gadget_execution(&self, _call: &GadgetCall) -> BeforeGadgetAction {
        BeforeGadgetAction::Proceed
    }

    async fn after_gadget_execution(
        &self,
        _call: &GadgetCall,
        _result: &GadgetResult,
    ) -> AfterGadgetAction {
        AfterGadgetAction::Continue
    }
}

/// The three hook layers attached to one agent.
#[derive(Default, Clone)]
pub struct Hooks {
    observers: Vec<Arc<dyn Observer>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    controller: Option<Arc<dyn Controller>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: impl Observer + 'static) {
        self.observers.push(Arc::new(observer));
    }

    pub fn add_interceptor(&mut self, interceptor: impl Interceptor + 'static) {
        self.interceptors.push(Arc::new(interceptor));
    }

    pub fn set_controller(&mut self, controller: impl Controller + 'static) {
        self.controller = Some(Arc::new(controller));
    }

    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.add_interceptor(interceptor);
        self
    }

    pub fn with_controller(mut self, controller: impl Controller + 'static) -> Self {
        self.set_controller(controller);
        self
    }

    // --- observer fan-out, failures isolated ---

    fn each_observer(&self, f: impl Fn(&dyn Observer)) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
                tracing::warn!("observer panicked; continuing");
            }
        }
    }

    pub fn observe_llm_call_start(&self, ctx: &LlmCallContext) {
        self.each_observer(|o| o.on_llm_call_start(ctx));
    }

    pub fn observe_llm_call_ready(&self, ctx: &LlmCallContext) {
        self.each_observer(|o| o.on_llm_call_ready(ctx));
    }

    pub fn observe_llm_call_complete(&self, ctx: &LlmCallContext, usage: Option<&Usage>) {
        self.each_observer(|o| o.on_llm_call_complete(ctx, usage));
    }

    pub fn observe_llm_call_error(&self, ctx: &LlmCallContext, error: &LlmError) {
        self.each_observer(|o| o.on_llm_call_error(ctx, error));
    }

    pub fn observe_stream_chunk(&self, chunk: &str, ctx: &ChunkContext) {
        self.each_observer(|o| o.on_stream_chunk(chunk, ctx));
    }

    pub fn observe_gadget_start(&self, call: &GadgetCall) {
        self.each_observer(|o| o.on_gadget_execution_start(call));
    }

    pub fn observe_gadget_complete(&self, result: &GadgetResult) {
        self.each_observer(|o| o.on_gadget_execution_complete(result));
    }

    pub fn observe_abort(&self) {
        self.each_observer(|o| o.on_abort());
    }

    pub fn observe_compaction(&self, event: &CompactionEvent) {
        self.each_observer(|o| o.on_compaction(event));
    }

    // --- interceptor chains, registration order ---

    pub fn run_raw_chunk(&self, chunk: String, ctx: &ChunkContext) -> Option<String> {
        let mut current = chunk;
        for interceptor in &self.interceptors {
            current = interceptor.intercept_raw_chunk(current, ctx)?;
        }
        Some(current)
    }

    pub fn run_text_chunk(&self, chunk: String, ctx: &ChunkContext) -> Option<String> {
        let mut current = chunk;
        for interceptor in &self.interceptors {
            current = interceptor.intercept_text_chunk(current, ctx)?;
        }
        Some(current)
    }

    pub fn run_gadget_parameters(&self, params: Value, call: &GadgetCall) -> Value {
        self.interceptors
            .iter()
            .fold(params, |p, i| i.intercept_gadget_parameters(p, call))
    }

    pub fn run_gadget_result(&self, result: GadgetResult) -> GadgetResult {
        self.interceptors
            .iter()
            .fold(result, |r, i| i.intercept_gadget_result(r))
    }

    /// Suppression collapses to the empty message, not omission.
    pub fn run_assistant_message(&self, message: String) -> String {
        let mut current = message;
        for interceptor in &self.interceptors {
            match interceptor.intercept_assistant_message(current) {
                Some(m) => current = m,
                None => return String::new(),
            }
        }
        current
    }

    // --- controller slots, defaulting when none is set ---

    pub async fn before_llm_call(
        &self,
        ctx: &LlmCallContext,
        opts: &GenerationOptions,
    ) -> BeforeLlmAction {
        match &self.controller {
            Some(c) => c.before_llm_call(ctx, opts).await,
            None => BeforeLlmAction::Proceed {
                modified_options: None,
            },
        }
    }

    pub async fn after_llm_call(&self, ctx: &LlmCallContext, message: &str) -> AfterLlmAction {
        match &self.controller {
            Some(c) => c.after_llm_call(ctx, message).await,
            None => AfterLlmAction::Continue,
        }
    }

    pub async fn after_llm_error(&self, ctx: &LlmCallContext, error: &LlmError) -> LlmErrorAction {
        match &self.controller {
            Some(c) => c.after_llm_error(ctx, error).await,
            None => LlmErrorAction::Rethrow,
        }
    }

    pub async fn before_gadget_execution(&self, call: &GadgetCall) -> BeforeGadgetAction {
        match &self.controller {
            Some(c) => c.before_gadget_execution(call).await,
            None => BeforeGadgetAction::Proceed,
        }
    }

    pub async fn after_gadget_execution(
        &self,
        call: &GadgetCall,
        result: &GadgetResult,
    ) -> AfterGadgetAction {
        match &self.controller {
            Some(c) => c.after_gadget_execution(call, result).await,
            None => AfterGadgetAction::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn throwing_observer_does_not_stop_the_others() {
        struct Panicky;
        impl Observer for Panicky {
            fn on_abort(&self) {
                panic!("observer bug");
            }
        }
        struct Counting(Arc<AtomicUsize>);
        impl Observer for Counting {
            fn on_abort(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let hooks = Hooks::new()
            .with_observer(Panicky)
            .with_observer(Counting(count.clone()));
        hooks.observe_abort();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interceptors_compose_in_registration_order() {
        struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl Interceptor for Tag {
            fn intercept_text_chunk(&self, chunk: String, _ctx: &ChunkContext) -> Option<String> {
                self.1.lock().unwrap().push(self.0);
                Some(format!("{}{}", chunk, self.0))
            }
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let hooks = Hooks::new()
            .with_interceptor(Tag("a", order.clone()))
            .with_interceptor(Tag("b", order.clone()));

        let out = hooks.run_text_chunk("x".into(), &ChunkContext { iteration: 0 });
        assert_eq!(out.as_deref(), Some("xab"));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn chunk_suppression_short_circuits() {
        struct Drop_;
        impl Interceptor for Drop_ {
            fn intercept_raw_chunk(&self, _chunk: String, _ctx: &ChunkContext) -> Option<String> {
                None
            }
        }
        struct Never(Arc<AtomicUsize>);
        impl Interceptor for Never {
            fn intercept_raw_chunk(&self, chunk: String, _ctx: &ChunkContext) -> Option<String> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Some(chunk)
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let hooks = Hooks::new()
            .with_interceptor(Drop_)
            .with_interceptor(Never(count.clone()));
        assert!(hooks
            .run_raw_chunk("x".into(), &ChunkContext { iteration: 0 })
            .is_none());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn assistant_message_suppression_collapses_to_empty() {
        struct Mute;
        impl Interceptor for Mute {
            fn intercept_assistant_message(&self, _message: String) -> Option<String> {
                None
            }
        }
        let hooks = Hooks::new().with_interceptor(Mute);
        assert_eq!(hooks.run_assistant_message("secret".into()), "");
    }

    #[tokio::test]
    async fn controller_defaults_without_registration() {
        let hooks = Hooks::new();
        let ctx = LlmCallContext {
            iteration: 0,
            model: "anthropic:claude-sonnet-4-5".into(),
            message_count: 1,
        };
        assert!(matches!(
            hooks.before_llm_call(&ctx, &GenerationOptions::default()).await,
            BeforeLlmAction::Proceed { .. }
        ));
        let call = GadgetCall::new("echo", "1", json!({}));
        assert!(matches!(
            hooks.before_gadget_execution(&call).await,
            BeforeGadgetAction::Proceed
        ));
        assert!(matches!(
            hooks
                .after_llm_error(&ctx, &LlmError::StreamError("x".into()))
                .await,
            LlmErrorAction::Rethrow
        ));
    }
}
