//! The agent loop: iteration control, LLM call orchestration, compaction,
//! conversation feedback, and termination handling.

use crate::compaction::Compactor;
use crate::conversation::Conversation;
use crate::error::AgentResult;
use crate::executor::{ExecutorConfig, GadgetExecutor, HumanInputHandler};
use crate::hooks::{AfterLlmAction, BeforeLlmAction, Hooks, LlmCallContext, LlmErrorAction};
use crate::processor::{process_stream, ProcessorContext};
use futures::StreamExt;
use gadgeteer_core::{
    ContentPart, CoreResult, ExecutionTree, GadgetResult, LlmCompletion, MediaStore, Message,
    NodeId, OutputStore, StreamCompletion, StreamEvent,
};
use gadgeteer_gadgets::{GadgetRegistry, Markers, OutputViewerGadget};
use gadgeteer_llm::{compute_cost, GenerationOptions, LlmError, ModelRef, ProviderDispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do when an iteration produced text but no gadget calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextOnlyHandler {
    /// End the run (the default).
    #[default]
    Terminate,
    /// Append an acknowledgement user message and keep iterating.
    Acknowledge,
    /// Ask the human-input handler for the next user message.
    WaitForInput,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    MaxIterations,
    BreaksLoop,
    TextOnlyTerminate,
    ControllerSkip,
    Aborted,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub termination: Termination,
    pub iterations: u32,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Full `provider:model-id` identifier.
    pub model: String,
    pub max_iterations: u32,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub text_only_handler: TextOnlyHandler,
    /// When set and an iteration is text-only, the text is wrapped as a
    /// synthetic result of this gadget instead of ending the run.
    pub synthetic_text_gadget: Option<String>,
    pub executor: ExecutorConfig,
    pub markers: Markers,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "anthropic:claude-sonnet-4-5".to_string(),
            max_iterations: 25,
            temperature: None,
            max_tokens: Some(8192),
            text_only_handler: TextOnlyHandler::default(),
            synthetic_text_gadget: None,
            executor: ExecutorConfig::default(),
            markers: Markers::default(),
        }
    }
}

pub struct Agent {
    dispatcher: Arc<ProviderDispatcher>,
    registry: Arc<GadgetRegistry>,
    hooks: Arc<Hooks>,
    executor: Arc<GadgetExecutor>,
    conversation: Mutex<Conversation>,
    tree: Arc<ExecutionTree>,
    output_store: Arc<OutputStore>,
    media_store: Arc<MediaStore>,
    compactor: Option<Arc<dyn Compactor>>,
    human_input: Option<Arc<dyn HumanInputHandler>>,
    config: AgentConfig,
    parent_node_id: Option<NodeId>,
    depth_base: u32,
}

impl Agent {
    pub fn builder(dispatcher: Arc<ProviderDispatcher>) -> AgentBuilder {
        AgentBuilder::new(dispatcher)
    }

    pub fn tree(&self) -> &Arc<ExecutionTree> {
        &self.tree
    }

    pub fn registry(&self) -> &Arc<GadgetRegistry> {
        &self.registry
    }

    pub fn output_store(&self) -> &Arc<OutputStore> {
        &self.output_store
    }

    pub fn media_store(&self) -> &Arc<MediaStore> {
        &self.media_store
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn conversation(&self) -> &Mutex<Conversation> {
        &self.conversation
    }

    /// Remove the media store's backing directory, if any.
    pub fn cleanup(&self) -> CoreResult<()> {
        self.media_store.cleanup()
    }

    /// Drive the loop to a terminal condition, sending every public event
    /// to `events`. Only LLM errors and internal invariant breaks return
    /// `Err`; gadget failures are data, and abort is a normal outcome.
    pub async fn run(
        &self,
        user_message: impl Into<String>,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> AgentResult<RunOutcome> {
        {
            let message = user_message.into();
            if !message.is_empty() {
                self.conversation.lock().await.add_user_message(message);
            }
        }

        let mut iterations_done = 0;
        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                self.hooks.observe_abort();
                return Ok(RunOutcome {
                    termination: Termination::Aborted,
                    iterations: iterations_done,
                });
            }
            iterations_done = iteration + 1;

            if let Some(compactor) = &self.compactor {
                let event = {
                    let mut convo = self.conversation.lock().await;
                    compactor.check_and_compact(&mut convo, iteration).await
                };
                if let Some(event) = event {
                    self.hooks.observe_compaction(&event);
                    let _ = events.send(StreamEvent::Compaction { event }).await;
                }
            }

            let messages = self.conversation.lock().await.messages();
            let mut opts = GenerationOptions {
                model: self.config.model.clone(),
                messages,
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };
            let call_ctx = LlmCallContext {
                iteration,
                model: opts.model.clone(),
                message_count: opts.messages.len(),
            };

            self.hooks.observe_llm_call_start(&call_ctx);
            match self.hooks.before_llm_call(&call_ctx, &opts).await {
                BeforeLlmAction::Skip { synthetic_response } => {
                    self.conversation
                        .lock()
                        .await
                        .add_assistant_message(&synthetic_response);
                    let _ = events
                        .send(StreamEvent::text(synthetic_response.clone()))
                        .await;
                    let completion = StreamCompletion {
                        final_message: synthetic_response,
                        finish_reason: Some("skipped".to_string()),
                        ..Default::default()
                    };
                    let _ = events.send(StreamEvent::StreamComplete { completion }).await;
                    return Ok(RunOutcome {
                        termination: Termination::ControllerSkip,
                        iterations: iterations_done,
                    });
                }
                BeforeLlmAction::Proceed { modified_options } => {
                    if let Some(modified) = modified_options {
                        opts = modified;
                    }
                }
            }
            self.hooks.observe_llm_call_ready(&call_ctx);

            let node_id = self.tree.add_llm_call(
                self.parent_node_id.as_deref(),
                iteration,
                &opts.model,
                format!("{} messages", opts.messages.len()),
            )?;

            let raw = match self.dispatcher.stream(opts.clone(), cancel.clone()).await {
                Ok(stream) => stream,
                Err(error) => {
                    self.handle_llm_error(&call_ctx, &node_id, error, &events)
                        .await?;
                    continue;
                }
            };

            let proc = process_stream(
                raw,
                ProcessorContext {
                    iteration,
                    hooks: self.hooks.clone(),
                    executor: self.executor.clone(),
                    registry: self.registry.clone(),
                    markers: self.config.markers.clone(),
                    tree: self.tree.clone(),
                    llm_node_id: node_id.clone(),
                    cancel: cancel.clone(),
                    depth_base: self.depth_base,
                },
            );
            tokio::pin!(proc);

            let mut completion: Option<StreamCompletion> = None;
            let mut stream_error: Option<LlmError> = None;
            while let Some(item) = proc.next().await {
                match item {
                    Ok(event) => {
                        if let StreamEvent::StreamComplete { completion: c } = &event {
                            completion = Some(c.clone());
                        }
                        if events.send(event).await.is_err() {
                            debug!("event receiver dropped");
                        }
                    }
                    Err(error) => {
                        stream_error = Some(error);
                        break;
                    }
                }
            }

            if let Some(error) = stream_error {
                self.handle_llm_error(&call_ctx, &node_id, error, &events)
                    .await?;
                continue;
            }

            let Some(completion) = completion else {
                // The processor ended without a stream_complete: aborted.
                self.hooks.observe_abort();
                let _ = self.tree.complete_llm_call(
                    &node_id,
                    LlmCompletion {
                        finish_reason: Some("aborted".to_string()),
                        ..Default::default()
                    },
                );
                return Ok(RunOutcome {
                    termination: Termination::Aborted,
                    iterations: iterations_done,
                });
            };

            let cost = self.cost_for(&completion);
            self.tree.complete_llm_call(
                &node_id,
                LlmCompletion {
                    response: Some(completion.raw_response.clone()),
                    usage: completion.usage.clone(),
                    cost: Some(cost),
                    finish_reason: completion.finish_reason.clone(),
                },
            )?;
            self.hooks
                .observe_llm_call_complete(&call_ctx, completion.usage.as_ref());

            let mut final_message = completion.final_message.clone();
            let mut appended: Vec<Message> = Vec::new();
            match self.hooks.after_llm_call(&call_ctx, &final_message).await {
                AfterLlmAction::Continue => {}
                AfterLlmAction::ModifyAndContinue { modified_message } => {
                    final_message = modified_message;
                }
                AfterLlmAction::AppendMessages { messages } => appended = messages,
                AfterLlmAction::AppendAndModify {
                    messages,
                    modified_message,
                } => {
                    appended = messages;
                    final_message = modified_message;
                }
            }

            {
                let mut convo = self.conversation.lock().await;
                // With gadget calls the raw text (blocks included) is what
                // the model must see next turn to correlate results.
                let assistant_text = if completion.did_execute_gadgets {
                    completion.raw_response.clone()
                } else {
                    final_message.clone()
                };
                if !assistant_text.is_empty() {
                    convo.add_assistant_message(assistant_text);
                }
                for message in appended {
                    convo.push(message);
                }
                if completion.did_execute_gadgets {
                    for result in &completion.outputs {
                        let parts = self.media_parts_for(result);
                        convo.add_gadget_result(
                            &result.gadget_name,
                            &result.invocation_id,
                            &result.body(),
                            parts,
                        );
                    }
                }
            }

            if completion.should_break_loop {
                info!(iteration, "gadget requested loop termination");
                return Ok(RunOutcome {
                    termination: Termination::BreaksLoop,
                    iterations: iterations_done,
                });
            }

            if !completion.did_execute_gadgets {
                if let Some(gadget_name) = &self.config.synthetic_text_gadget {
                    self.conversation.lock().await.add_gadget_result(
                        gadget_name,
                        &format!("text-{}", iteration),
                        &final_message,
                        None,
                    );
                } else {
                    match self.config.text_only_handler {
                        TextOnlyHandler::Terminate => {
                            return Ok(RunOutcome {
                                termination: Termination::TextOnlyTerminate,
                                iterations: iterations_done,
                            });
                        }
                        TextOnlyHandler::Acknowledge => {
                            self.conversation.lock().await.add_user_message("Continue.");
                        }
                        TextOnlyHandler::WaitForInput => match &self.human_input {
                            Some(handler) => {
                                match handler
                                    .request_human_input(
                                        "The agent is waiting for further instructions.",
                                    )
                                    .await
                                {
                                    Ok(input) => {
                                        self.conversation.lock().await.add_user_message(input);
                                    }
                                    Err(e) => {
                                        warn!("human input failed: {}", e);
                                        return Ok(RunOutcome {
                                            termination: Termination::TextOnlyTerminate,
                                            iterations: iterations_done,
                                        });
                                    }
                                }
                            }
                            None => {
                                warn!("wait_for_input with no human-input handler; terminating");
                                return Ok(RunOutcome {
                                    termination: Termination::TextOnlyTerminate,
                                    iterations: iterations_done,
                                });
                            }
                        },
                    }
                }
            }
        }

        Ok(RunOutcome {
            termination: Termination::MaxIterations,
            iterations: iterations_done,
        })
    }

    /// Run with an internal channel and return the collected events.
    pub async fn run_collect(
        &self,
        user_message: impl Into<String>,
        cancel: CancellationToken,
    ) -> AgentResult<(Vec<StreamEvent>, RunOutcome)> {
        let (tx, mut rx) = mpsc::channel(64);
        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        });
        let outcome = self.run(user_message, tx, cancel).await;
        let events = collector.await.unwrap_or_default();
        Ok((events, outcome?))
    }

    async fn handle_llm_error(
        &self,
        ctx: &LlmCallContext,
        node_id: &str,
        error: LlmError,
        events: &mpsc::Sender<StreamEvent>,
    ) -> AgentResult<()> {
        self.hooks.observe_llm_call_error(ctx, &error);
        match self.hooks.after_llm_error(ctx, &error).await {
            LlmErrorAction::Recover { fallback_response } => {
                let _ = self.tree.complete_llm_call(
                    node_id,
                    LlmCompletion {
                        finish_reason: Some("error_recovered".to_string()),
                        ..Default::default()
                    },
                );
                self.conversation
                    .lock()
                    .await
                    .add_assistant_message(&fallback_response);
                let _ = events.send(StreamEvent::text(fallback_response)).await;
                Ok(())
            }
            LlmErrorAction::Rethrow => {
                let _ = self.tree.complete_llm_call(
                    node_id,
                    LlmCompletion {
                        finish_reason: Some("error".to_string()),
                        ..Default::default()
                    },
                );
                Err(error.into())
            }
        }
    }

    fn cost_for(&self, completion: &StreamCompletion) -> f64 {
        let Some(usage) = &completion.usage else {
            return 0.0;
        };
        let Ok(model_ref) = self.config.model.parse::<ModelRef>() else {
            return 0.0;
        };
        match self.dispatcher.spec_for(&model_ref) {
            Some(spec) => compute_cost(usage, &spec.pricing),
            None => 0.0,
        }
    }

    /// Image handles on a result become inline base64 parts so the model
    /// can see them next turn.
    fn media_parts_for(&self, result: &GadgetResult) -> Option<Vec<ContentPart>> {
        let parts: Vec<ContentPart> = result
            .media
            .iter()
            .filter(|h| h.mime_type.starts_with("image/"))
            .filter_map(|h| {
                self.media_store
                    .data_base64(&h.id)
                    .ok()
                    .map(|data| ContentPart::image_base64(data, &h.mime_type))
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts)
        }
    }
}

pub struct AgentBuilder {
    dispatcher: Arc<ProviderDispatcher>,
    config: AgentConfig,
    system_prompt: Option<String>,
    registry: Arc<GadgetRegistry>,
    hooks: Hooks,
    compactor: Option<Arc<dyn Compactor>>,
    human_input: Option<Arc<dyn HumanInputHandler>>,
    shared_tree: Option<(Arc<ExecutionTree>, Option<NodeId>, u32)>,
    seed_history: Vec<Message>,
    media_dir: Option<PathBuf>,
}

impl AgentBuilder {
    pub fn new(dispatcher: Arc<ProviderDispatcher>) -> Self {
        Self {
            dispatcher,
            config: AgentConfig::default(),
            system_prompt: None,
            registry: Arc::new(GadgetRegistry::new()),
            hooks: Hooks::new(),
            compactor: None,
            human_input: None,
            shared_tree: None,
            seed_history: Vec::new(),
            media_dir: None,
        }
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn registry(mut self, registry: Arc<GadgetRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn human_input(mut self, handler: Arc<dyn HumanInputHandler>) -> Self {
        self.human_input = Some(handler);
        self
    }

    /// Attach to a parent's tree: the subagent writes under `parent_node_id`
    /// at `depth_base`, and the parent observes every nested call live.
    pub fn shared_tree(
        mut self,
        tree: Arc<ExecutionTree>,
        parent_node_id: Option<NodeId>,
        depth_base: u32,
    ) -> Self {
        self.shared_tree = Some((tree, parent_node_id, depth_base));
        self
    }

    pub fn seed_history(mut self, messages: Vec<Message>) -> Self {
        self.seed_history = messages;
        self
    }

    /// Back the media store with a directory (removed by `Agent::cleanup`).
    pub fn media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.media_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Agent {
        let output_store = Arc::new(OutputStore::new());
        let media_store = Arc::new(match self.media_dir {
            Some(dir) => MediaStore::with_backing_dir(dir),
            None => MediaStore::in_memory(),
        });

        // The spillover viewer is implicit whenever any gadget can spill.
        self.registry
            .register(OutputViewerGadget::new(output_store.clone()));

        let hooks = Arc::new(self.hooks);
        let executor = Arc::new(GadgetExecutor::new(
            self.registry.clone(),
            hooks.clone(),
            output_store.clone(),
            media_store.clone(),
            self.human_input.clone(),
            self.config.executor.clone(),
        ));

        let mut conversation = Conversation::new(self.config.markers.clone());
        if let Some(prompt) = self.system_prompt {
            conversation.add_system(prompt);
        }
        conversation.add_gadget_catalog(&self.registry);
        conversation.seed_history(self.seed_history);

        let (tree, parent_node_id, depth_base) = self
            .shared_tree
            .unwrap_or_else(|| (Arc::new(ExecutionTree::new()), None, 0));

        Agent {
            dispatcher: self.dispatcher,
            registry: self.registry,
            hooks,
            executor,
            conversation: Mutex::new(conversation),
            tree,
            output_store,
            media_store,
            compactor: self.compactor,
            human_input: self.human_input,
            config: self.config,
            parent_node_id,
            depth_base,
        }
    }
}
