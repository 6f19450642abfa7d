//! gadgeteer — a provider-agnostic LLM agent runtime.
//!
//! The model streams text containing marker-framed gadget invocations; the
//! runtime parses them incrementally, executes the gadgets, feeds results
//! back into the conversation, and iterates until a terminal condition.
//!
//! ```no_run
//! use gadgeteer::{Agent, ProviderDispatcher, AnthropicAdapter, StreamEvent};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Arc::new(
//!     ProviderDispatcher::new().with(Arc::new(AnthropicAdapter::new("api-key"))),
//! );
//! let agent = Agent::builder(dispatcher)
//!     .model("anthropic:claude-sonnet-4-5")
//!     .system_prompt("Be brief.")
//!     .build();
//!
//! let (tx, mut rx) = mpsc::channel(64);
//! let run = agent.run("Hello", tx, CancellationToken::new());
//! tokio::pin!(run);
//! loop {
//!     tokio::select! {
//!         outcome = &mut run => { outcome?; break; }
//!         Some(event) = rx.recv() => {
//!             if let StreamEvent::Text { content } = event {
//!                 print!("{content}");
//!             }
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use gadgeteer_agent::{
    Agent, AgentBuilder, AgentConfig, AgentError, AgentResult, AfterGadgetAction, AfterLlmAction,
    BeforeGadgetAction, BeforeLlmAction, ChunkContext, Compactor, Controller, Conversation,
    ExecutorConfig, GadgetExecutor, Hooks, HumanInputHandler, Interceptor, LlmCallContext,
    LlmErrorAction, Observer, RunOutcome, SubagentFactory, SubagentGadget, Termination,
    TextOnlyHandler, TrimCompactor,
};
pub use gadgeteer_core::{
    CompactionEvent, ContentPart, ExecutionNode, ExecutionTree, GadgetCall, GadgetResult,
    MediaHandle, MediaPayload, MediaStore, Message, MessageContent, OutputStore, ParseError, Role,
    StreamCompletion, StreamEvent, TreeEvent, TreeEventKind, Usage,
};
pub use gadgeteer_gadgets::{
    Gadget, GadgetContext, GadgetExample, GadgetOutcome, GadgetRegistry, Markers, OutputViewerGadget,
    ParamField, ParamSchema, ParamType, StreamParser, ValidationError,
};
pub use gadgeteer_llm::{
    AnthropicAdapter, GenerationOptions, LlmError, LlmStream, ModelRef, ModelSpec, OpenAiAdapter,
    Pricing, ProviderAdapter, ProviderDispatcher, StreamChunk,
};
