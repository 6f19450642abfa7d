//! Agent runtime for gadgeteer: hook system, gadget executor, stream
//! processor, conversation manager, compaction, and the agent loop itself.

pub mod agent;
pub mod compaction;
pub mod conversation;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod processor;
pub mod subagent;

pub use agent::{Agent, AgentBuilder, AgentConfig, RunOutcome, Termination, TextOnlyHandler};
pub use compaction::{Compactor, TrimCompactor};
pub use conversation::Conversation;
pub use error::{AgentError, AgentResult};
pub use executor::{ExecutorConfig, GadgetExecutor, HumanInputHandler};
pub use hooks::{
    AfterGadgetAction, AfterLlmAction, BeforeGadgetAction, BeforeLlmAction, ChunkContext,
    Controller, Hooks, Interceptor, LlmCallContext, LlmErrorAction, Observer,
};
pub use processor::{process_stream, ProcessorContext};
pub use subagent::{SubagentFactory, SubagentGadget};
