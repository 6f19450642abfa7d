//! Agent-level errors. Only LLM failures and internal invariant breaks ever
//! leave `Agent::run`; everything gadget-related is modeled as data.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("llm error: {0}")]
    Llm(#[from] gadgeteer_llm::LlmError),

    #[error("{0}")]
    Core(#[from] gadgeteer_core::CoreError),
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
