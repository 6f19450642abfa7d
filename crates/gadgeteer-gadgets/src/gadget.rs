//! The Gadget trait — implement this to give the model a new capability

use crate::schema::ParamSchema;
use gadgeteer_core::{ExecutionTree, MediaPayload, NodeId, StreamEvent};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Channel a subagent gadget uses to surface its inner events; the stream
/// processor wraps each `(source, event)` pair as a public subagent event.
pub type SubagentSink = mpsc::UnboundedSender<(String, StreamEvent)>;

/// Execution context handed to every gadget invocation.
#[derive(Clone)]
pub struct GadgetContext {
    pub invocation_id: String,
    pub cancel: CancellationToken,
    /// Shared execution tree, present when the agent records one.
    pub tree: Option<Arc<ExecutionTree>>,
    /// Node the gadget runs under; subagents attach their LLM calls here.
    pub parent_node_id: Option<NodeId>,
    pub depth_base: u32,
    pub subagent_tx: Option<SubagentSink>,
}

impl GadgetContext {
    /// Bare context for direct gadget invocation outside an agent run.
    pub fn detached(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            cancel: CancellationToken::new(),
            tree: None,
            parent_node_id: None,
            depth_base: 0,
            subagent_tx: None,
        }
    }
}

/// What a gadget hands back. The executor translates every variant into a
/// plain `GadgetResult`; the side-channel variants never propagate further.
#[derive(Clone, Debug)]
pub enum GadgetOutcome {
    Text(String),
    Json(Value),
    Media(MediaPayload),
    /// Suspend the run until the host answers; the answer becomes the result.
    HumanInput { question: String },
    /// Task finished — sets `breaks_loop` on the result.
    Complete { message: Option<String> },
    Error(String),
}

impl GadgetOutcome {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }
}

/// A worked example rendered into the gadget catalog.
#[derive(Clone, Debug)]
pub struct GadgetExample {
    pub description: Option<String>,
    pub parameters: Value,
}

impl GadgetExample {
    pub fn new(parameters: Value) -> Self {
        Self {
            description: None,
            parameters,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named, schema-typed tool the model can invoke mid-stream.
#[async_trait::async_trait]
pub trait Gadget: Send + Sync {
    /// Unique gadget name; the model writes it into the start marker.
    fn name(&self) -> &str;

    /// Human-readable description rendered into the catalog.
    fn description(&self) -> &str;

    fn schema(&self) -> ParamSchema;

    fn examples(&self) -> Vec<GadgetExample> {
        Vec::new()
    }

    /// Per-gadget timeout; falls back to the executor default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// A successful result from this gadget terminates the agent loop.
    fn breaks_loop(&self) -> bool {
        false
    }

    /// Whether this gadget may overlap with later calls from the same
    /// response. Result ordering is preserved either way.
    fn parallel_ok(&self) -> bool {
        false
    }

    /// Execute with validated, default-applied parameters.
    async fn execute(&self, params: Value, ctx: &GadgetContext) -> GadgetOutcome;
}
