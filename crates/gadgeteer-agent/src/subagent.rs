//! Subagent gadget: runs an inner agent on the shared execution tree and
//! forwards its events to the parent's stream.

use crate::agent::{Agent, Termination};
use gadgeteer_core::{ExecutionTree, NodeId, StreamEvent};
use gadgeteer_gadgets::{
    Gadget, GadgetContext, GadgetExample, GadgetOutcome, ParamField, ParamSchema, ParamType,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Builds the inner agent for one invocation. Receives the shared tree, the
/// gadget's own tree node as parent, and the nesting depth, so every nested
/// LLM call lands under the parent's record.
pub type SubagentFactory =
    Arc<dyn Fn(Arc<ExecutionTree>, Option<NodeId>, u32) -> Agent + Send + Sync>;

pub struct SubagentGadget {
    name: String,
    description: String,
    factory: SubagentFactory,
    propagate_break: bool,
}

impl SubagentGadget {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        factory: SubagentFactory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            factory,
            propagate_break: false,
        }
    }

    /// Let a break-loop signal inside the subagent terminate the parent
    /// loop too. Off by default.
    pub fn propagate_break(mut self, propagate: bool) -> Self {
        self.propagate_break = propagate;
        self
    }
}

#[async_trait::async_trait]
impl Gadget for SubagentGadget {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new().field(
            ParamField::required("task", ParamType::String)
                .describe("the task for the subagent to carry out"),
        )
    }

    fn examples(&self) -> Vec<GadgetExample> {
        vec![GadgetExample::new(
            json!({"task": "summarize the findings so far"}),
        )]
    }

    async fn execute(&self, params: Value, ctx: &GadgetContext) -> GadgetOutcome {
        let Some(task) = params["task"].as_str() else {
            return GadgetOutcome::error("'task' must be a string");
        };

        let tree = ctx
            .tree
            .clone()
            .unwrap_or_else(|| Arc::new(ExecutionTree::new()));
        let agent = (self.factory)(tree, ctx.parent_node_id.clone(), ctx.depth_base + 1);

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(256);
        let forward_to = ctx.subagent_tx.clone();
        let source = self.name.clone();
        let collector = tokio::spawn(async move {
            let mut output = String::new();
            while let Some(event) = rx.recv().await {
                if let StreamEvent::Text { content } = &event {
                    output.push_str(content);
                }
                if let Some(sink) = &forward_to {
                    let _ = sink.send((source.clone(), event));
                }
            }
            output
        });

        let outcome = agent.run(task, tx, ctx.cancel.child_token()).await;
        let output = collector.await.unwrap_or_default();

        match outcome {
            Ok(run) => {
                if self.propagate_break && run.termination == Termination::BreaksLoop {
                    GadgetOutcome::Complete {
                        message: Some(output),
                    }
                } else {
                    GadgetOutcome::Text(output)
                }
            }
            Err(e) => {
                warn!(subagent = %self.name, "subagent failed: {}", e);
                GadgetOutcome::Error(e.to_string())
            }
        }
    }
}
