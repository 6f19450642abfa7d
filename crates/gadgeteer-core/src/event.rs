//! Public stream events emitted by the agent runtime

use crate::types::{GadgetCall, GadgetResult, Usage};
use serde::{Deserialize, Serialize};

/// Conversation compaction record: a contiguous prefix of the history was
/// replaced by a summary message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompactionEvent {
    pub summary: String,
    pub removed_messages: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Final payload of a processed LLM stream. Emitted exactly once, last.
#[derive(Clone, Debug, Default)]
pub struct StreamCompletion {
    /// Full raw assistant text as received, gadget blocks included.
    pub raw_response: String,
    /// Assistant text after interceptors, gadget blocks excluded.
    pub final_message: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub did_execute_gadgets: bool,
    /// Gadget results in call order, synthetic results included.
    pub outputs: Vec<GadgetResult>,
    /// Set when a gadget requested loop termination.
    pub should_break_loop: bool,
}

/// Events yielded to the consumer of an agent run. Unknown fields in
/// serialized form must be ignored by consumers.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Text {
        content: String,
    },
    Thinking {
        content: String,
    },
    GadgetCall {
        call: GadgetCall,
    },
    GadgetResult {
        result: GadgetResult,
    },
    GadgetSkipped {
        invocation_id: String,
        gadget_name: String,
        reason: String,
        synthetic_result: Option<GadgetResult>,
    },
    /// An event produced by a nested agent, wrapped and re-emitted in order.
    Subagent {
        source: String,
        event: Box<StreamEvent>,
    },
    Compaction {
        event: CompactionEvent,
    },
    StreamComplete {
        completion: StreamCompletion,
    },
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Text carried by this event, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamComplete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_text_only_for_text_events() {
        assert_eq!(StreamEvent::text("hi").as_text(), Some("hi"));
        assert!(StreamEvent::Thinking {
            content: "hm".into()
        }
        .as_text()
        .is_none());
    }

    #[test]
    fn stream_complete_is_terminal() {
        let ev = StreamEvent::StreamComplete {
            completion: StreamCompletion::default(),
        };
        assert!(ev.is_terminal());
        assert!(!StreamEvent::text("x").is_terminal());
    }
}
