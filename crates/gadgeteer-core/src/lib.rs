//! Core types for the gadgeteer agent runtime.
//!
//! Everything here is provider-agnostic and I/O-free: messages, gadget
//! call/result records, the public stream-event vocabulary, the execution
//! tree, and the per-agent spillover/media stores.

pub mod error;
pub mod event;
pub mod message;
pub mod store;
pub mod tree;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use event::{CompactionEvent, StreamCompletion, StreamEvent};
pub use message::{ContentPart, ImageSource, Message, MessageContent, Role};
pub use store::{MediaStore, OutputStore, StoredOutput};
pub use tree::{
    ExecutionNode, ExecutionTree, GadgetCompletion, GadgetNode, LlmCallNode, LlmCompletion,
    NodeId, SubscriptionId, TreeEvent, TreeEventKind,
};
pub use types::{GadgetCall, GadgetResult, MediaHandle, MediaPayload, ParseError, Usage};
