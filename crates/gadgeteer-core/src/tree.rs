//! Execution tree: a hierarchical record of every LLM call, gadget run, and
//! subagent activation in one agent session, with an event bus for consumers.
//!
//! The tree is shared between a parent agent and its subagents (same
//! instance); all mutations funnel through one lock, and listeners fire
//! synchronously with the mutation that produced the event.

use crate::error::{CoreError, CoreResult};
use crate::types::{MediaHandle, Usage};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type NodeId = String;

fn new_node_id() -> NodeId {
    uuid::Uuid::new_v4().to_string()
}

/// An LLM request/response pair recorded in the tree.
#[derive(Clone, Debug)]
pub struct LlmCallNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub depth: u32,
    pub iteration: u32,
    pub model: String,
    pub request: String,
    pub response: Option<String>,
    pub usage: Option<Usage>,
    pub cost: Option<f64>,
    pub finish_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One gadget execution recorded in the tree.
#[derive(Clone, Debug)]
pub struct GadgetNode {
    pub id: NodeId,
    pub parent_id: NodeId,
    pub depth: u32,
    pub invocation_id: String,
    pub gadget_name: String,
    pub parameters: Value,
    pub result: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub cost: Option<f64>,
    pub media: Vec<MediaHandle>,
    pub skipped: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub enum ExecutionNode {
    LlmCall(LlmCallNode),
    Gadget(GadgetNode),
}

impl ExecutionNode {
    pub fn id(&self) -> &NodeId {
        match self {
            Self::LlmCall(n) => &n.id,
            Self::Gadget(n) => &n.id,
        }
    }

    pub fn parent_id(&self) -> Option<&NodeId> {
        match self {
            Self::LlmCall(n) => n.parent_id.as_ref(),
            Self::Gadget(n) => Some(&n.parent_id),
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            Self::LlmCall(n) => n.depth,
            Self::Gadget(n) => n.depth,
        }
    }

    pub fn cost(&self) -> Option<f64> {
        match self {
            Self::LlmCall(n) => n.cost,
            Self::Gadget(n) => n.cost,
        }
    }

    pub fn usage(&self) -> Option<&Usage> {
        match self {
            Self::LlmCall(n) => n.usage.as_ref(),
            Self::Gadget(_) => None,
        }
    }

    pub fn media(&self) -> &[MediaHandle] {
        match self {
            Self::LlmCall(_) => &[],
            Self::Gadget(n) => &n.media,
        }
    }

    pub fn is_completed(&self) -> bool {
        match self {
            Self::LlmCall(n) => n.completed_at.is_some(),
            Self::Gadget(n) => n.completed_at.is_some() || n.skipped.is_some(),
        }
    }
}

/// Completion payload for an LLM-call node.
#[derive(Clone, Debug, Default)]
pub struct LlmCompletion {
    pub response: Option<String>,
    pub usage: Option<Usage>,
    pub cost: Option<f64>,
    pub finish_reason: Option<String>,
}

/// Completion payload for a gadget node.
#[derive(Clone, Debug, Default)]
pub struct GadgetCompletion {
    pub result: Option<String>,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub cost: Option<f64>,
    pub media: Vec<MediaHandle>,
}

#[derive(Clone, Debug)]
pub enum TreeEvent {
    NodeAdded(ExecutionNode),
    NodeCompleted(ExecutionNode),
    NodeSkipped { id: NodeId, reason: String },
}

impl TreeEvent {
    pub fn kind(&self) -> TreeEventKind {
        match self {
            Self::NodeAdded(_) => TreeEventKind::NodeAdded,
            Self::NodeCompleted(_) => TreeEventKind::NodeCompleted,
            Self::NodeSkipped { .. } => TreeEventKind::NodeSkipped,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::NodeAdded(n) | Self::NodeCompleted(n) => n.id(),
            Self::NodeSkipped { id, .. } => id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeEventKind {
    NodeAdded,
    NodeCompleted,
    NodeSkipped,
}

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&TreeEvent) + Send + Sync>;

struct TreeInner {
    nodes: HashMap<NodeId, ExecutionNode>,
    children: HashMap<NodeId, Vec<NodeId>>,
    roots: Vec<NodeId>,
    listeners: Vec<(SubscriptionId, Option<TreeEventKind>, Listener)>,
    next_subscription: SubscriptionId,
    feeds: Vec<mpsc::UnboundedSender<TreeEvent>>,
}

pub struct ExecutionTree {
    inner: Mutex<TreeInner>,
}

impl Default for ExecutionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TreeInner {
                nodes: HashMap::new(),
                children: HashMap::new(),
                roots: Vec::new(),
                listeners: Vec::new(),
                next_subscription: 0,
                feeds: Vec::new(),
            }),
        }
    }

    pub fn add_llm_call(
        &self,
        parent_id: Option<&str>,
        iteration: u32,
        model: impl Into<String>,
        request: impl Into<String>,
    ) -> CoreResult<NodeId> {
        let mut inner = self.inner.lock().unwrap();
        let depth = match parent_id {
            Some(p) => {
                let parent = inner
                    .nodes
                    .get(p)
                    .ok_or_else(|| CoreError::ParentNotFound(p.to_string()))?;
                parent.depth() + 1
            }
            None => 0,
        };
        let id = new_node_id();
        let node = ExecutionNode::LlmCall(LlmCallNode {
            id: id.clone(),
            parent_id: parent_id.map(String::from),
            depth,
            iteration,
            model: model.into(),
            request: request.into(),
            response: None,
            usage: None,
            cost: None,
            finish_reason: None,
            started_at: Utc::now(),
            completed_at: None,
        });
        Self::insert(&mut inner, id.clone(), node.clone(), parent_id);
        let listeners = Self::snapshot_listeners(&inner, TreeEventKind::NodeAdded);
        drop(inner);
        self.emit(listeners, TreeEvent::NodeAdded(node));
        Ok(id)
    }

    pub fn complete_llm_call(&self, id: &str, completion: LlmCompletion) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::NodeNotFound(id.to_string()))?;
        let ExecutionNode::LlmCall(call) = node else {
            return Err(CoreError::NodeNotFound(id.to_string()));
        };
        if call.completed_at.is_some() {
            return Err(CoreError::NodeAlreadyCompleted(id.to_string()));
        }
        call.response = completion.response;
        call.usage = completion.usage;
        call.cost = completion.cost;
        call.finish_reason = completion.finish_reason;
        call.completed_at = Some(Utc::now());
        let snapshot = node.clone();
        let listeners = Self::snapshot_listeners(&inner, TreeEventKind::NodeCompleted);
        drop(inner);
        self.emit(listeners, TreeEvent::NodeCompleted(snapshot));
        Ok(())
    }

    pub fn add_gadget(
        &self,
        parent_id: &str,
        invocation_id: impl Into<String>,
        gadget_name: impl Into<String>,
        parameters: Value,
    ) -> CoreResult<NodeId> {
        let mut inner = self.inner.lock().unwrap();
        let depth = inner
            .nodes
            .get(parent_id)
            .ok_or_else(|| CoreError::ParentNotFound(parent_id.to_string()))?
            .depth()
            + 1;
        let id = new_node_id();
        let node = ExecutionNode::Gadget(GadgetNode {
            id: id.clone(),
            parent_id: parent_id.to_string(),
            depth,
            invocation_id: invocation_id.into(),
            gadget_name: gadget_name.into(),
            parameters,
            result: None,
            error: None,
            execution_time_ms: None,
            cost: None,
            media: Vec::new(),
            skipped: None,
            started_at: Utc::now(),
            completed_at: None,
        });
        Self::insert(&mut inner, id.clone(), node.clone(), Some(parent_id));
        let listeners = Self::snapshot_listeners(&inner, TreeEventKind::NodeAdded);
        drop(inner);
        self.emit(listeners, TreeEvent::NodeAdded(node));
        Ok(id)
    }

    pub fn complete_gadget(&self, id: &str, completion: GadgetCompletion) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::NodeNotFound(id.to_string()))?;
        let ExecutionNode::Gadget(gadget) = node else {
            return Err(CoreError::NodeNotFound(id.to_string()));
        };
        if gadget.completed_at.is_some() {
            return Err(CoreError::NodeAlreadyCompleted(id.to_string()));
        }
        gadget.result = completion.result;
        gadget.error = completion.error;
        gadget.execution_time_ms = completion.execution_time_ms;
        gadget.cost = completion.cost;
        gadget.media = completion.media;
        gadget.completed_at = Some(Utc::now());
        let snapshot = node.clone();
        let listeners = Self::snapshot_listeners(&inner, TreeEventKind::NodeCompleted);
        drop(inner);
        self.emit(listeners, TreeEvent::NodeCompleted(snapshot));
        Ok(())
    }

    pub fn mark_skipped(&self, id: &str, reason: impl Into<String>) -> CoreResult<()> {
        let reason = reason.into();
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::NodeNotFound(id.to_string()))?;
        let ExecutionNode::Gadget(gadget) = node else {
            return Err(CoreError::NodeNotFound(id.to_string()));
        };
        if gadget.completed_at.is_some() || gadget.skipped.is_some() {
            return Err(CoreError::NodeAlreadyCompleted(id.to_string()));
        }
        gadget.skipped = Some(reason.clone());
        let listeners = Self::snapshot_listeners(&inner, TreeEventKind::NodeSkipped);
        drop(inner);
        self.emit(
            listeners,
            TreeEvent::NodeSkipped {
                id: id.to_string(),
                reason,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ExecutionNode> {
        self.inner.lock().unwrap().nodes.get(id).cloned()
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.inner.lock().unwrap().roots.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn children(&self, id: &str) -> Vec<NodeId> {
        self.inner
            .lock()
            .unwrap()
            .children
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscribe to one event kind. The handler runs synchronously with the
    /// mutation; a panicking handler is caught and logged.
    pub fn on(
        &self,
        kind: TreeEventKind,
        handler: impl Fn(&TreeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(Some(kind), Arc::new(handler))
    }

    pub fn on_all(&self, handler: impl Fn(&TreeEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(None, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .lock()
            .unwrap()
            .listeners
            .retain(|(sub, _, _)| *sub != id);
    }

    /// Async feed of tree events. Events emitted after this call are
    /// delivered in emission order.
    pub fn events(&self) -> UnboundedReceiverStream<TreeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().feeds.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Total cost of a node and all its descendants. Recomputed on demand,
    /// so roll-up is independent of completion order.
    pub fn subtree_cost(&self, id: &str) -> f64 {
        let inner = self.inner.lock().unwrap();
        Self::walk(&inner, id, 0.0, &mut |acc, node| acc + node.cost().unwrap_or(0.0))
    }

    pub fn subtree_usage(&self, id: &str) -> Usage {
        let inner = self.inner.lock().unwrap();
        Self::walk(&inner, id, Usage::default(), &mut |mut acc, node| {
            if let Some(u) = node.usage() {
                acc.add(u);
            }
            acc
        })
    }

    pub fn subtree_media(&self, id: &str) -> Vec<MediaHandle> {
        let inner = self.inner.lock().unwrap();
        Self::walk(&inner, id, Vec::new(), &mut |mut acc, node| {
            acc.extend_from_slice(node.media());
            acc
        })
    }

    fn insert(inner: &mut TreeInner, id: NodeId, node: ExecutionNode, parent: Option<&str>) {
        match parent {
            Some(p) => inner.children.entry(p.to_string()).or_default().push(id.clone()),
            None => inner.roots.push(id.clone()),
        }
        inner.nodes.insert(id, node);
    }

    fn snapshot_listeners(inner: &TreeInner, kind: TreeEventKind) -> Vec<Listener> {
        inner
            .listeners
            .iter()
            .filter(|(_, k, _)| k.is_none() || *k == Some(kind))
            .map(|(_, _, l)| l.clone())
            .collect()
    }

    fn emit(&self, listeners: Vec<Listener>, event: TreeEvent) {
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::warn!(node = %event.node_id(), "tree listener panicked");
            }
        }
        let mut inner = self.inner.lock().unwrap();
        inner.feeds.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn subscribe(&self, kind: Option<TreeEventKind>, listener: Listener) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.listeners.push((id, kind, listener));
        id
    }

    fn walk<T>(
        inner: &TreeInner,
        id: &str,
        init: T,
        fold: &mut impl FnMut(T, &ExecutionNode) -> T,
    ) -> T {
        let mut acc = init;
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = inner.nodes.get(&current) {
                acc = fold(acc, node);
            }
            if let Some(kids) = inner.children.get(&current) {
                stack.extend(kids.iter().cloned());
            }
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn depth_follows_parent() {
        let tree = ExecutionTree::new();
        let root = tree.add_llm_call(None, 0, "anthropic:claude", "req").unwrap();
        let gadget = tree.add_gadget(&root, "1", "echo", json!({})).unwrap();
        let nested = tree.add_llm_call(Some(&gadget), 0, "anthropic:claude", "req").unwrap();

        assert_eq!(tree.get(&root).unwrap().depth(), 0);
        assert_eq!(tree.get(&gadget).unwrap().depth(), 1);
        assert_eq!(tree.get(&nested).unwrap().depth(), 2);
        assert_eq!(tree.roots(), vec![root]);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let tree = ExecutionTree::new();
        assert!(tree.add_gadget("nope", "1", "echo", json!({})).is_err());
        assert!(tree.add_llm_call(Some("nope"), 0, "m", "r").is_err());
    }

    #[test]
    fn double_completion_is_rejected() {
        let tree = ExecutionTree::new();
        let id = tree.add_llm_call(None, 0, "m", "r").unwrap();
        tree.complete_llm_call(&id, LlmCompletion::default()).unwrap();
        assert!(tree
            .complete_llm_call(&id, LlmCompletion::default())
            .is_err());
    }

    #[test]
    fn completed_at_not_before_started_at() {
        let tree = ExecutionTree::new();
        let id = tree.add_llm_call(None, 0, "m", "r").unwrap();
        tree.complete_llm_call(&id, LlmCompletion::default()).unwrap();
        let ExecutionNode::LlmCall(node) = tree.get(&id).unwrap() else {
            panic!("expected llm node");
        };
        assert!(node.completed_at.unwrap() >= node.started_at);
    }

    #[test]
    fn subtree_cost_rolls_up() {
        let tree = ExecutionTree::new();
        let root = tree.add_llm_call(None, 0, "m", "r").unwrap();
        tree.complete_llm_call(
            &root,
            LlmCompletion {
                cost: Some(0.001),
                ..Default::default()
            },
        )
        .unwrap();
        let gadget = tree.add_gadget(&root, "1", "sub", json!({})).unwrap();
        let inner = tree.add_llm_call(Some(&gadget), 0, "m", "r").unwrap();
        tree.complete_llm_call(
            &inner,
            LlmCompletion {
                cost: Some(0.002),
                ..Default::default()
            },
        )
        .unwrap();

        assert!((tree.subtree_cost(&root) - 0.003).abs() < 1e-9);
        assert!((tree.subtree_cost(&gadget) - 0.002).abs() < 1e-9);
    }

    #[test]
    fn listeners_fire_in_registration_order_and_isolate_panics() {
        let tree = ExecutionTree::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        tree.on_all(move |_| o1.lock().unwrap().push(1));
        tree.on_all(|_| panic!("listener bug"));
        let o2 = order.clone();
        tree.on_all(move |_| o2.lock().unwrap().push(2));

        tree.add_llm_call(None, 0, "m", "r").unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn filtered_subscription_and_unsubscribe() {
        let tree = ExecutionTree::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let c = completed.clone();
        let sub = tree.on(TreeEventKind::NodeCompleted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let id = tree.add_llm_call(None, 0, "m", "r").unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        tree.complete_llm_call(&id, LlmCompletion::default()).unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        tree.unsubscribe(sub);
        let id2 = tree.add_llm_call(None, 1, "m", "r").unwrap();
        tree.complete_llm_call(&id2, LlmCompletion::default()).unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn event_feed_preserves_order() {
        use tokio_stream::StreamExt;

        let tree = ExecutionTree::new();
        let mut feed = tree.events();
        let id = tree.add_llm_call(None, 0, "m", "r").unwrap();
        tree.complete_llm_call(&id, LlmCompletion::default()).unwrap();
        drop(tree);

        let first = feed.next().await.unwrap();
        let second = feed.next().await.unwrap();
        assert_eq!(first.kind(), TreeEventKind::NodeAdded);
        assert_eq!(second.kind(), TreeEventKind::NodeCompleted);
        assert!(feed.next().await.is_none());
    }

    #[test]
    fn mark_skipped_records_reason() {
        let tree = ExecutionTree::new();
        let root = tree.add_llm_call(None, 0, "m", "r").unwrap();
        let gadget = tree.add_gadget(&root, "1", "echo", json!({})).unwrap();
        tree.mark_skipped(&gadget, "controller skip").unwrap();

        let ExecutionNode::Gadget(node) = tree.get(&gadget).unwrap() else {
            panic!("expected gadget node");
        };
        assert_eq!(node.skipped.as_deref(), Some("controller skip"));
        assert!(tree.mark_skipped(&gadget, "again").is_err());
    }
}
