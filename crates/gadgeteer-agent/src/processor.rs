//! Stream processor: tokenizes the raw provider stream, dispatches text vs
//! gadget-call fragments through the hook layers, runs gadgets, records the
//! tree, and yields the uniform public event sequence.
//!
//! The processor is pull-based: it only advances to the next raw chunk once
//! the consumer has drained the events the previous chunk produced, so
//! nothing buffers beyond the parser's marker hold-back.

use crate::executor::GadgetExecutor;
use crate::hooks::{AfterGadgetAction, BeforeGadgetAction, ChunkContext, Hooks};
use futures::{Stream, StreamExt};
use gadgeteer_core::{
    ExecutionTree, GadgetCall, GadgetCompletion, GadgetResult, NodeId, StreamCompletion,
    StreamEvent,
};
use gadgeteer_gadgets::{GadgetContext, GadgetRegistry, Markers, ParserEvent, StreamParser};
use gadgeteer_llm::{LlmError, LlmStream};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ProcessorContext {
    pub iteration: u32,
    pub hooks: Arc<Hooks>,
    pub executor: Arc<GadgetExecutor>,
    pub registry: Arc<GadgetRegistry>,
    pub markers: Markers,
    pub tree: Arc<ExecutionTree>,
    pub llm_node_id: NodeId,
    pub cancel: CancellationToken,
    pub depth_base: u32,
}

struct PendingExec {
    call: GadgetCall,
    node_id: Option<NodeId>,
    handle: JoinHandle<GadgetResult>,
}

/// Process one raw LLM stream into public events. The sequence ends with
/// exactly one `StreamComplete`, except on abort (no further events) or on a
/// provider error (surfaced as the final `Err` item).
pub fn process_stream(
    raw: LlmStream,
    ctx: ProcessorContext,
) -> impl Stream<Item = Result<StreamEvent, LlmError>> + Send {
    async_stream::stream! {
        let ProcessorContext {
            iteration,
            hooks,
            executor,
            registry,
            markers,
            tree,
            llm_node_id,
            cancel,
            depth_base,
        } = ctx;

        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<(String, StreamEvent)>();
        let mut parser = StreamParser::new(markers);
        let chunk_ctx = ChunkContext { iteration };
        let mut completion = StreamCompletion::default();
        let mut final_text = String::new();
        let mut pending: VecDeque<PendingExec> = VecDeque::new();
        let mut raw = raw;
        let mut aborted = false;
        let mut done = false;

        while !done && !aborted {
            let mut batch: Vec<ParserEvent> = Vec::new();
            let mut thinking: Option<String> = None;
            let mut stream_error: Option<LlmError> = None;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    aborted = true;
                }
                item = raw.next() => match item {
                    Some(Ok(chunk)) => {
                        if let Some(usage) = chunk.usage {
                            completion.usage = Some(usage);
                        }
                        if let Some(reason) = chunk.finish_reason {
                            completion.finish_reason = Some(reason);
                        }
                        if let Some(t) = chunk.thinking {
                            if !t.content.is_empty() {
                                thinking = Some(t.content);
                            }
                        }
                        if let Some(text) = chunk.text {
                            if let Some(text) = hooks.run_raw_chunk(text, &chunk_ctx) {
                                hooks.observe_stream_chunk(&text, &chunk_ctx);
                                completion.raw_response.push_str(&text);
                                batch = parser.push(&text);
                            }
                        }
                    }
                    Some(Err(LlmError::Cancelled)) => {
                        aborted = true;
                    }
                    Some(Err(e)) => {
                        stream_error = Some(e);
                    }
                    None => {
                        done = true;
                        batch = parser.finish();
                    }
                }
            }

            if let Some(e) = stream_error {
                yield Err(e);
                return;
            }
            if aborted {
                break;
            }
            if let Some(content) = thinking {
                yield Ok(StreamEvent::Thinking { content });
            }

            for event in batch {
                match event {
                    ParserEvent::Text(t) => {
                        if let Some(t) = hooks.run_text_chunk(t, &chunk_ctx) {
                            if !t.is_empty() {
                                final_text.push_str(&t);
                                yield Ok(StreamEvent::Text { content: t });
                            }
                        }
                    }
                    ParserEvent::Call(mut call) => {
                        let params =
                            hooks.run_gadget_parameters(call.parameters.clone(), &call);
                        call.parameters = params;
                        yield Ok(StreamEvent::GadgetCall { call: call.clone() });

                        let node_id = tree
                            .add_gadget(
                                &llm_node_id,
                                &call.invocation_id,
                                &call.name,
                                call.parameters.clone(),
                            )
                            .ok();

                        match hooks.before_gadget_execution(&call).await {
                            BeforeGadgetAction::Skip { synthetic_result } => {
                                if let Some(nid) = &node_id {
                                    let _ = tree.mark_skipped(nid, "controller skip");
                                }
                                if synthetic_result.breaks_loop {
                                    completion.should_break_loop = true;
                                }
                                completion.outputs.push(synthetic_result.clone());
                                yield Ok(StreamEvent::GadgetSkipped {
                                    invocation_id: call.invocation_id.clone(),
                                    gadget_name: call.name.clone(),
                                    reason: "controller skip".to_string(),
                                    synthetic_result: Some(synthetic_result),
                                });
                            }
                            BeforeGadgetAction::Proceed => {
                                hooks.observe_gadget_start(&call);
                                let gadget_ctx = GadgetContext {
                                    invocation_id: call.invocation_id.clone(),
                                    cancel: cancel.clone(),
                                    tree: Some(tree.clone()),
                                    parent_node_id: node_id.clone(),
                                    depth_base,
                                    subagent_tx: Some(sub_tx.clone()),
                                };
                                let parallel = registry
                                    .get(&call.name)
                                    .map(|g| g.parallel_ok())
                                    .unwrap_or(false);

                                if parallel {
                                    let exec = executor.clone();
                                    let task_call = call.clone();
                                    let handle = tokio::spawn(async move {
                                        exec.execute(&task_call, &gadget_ctx).await
                                    });
                                    pending.push_back(PendingExec {
                                        call,
                                        node_id,
                                        handle,
                                    });
                                } else {
                                    // Earlier parallel calls settle first so
                                    // results stay in call order.
                                    while let Some(p) = pending.pop_front() {
                                        let result = join_result(p.handle, &p.call).await;
                                        let result = settle(
                                            &hooks,
                                            &tree,
                                            p.node_id.as_deref(),
                                            &p.call,
                                            result,
                                        )
                                        .await;
                                        if result.breaks_loop {
                                            completion.should_break_loop = true;
                                        }
                                        completion.outputs.push(result.clone());
                                        yield Ok(StreamEvent::GadgetResult { result });
                                    }
                                    let result = executor.execute(&call, &gadget_ctx).await;
                                    let result = settle(
                                        &hooks,
                                        &tree,
                                        node_id.as_deref(),
                                        &call,
                                        result,
                                    )
                                    .await;
                                    if result.breaks_loop {
                                        completion.should_break_loop = true;
                                    }
                                    completion.outputs.push(result.clone());
                                    yield Ok(StreamEvent::GadgetResult { result });
                                }
                            }
                        }
                    }
                }
            }

            while let Ok((source, event)) = sub_rx.try_recv() {
                yield Ok(StreamEvent::Subagent {
                    source,
                    event: Box::new(event),
                });
            }
        }

        if aborted {
            // Flush in-flight parser state as an unterminated-block error,
            // then stop without a stream_complete.
            for event in parser.finish() {
                if let ParserEvent::Call(call) = event {
                    yield Ok(StreamEvent::GadgetCall { call: call.clone() });
                    let error = match &call.parse_error {
                        Some(e) => format!("gadget call could not be parsed: {}", e),
                        None => "aborted".to_string(),
                    };
                    let result = GadgetResult::failure(
                        &call.invocation_id,
                        &call.name,
                        call.parameters.clone(),
                        error,
                    );
                    if let Ok(nid) = tree.add_gadget(
                        &llm_node_id,
                        &call.invocation_id,
                        &call.name,
                        call.parameters.clone(),
                    ) {
                        let _ = tree.complete_gadget(
                            &nid,
                            GadgetCompletion {
                                error: result.error.clone(),
                                ..Default::default()
                            },
                        );
                    }
                    yield Ok(StreamEvent::GadgetResult { result });
                }
            }
            for p in pending {
                p.handle.abort();
            }
            return;
        }

        while let Some(p) = pending.pop_front() {
            let result = join_result(p.handle, &p.call).await;
            let result = settle(&hooks, &tree, p.node_id.as_deref(), &p.call, result).await;
            if result.breaks_loop {
                completion.should_break_loop = true;
            }
            completion.outputs.push(result.clone());
            yield Ok(StreamEvent::GadgetResult { result });
        }

        while let Ok((source, event)) = sub_rx.try_recv() {
            yield Ok(StreamEvent::Subagent {
                source,
                event: Box::new(event),
            });
        }

        completion.did_execute_gadgets = !completion.outputs.is_empty();
        completion.final_message = hooks.run_assistant_message(final_text);
        yield Ok(StreamEvent::StreamComplete { completion });
    }
}

async fn join_result(handle: JoinHandle<GadgetResult>, call: &GadgetCall) -> GadgetResult {
    match handle.await {
        Ok(result) => result,
        Err(e) => GadgetResult::failure(
            &call.invocation_id,
            &call.name,
            call.parameters.clone(),
            format!("gadget task failed: {}", e),
        ),
    }
}

/// Post-execution chain: `after_gadget_execution` controller, completion
/// observers, tree record.
async fn settle(
    hooks: &Hooks,
    tree: &ExecutionTree,
    node_id: Option<&str>,
    call: &GadgetCall,
    result: GadgetResult,
) -> GadgetResult {
    let result = match hooks.after_gadget_execution(call, &result).await {
        AfterGadgetAction::Continue => result,
        AfterGadgetAction::Recover { fallback_result } => fallback_result,
    };
    hooks.observe_gadget_complete(&result);
    if let Some(nid) = node_id {
        let _ = tree.complete_gadget(
            nid,
            GadgetCompletion {
                result: result.result.clone(),
                error: result.error.clone(),
                execution_time_ms: Some(result.execution_time_ms),
                cost: None,
                media: result.media.clone(),
            },
        );
    }
    result
}
