//! Cross-module tests for gadgeteer-core: tree aggregation, event feed,
//! and store interplay.

use gadgeteer_core::*;
use serde_json::json;
use tokio_stream::StreamExt;

#[test]
fn subtree_usage_and_media_aggregate() {
    let tree = ExecutionTree::new();
    let root = tree.add_llm_call(None, 0, "mock:m1", "request").unwrap();
    tree.complete_llm_call(
        &root,
        LlmCompletion {
            usage: Some(Usage {
                input_tokens: 100,
                output_tokens: 10,
                total_tokens: 110,
                ..Default::default()
            }),
            cost: Some(0.01),
            ..Default::default()
        },
    )
    .unwrap();

    let gadget = tree.add_gadget(&root, "1", "snap", json!({})).unwrap();
    tree.complete_gadget(
        &gadget,
        GadgetCompletion {
            result: Some("[media]".into()),
            media: vec![MediaHandle {
                id: "abc".into(),
                mime_type: "image/png".into(),
                size_bytes: 12,
                path: None,
            }],
            ..Default::default()
        },
    )
    .unwrap();

    let usage = tree.subtree_usage(&root);
    assert_eq!(usage.total_tokens, 110);
    let media = tree.subtree_media(&root);
    assert_eq!(media.len(), 1);
    assert_eq!(media[0].mime_type, "image/png");
}

#[tokio::test]
async fn tree_events_for_a_node_precede_its_children() {
    let tree = ExecutionTree::new();
    let mut feed = tree.events();

    let root = tree.add_llm_call(None, 0, "mock:m1", "r").unwrap();
    let gadget = tree.add_gadget(&root, "1", "echo", json!({})).unwrap();
    drop(tree);

    let first = feed.next().await.unwrap();
    let second = feed.next().await.unwrap();
    assert_eq!(first.node_id(), &root);
    assert_eq!(second.node_id(), &gadget);
}

#[test]
fn output_store_ids_are_distinct() {
    let store = OutputStore::new();
    let a = store.insert("g", "one");
    let b = store.insert("g", "two");
    assert_ne!(a, b);
    assert_eq!(store.len(), 2);
}

#[test]
fn message_content_serde_is_untagged() {
    let text = Message::user("plain");
    let json_text = serde_json::to_value(&text).unwrap();
    assert_eq!(json_text["content"], json!("plain"));

    let parts = Message::user_parts(vec![ContentPart::text("a")]);
    let json_parts = serde_json::to_value(&parts).unwrap();
    assert!(json_parts["content"].is_array());

    let back: Message = serde_json::from_value(json_parts).unwrap();
    assert_eq!(back.text(), "a");
}
