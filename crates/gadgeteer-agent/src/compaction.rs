//! Context-window compaction contract and a threshold-based default

use crate::conversation::Conversation;
use gadgeteer_core::{CompactionEvent, Message};

/// Invoked by the agent loop at the top of every iteration. Returning an
/// event means the conversation was rewritten in place.
#[async_trait::async_trait]
pub trait Compactor: Send + Sync {
    async fn check_and_compact(
        &self,
        conversation: &mut Conversation,
        iteration: u32,
    ) -> Option<CompactionEvent>;
}

/// Replaces the oldest history prefix with a one-line summary once the
/// estimated token count crosses the threshold.
pub struct TrimCompactor {
    pub max_tokens: usize,
    pub keep_recent: usize,
}

impl TrimCompactor {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            keep_recent: 4,
        }
    }
}

#[async_trait::async_trait]
impl Compactor for TrimCompactor {
    async fn check_and_compact(
        &self,
        conversation: &mut Conversation,
        _iteration: u32,
    ) -> Option<CompactionEvent> {
        let tokens_before = conversation.estimated_tokens();
        if tokens_before <= self.max_tokens {
            return None;
        }
        let removable = conversation.history_len().saturating_sub(self.keep_recent);
        if removable == 0 {
            return None;
        }

        let summary = format!(
            "[Conversation compacted: {} earlier messages removed to fit the context window.]",
            removable
        );
        conversation.replace_prefix(removable, Message::user(summary.clone()));
        let tokens_after = conversation.estimated_tokens();
        tracing::info!(
            removed = removable,
            tokens_before,
            tokens_after,
            "compacted conversation"
        );
        Some(CompactionEvent {
            summary,
            removed_messages: removable,
            tokens_before,
            tokens_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gadgeteer_gadgets::Markers;

    #[tokio::test]
    async fn under_threshold_is_untouched() {
        let compactor = TrimCompactor::new(1_000_000);
        let mut convo = Conversation::new(Markers::default());
        convo.add_user_message("hello");
        assert!(compactor.check_and_compact(&mut convo, 0).await.is_none());
        assert_eq!(convo.history_len(), 1);
    }

    #[tokio::test]
    async fn over_threshold_replaces_prefix_with_summary() {
        let compactor = TrimCompactor::new(50);
        let mut convo = Conversation::new(Markers::default());
        for i in 0..10 {
            convo.add_user_message(format!("message number {} with padding text", i));
        }

        let event = compactor.check_and_compact(&mut convo, 3).await.unwrap();
        assert_eq!(event.removed_messages, 6);
        assert!(event.tokens_after < event.tokens_before);
        assert_eq!(convo.history_len(), 5);
        assert!(convo.history()[0].text().contains("compacted"));
    }
}
