//! Fallback token estimation for adapters without a tokenizer endpoint

use gadgeteer_core::{Message, MessageContent};

const CHARS_PER_TOKEN: f32 = 4.0;

/// Flat surcharge per non-text content part.
const MEDIA_TOKEN_SURCHARGE: usize = 768;

/// Per-message framing overhead.
const MESSAGE_OVERHEAD: usize = 10;

pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f32 / CHARS_PER_TOKEN).ceil() as usize
}

pub fn estimate_message(message: &Message) -> usize {
    let content = match &message.content {
        MessageContent::Text(s) => estimate_tokens(s),
        MessageContent::Parts(_) => {
            estimate_tokens(&message.text())
                + message.content.media_part_count() * MEDIA_TOKEN_SURCHARGE
        }
    };
    content + MESSAGE_OVERHEAD
}

pub fn estimate_messages(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gadgeteer_core::ContentPart;

    #[test]
    fn chars_per_token_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("hi"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn media_parts_add_surcharge() {
        let plain = Message::user("hello");
        let with_image = Message::user_parts(vec![
            ContentPart::text("hello"),
            ContentPart::image_base64("aGk=", "image/png"),
        ]);
        assert_eq!(
            estimate_message(&with_image),
            estimate_message(&plain) + MEDIA_TOKEN_SURCHARGE
        );
    }
}
