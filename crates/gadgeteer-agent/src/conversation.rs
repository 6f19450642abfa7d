//! Conversation manager: the base prompt block, optional seeded history,
//! and the live turn history, with gadget-result formatting.

use gadgeteer_core::{ContentPart, Message};
use gadgeteer_gadgets::{render_catalog, GadgetRegistry, Markers};

pub struct Conversation {
    base_system: Option<String>,
    catalog: Option<String>,
    history: Vec<Message>,
    markers: Markers,
}

impl Conversation {
    pub fn new(markers: Markers) -> Self {
        Self {
            base_system: None,
            catalog: None,
            history: Vec::new(),
            markers,
        }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Set or extend the base system prompt. The conversation carries at
    /// most one system block, emitted first.
    pub fn add_system(&mut self, text: impl Into<String>) {
        let text = text.into();
        match &mut self.base_system {
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(&text);
            }
            None => self.base_system = Some(text),
        }
    }

    /// Render the registry's catalog into the system block.
    pub fn add_gadget_catalog(&mut self, registry: &GadgetRegistry) {
        if registry.is_empty() {
            self.catalog = None;
        } else {
            self.catalog = Some(render_catalog(registry, &self.markers));
        }
    }

    /// Pre-seed history before the first live turn.
    pub fn seed_history(&mut self, messages: Vec<Message>) {
        self.history.extend(messages);
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.history.push(Message::user(text));
    }

    pub fn add_user_parts(&mut self, parts: Vec<ContentPart>) {
        self.history.push(Message::user_parts(parts));
    }

    pub fn add_assistant_message(&mut self, text: impl Into<String>) {
        self.history.push(Message::assistant(text));
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Append a gadget result as a user message whose body begins with the
    /// end marker carrying `name:invocation_id`, so the model's next turn
    /// can correlate it with its own call.
    pub fn add_gadget_result(
        &mut self,
        gadget_name: &str,
        invocation_id: &str,
        body: &str,
        media_parts: Option<Vec<ContentPart>>,
    ) {
        let text = format!(
            "{}\n{}",
            self.markers.end_header(gadget_name, invocation_id),
            body
        );
        match media_parts {
            Some(parts) if !parts.is_empty() => {
                let mut all = vec![ContentPart::text(text)];
                all.extend(parts);
                self.history.push(Message::user_parts(all));
            }
            _ => self.history.push(Message::user(text)),
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Replace the first `count` history messages with a summary message.
    /// Used by compaction.
    pub fn replace_prefix(&mut self, count: usize, summary: Message) {
        let count = count.min(self.history.len());
        self.history.drain(..count);
        self.history.insert(0, summary);
    }

    /// The full message list for one LLM call: one system block (base
    /// prompt + gadget catalog) followed by the history.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        let system = match (&self.base_system, &self.catalog) {
            (Some(base), Some(catalog)) => Some(format!("{}\n\n{}", base, catalog)),
            (Some(base), None) => Some(base.clone()),
            (None, Some(catalog)) => Some(catalog.clone()),
            (None, None) => None,
        };
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.extend(self.history.iter().cloned());
        messages
    }

    pub fn estimated_tokens(&self) -> usize {
        gadgeteer_llm::estimate::estimate_messages(&self.messages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gadgeteer_core::Role;

    #[test]
    fn single_system_block_precedes_history() {
        let mut convo = Conversation::new(Markers::default());
        convo.add_system("Be brief.");
        convo.add_system("Be kind.");
        convo.add_user_message("hi");

        let messages = convo.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].text(), "Be brief.\n\nBe kind.");
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn gadget_result_body_starts_with_end_marker() {
        let mut convo = Conversation::new(Markers::default());
        convo.add_gadget_result("Echo", "1", "E:hi", None);

        let messages = convo.messages();
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].text().starts_with("<<<GADGET_END>>>Echo:1\n"));
        assert!(messages[0].text().ends_with("E:hi"));
    }

    #[test]
    fn gadget_result_with_media_is_multimodal() {
        let mut convo = Conversation::new(Markers::default());
        convo.add_gadget_result(
            "Snap",
            "2",
            "[media image/png]",
            Some(vec![ContentPart::image_base64("aGk=", "image/png")]),
        );
        let messages = convo.messages();
        assert_eq!(messages[0].content.media_part_count(), 1);
        assert!(messages[0].text().starts_with("<<<GADGET_END>>>Snap:2"));
    }

    #[test]
    fn replace_prefix_compacts() {
        let mut convo = Conversation::new(Markers::default());
        for i in 0..6 {
            convo.add_user_message(format!("m{}", i));
        }
        convo.replace_prefix(4, Message::user("[summary]"));
        assert_eq!(convo.history_len(), 3);
        assert_eq!(convo.history()[0].text(), "[summary]");
        assert_eq!(convo.history()[1].text(), "m4");
    }

    #[test]
    fn seeded_history_comes_before_live_turns() {
        let mut convo = Conversation::new(Markers::default());
        convo.seed_history(vec![Message::user("old"), Message::assistant("reply")]);
        convo.add_user_message("new");
        let messages = convo.messages();
        assert_eq!(messages[0].text(), "old");
        assert_eq!(messages[2].text(), "new");
    }
}
