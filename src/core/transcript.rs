//! Transcript assembly from inbound text-content events.
//!
//! Messages are keyed by contentId. A TEXT `contentStart` creates an empty
//! entry; each `textOutput` replaces the entry's full text (the protocol
//! delivers the message's current text, not deltas). Events referencing an
//! unknown contentId are ignored.

use std::collections::HashMap;

use crate::core::events::Role;

/// One assembled chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Speaker role, when the server supplied one
    pub role: Option<Role>,
    /// Full current text
    pub content: String,
}

/// Per-contentId message log, insertion ordered.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: HashMap<String, ChatMessage>,
    order: Vec<String>,
}

impl Transcript {
    /// Open an entry for a new TEXT content stream. Reopening an existing id
    /// keeps the entry and its position.
    pub fn on_content_start(&mut self, content_id: &str, role: Option<Role>) {
        if !self.messages.contains_key(content_id) {
            self.order.push(content_id.to_string());
            self.messages.insert(
                content_id.to_string(),
                ChatMessage {
                    role,
                    content: String::new(),
                },
            );
        }
    }

    /// Replace an entry's text and role. Last write wins. Returns false for
    /// unknown contentIds, which leave the transcript untouched.
    pub fn on_text_output(
        &mut self,
        content_id: &str,
        role: Option<Role>,
        content: &str,
    ) -> bool {
        match self.messages.get_mut(content_id) {
            Some(message) => {
                message.content.clear();
                message.content.push_str(content);
                if role.is_some() {
                    message.role = role;
                }
                true
            }
            None => false,
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.order.clear();
    }

    /// Messages in the order their streams were opened.
    pub fn snapshot(&self) -> Vec<(String, ChatMessage)> {
        self.order
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| (id.clone(), m.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_start_then_text_output_assembles_a_message() {
        let mut transcript = Transcript::default();
        transcript.on_content_start("c1", Some(Role::Assistant));
        assert!(transcript.on_text_output("c1", Some(Role::Assistant), "Hi there"));
        let snapshot = transcript.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "c1");
        assert_eq!(snapshot[0].1.content, "Hi there");
        assert_eq!(snapshot[0].1.role, Some(Role::Assistant));
    }

    #[test]
    fn unknown_content_id_is_a_no_op() {
        let mut transcript = Transcript::default();
        assert!(!transcript.on_text_output("ghost", None, "lost"));
        assert!(transcript.is_empty());
    }

    #[test]
    fn second_text_output_replaces_not_appends() {
        let mut transcript = Transcript::default();
        transcript.on_content_start("c1", Some(Role::Assistant));
        transcript.on_text_output("c1", None, "Hello");
        transcript.on_text_output("c1", None, "Hello, world");
        assert_eq!(transcript.snapshot()[0].1.content, "Hello, world");
    }

    #[test]
    fn snapshot_preserves_stream_open_order() {
        let mut transcript = Transcript::default();
        transcript.on_content_start("b", Some(Role::User));
        transcript.on_content_start("a", Some(Role::Assistant));
        let ids: Vec<_> = transcript.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut transcript = Transcript::default();
        transcript.on_content_start("c1", None);
        transcript.clear();
        assert!(transcript.is_empty());
        // The old id is gone entirely, not just hidden
        assert!(!transcript.on_text_output("c1", None, "late"));
    }
}
