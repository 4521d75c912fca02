// ABOUTME: Ordered per-task message history with cascade-safe removal and editing
// ABOUTME: Keeps tool-call/tool-result pairing valid and prunes emptied assistant/tool turns

use crate::error::{CoreError, Result};
use crate::message::{ContentPart, Message, MessageContent, Role};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Persistence callback invoked after every successful mutation
pub type AutosaveFn = Arc<dyn Fn(&[Message]) + Send + Sync>;

/// The ordered message history of one task
#[derive(Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    autosave: Option<AutosaveFn>,
}

impl fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStore")
            .field("messages", &self.messages.len())
            .field("autosave", &self.autosave.is_some())
            .finish()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store around an existing history (autosave disabled)
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            autosave: None,
        }
    }

    /// Invoke `callback` with the full history after each successful mutation
    pub fn enable_autosave(&mut self, callback: AutosaveFn) {
        self.autosave = Some(callback);
    }

    pub fn disable_autosave(&mut self) {
        self.autosave = None;
    }

    pub fn autosave_enabled(&self) -> bool {
        self.autosave.is_some()
    }

    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get_message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
        self.autosave();
    }

    /// Replace the whole history
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.autosave();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.autosave();
    }

    /// Remove a message, or a tool call, by id and cascade the removal.
    ///
    /// A message id removes that message plus the tool-result parts answering
    /// any tool calls it opened. A tool call id removes the matching call and
    /// result parts wherever they live. Assistant and tool messages left without
    /// parts are removed too. Returns the ids of every removed message.
    pub fn remove_message_by_id(&mut self, id: &str) -> Result<Vec<String>> {
        let removed = if let Some(index) = self.messages.iter().position(|m| m.id == id) {
            let target = self.messages.remove(index);
            let call_ids: HashSet<String> = target.tool_call_ids().into_iter().collect();

            let mut removed = vec![target.id];
            if !call_ids.is_empty() {
                removed.extend(self.strip_parts(index, |part| {
                    part.answered_tool_call()
                        .is_some_and(|call_id| call_ids.contains(call_id))
                }));
            }
            removed
        } else if self.messages.iter().any(|m| m.references_tool_call(id)) {
            self.strip_parts(0, |part| part.tool_call_id() == Some(id))
        } else {
            return Err(CoreError::MessageNotFound(id.to_string()));
        };

        tracing::debug!(id = %id, removed = ?removed, "Removed messages");
        self.autosave();
        Ok(removed)
    }

    /// Remove the most recent message, cascading like `remove_message_by_id`
    pub fn remove_last_message(&mut self) -> Option<Vec<String>> {
        let id = self.messages.last()?.id.clone();
        self.remove_message_by_id(&id).ok()
    }

    /// Drop the last user message and everything after it, returning its text
    pub fn pop_last_user_prompt(&mut self) -> Option<String> {
        let index = self.messages.iter().rposition(|m| m.role == Role::User)?;
        let prompt = self.messages[index].text();
        self.messages.truncate(index);
        self.autosave();
        Some(prompt)
    }

    /// Replace the text of a message.
    ///
    /// User messages get their text replaced. For assistant/tool messages all
    /// text parts collapse into one new text part at the position of the first;
    /// other parts stay untouched. Returns false if the edit left the message
    /// empty and it was removed.
    pub fn edit_message_text(&mut self, id: &str, text: &str) -> Result<bool> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| CoreError::MessageNotFound(id.to_string()))?;

        let message = &mut self.messages[index];
        match &mut message.content {
            MessageContent::Text(existing) => *existing = text.to_string(),
            MessageContent::Parts(parts) => {
                // Nothing before the first text part is removed, so the index stays valid
                let insert_at = parts
                    .iter()
                    .position(|p| matches!(p, ContentPart::Text { .. }))
                    .unwrap_or(parts.len());
                parts.retain(|p| !matches!(p, ContentPart::Text { .. }));
                if !text.is_empty() {
                    parts.insert(insert_at, ContentPart::text(text));
                }
            }
        }

        let retained = !message.is_degenerate();
        if !retained {
            self.messages.remove(index);
        }
        self.autosave();
        Ok(retained)
    }

    /// Clone of the history up to and including the given message
    pub fn messages_through(&self, id: &str) -> Result<Vec<Message>> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| CoreError::MessageNotFound(id.to_string()))?;
        Ok(self.messages[..=index].to_vec())
    }

    /// Remove matching parts from messages starting at `from`, then drop every
    /// message that lost parts and ended up empty. Returns the dropped ids.
    fn strip_parts<F>(&mut self, from: usize, matches: F) -> Vec<String>
    where
        F: Fn(&ContentPart) -> bool,
    {
        let mut emptied = Vec::new();
        for message in self.messages.iter_mut().skip(from) {
            let changed = match &mut message.content {
                MessageContent::Parts(parts) => {
                    let before = parts.len();
                    parts.retain(|p| !matches(p));
                    parts.len() != before
                }
                MessageContent::Text(_) => false,
            };
            if changed && message.is_degenerate() {
                emptied.push(message.id.clone());
            }
        }

        if !emptied.is_empty() {
            self.messages.retain(|m| !emptied.contains(&m.id));
        }
        emptied
    }

    fn autosave(&self) {
        if let Some(callback) = &self.autosave {
            callback(&self.messages);
        }
    }
}
