//! Message node: one timeline slot holding alternate variants

use crate::message::{Message, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A slot in the conversation timeline.
///
/// Variants are append-only (oldest first) with a cursor selecting the
/// active one. A node always holds at least one variant; operations that
/// would empty it return `None` so the caller drops the node instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNode {
    id: Uuid,
    messages: Vec<Message>,
    select_index: usize,
}

impl MessageNode {
    pub fn new(message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: vec![message],
            select_index: 0,
        }
    }

    /// Rebuild a node from stored parts, clamping the cursor.
    ///
    /// Returns `None` for an empty variant list.
    pub fn from_parts(id: Uuid, messages: Vec<Message>, select_index: usize) -> Option<Self> {
        if messages.is_empty() {
            return None;
        }
        let select_index = if select_index < messages.len() {
            select_index
        } else {
            0
        };
        Some(Self {
            id,
            messages,
            select_index,
        })
    }

    /// Restore the invariants on a node that came from storage
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        Self::from_parts(self.id, self.messages, self.select_index)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn select_index(&self) -> usize {
        self.select_index
    }

    pub fn current_message(&self) -> &Message {
        &self.messages[self.select_index]
    }

    /// Role of the first variant; variants of one node share a role
    pub fn role(&self) -> Role {
        self.messages[0].role
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Push a new variant and select it
    pub fn append_variant(&mut self, message: Message) {
        self.messages.push(message);
        self.select_index = self.messages.len() - 1;
    }

    /// Replace the variant with the same id in place. Returns false when no
    /// variant matches.
    pub fn replace_variant(&mut self, message: &Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                if slot != message {
                    *slot = message.clone();
                }
                true
            }
            None => false,
        }
    }

    /// Remove one variant. `None` means the node is now empty.
    #[must_use]
    pub fn remove_variant(mut self, message_id: Uuid) -> Option<Self> {
        self.messages.retain(|m| m.id != message_id);
        if self.messages.is_empty() {
            return None;
        }
        if self.select_index >= self.messages.len() {
            self.select_index = self.messages.len() - 1;
        }
        Some(self)
    }

    /// Drop the active variant, moving the cursor one step back.
    ///
    /// The cursor falls back to the first variant if that leaves it out of
    /// range. `None` means the node is now empty.
    #[must_use]
    pub fn drop_current(mut self) -> Option<Self> {
        self.messages.remove(self.select_index);
        if self.messages.is_empty() {
            return None;
        }
        self.select_index = self
            .select_index
            .checked_sub(1)
            .filter(|i| *i < self.messages.len())
            .unwrap_or(0);
        Some(self)
    }

    /// Move the cursor, clamped to `[0, len-1]`
    pub fn select(&mut self, index: usize) {
        self.select_index = index.min(self.messages.len() - 1);
    }

    pub fn select_prev(&mut self) {
        self.select(self.select_index.saturating_sub(1));
    }

    pub fn select_next(&mut self) {
        self.select(self.select_index + 1);
    }

    /// Apply `f` to every variant, keeping ids and cursor
    pub fn map_messages(&mut self, f: impl FnMut(Message) -> Message) {
        let messages = std::mem::take(&mut self.messages);
        self.messages = messages.into_iter().map(f).collect();
    }

    /// Copy of this node with a fresh id (used by forking)
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }
}

impl From<Message> for MessageNode {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}
