//! Conversation: an ordered timeline of message nodes
//!
//! Every operation returns a new `Conversation` value; callers replace their
//! copy with the result.

mod node;

#[cfg(test)]
mod proptests;

pub use node::MessageNode;

use crate::message::{Message, Part};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Truncation index meaning "nothing hidden"
pub const NO_TRUNCATION: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub assistant_id: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message_nodes: Vec<MessageNode>,
    /// Nodes before this index are hidden from the model (-1 = none)
    #[serde(default = "default_truncate_index")]
    pub truncate_index: i64,
    #[serde(default)]
    pub chat_suggestions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_truncate_index() -> i64 {
    NO_TRUNCATION
}

impl Conversation {
    /// Empty conversation with the given id
    pub fn of_id(id: Uuid, assistant_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            assistant_id,
            title: String::new(),
            message_nodes: Vec::new(),
            truncate_index: NO_TRUNCATION,
            chat_suggestions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Active variant of every node, in timeline order
    pub fn current_messages(&self) -> Vec<Message> {
        self.message_nodes
            .iter()
            .map(|n| n.current_message().clone())
            .collect()
    }

    pub fn node_index_of(&self, message_id: Uuid) -> Option<usize> {
        self.message_nodes.iter().position(|n| n.contains(message_id))
    }

    pub fn find_message(&self, message_id: Uuid) -> Option<&Message> {
        self.message_nodes
            .iter()
            .flat_map(MessageNode::messages)
            .find(|m| m.id == message_id)
    }

    /// External resources referenced by any variant of any node
    pub fn files(&self) -> HashSet<String> {
        self.message_nodes
            .iter()
            .flat_map(MessageNode::messages)
            .flat_map(Message::files)
            .map(str::to_string)
            .collect()
    }

    /// Merge an emitted message snapshot into the timeline.
    ///
    /// Position `i` of `messages` corresponds to node `i`. A message whose id
    /// matches a variant of that node replaces it in place; a new id on an
    /// existing node becomes its selected variant; positions past the end
    /// append new nodes. Merging the same snapshot twice is a no-op.
    #[must_use]
    pub fn update_current_messages(&self, messages: &[Message]) -> Self {
        let mut nodes = self.message_nodes.clone();
        for (index, message) in messages.iter().enumerate() {
            match nodes.get_mut(index) {
                Some(node) => {
                    if !node.replace_variant(message) {
                        node.append_variant(message.clone());
                    }
                }
                None => nodes.push(MessageNode::new(message.clone())),
            }
        }
        Self {
            message_nodes: nodes,
            ..self.clone()
        }
    }

    /// Drop dangling tool calls before a request goes upstream.
    ///
    /// A node whose active variant calls tools must be followed by a node
    /// answering every call. Otherwise that variant is dropped; emptied nodes
    /// are removed. Dropping can expose another dangling variant, so the pass
    /// repeats until nothing changes.
    #[must_use]
    pub fn check_invalid_messages(&self) -> Self {
        let mut nodes = self.message_nodes.clone();
        loop {
            let (repaired, changed) = repair_once(&nodes);
            nodes = repaired;
            if !changed {
                break;
            }
        }
        Self {
            message_nodes: nodes,
            ..self.clone()
        }
    }

    /// Append a new user (or preset) message as its own node
    #[must_use]
    pub fn append_message(&self, message: Message) -> Self {
        let mut next = self.clone();
        next.message_nodes.push(MessageNode::new(message));
        next
    }

    /// Add an edited variant to the node holding `message_id`
    pub fn edit_message(&self, message_id: Uuid, parts: Vec<Part>) -> Option<Self> {
        let index = self.node_index_of(message_id)?;
        let mut next = self.clone();
        let node = &mut next.message_nodes[index];
        node.append_variant(Message::new(node.role(), parts));
        Some(next)
    }

    /// Remove one variant; the node disappears with its last variant
    pub fn delete_message(&self, message_id: Uuid) -> Option<Self> {
        let index = self.node_index_of(message_id)?;
        let mut next = self.clone();
        let node = next.message_nodes.remove(index);
        if let Some(node) = node.remove_variant(message_id) {
            next.message_nodes.insert(index, node);
        }
        Some(next)
    }

    /// Keep nodes up to and including the one holding `message_id`
    pub fn prefix_through(&self, message_id: Uuid) -> Option<Self> {
        let index = self.node_index_of(message_id)?;
        let mut next = self.clone();
        next.message_nodes.truncate(index + 1);
        Some(next)
    }

    /// Toggle the context cut point at `index`.
    ///
    /// Setting the index that is already active clears it. Title and
    /// suggestions are reset either way.
    #[must_use]
    pub fn truncate_at(&self, index: i64) -> Self {
        Self {
            truncate_index: if self.truncate_index == index {
                NO_TRUNCATION
            } else {
                index
            },
            title: String::new(),
            chat_suggestions: Vec::new(),
            ..self.clone()
        }
    }

    /// "Clear context" at the tail: hide all current history from the model
    #[must_use]
    pub fn clear_context(&self) -> Self {
        self.truncate_at(i64::try_from(self.message_nodes.len()).unwrap_or(i64::MAX))
    }

    /// New conversation holding a copy of the nodes through `message_id`
    pub fn fork_at(&self, message_id: Uuid, assistant_id: Uuid) -> Option<Self> {
        let index = self.node_index_of(message_id)?;
        let mut forked = Self::of_id(Uuid::new_v4(), assistant_id);
        forked.message_nodes = self.message_nodes[..=index]
            .iter()
            .map(MessageNode::duplicate)
            .collect();
        Some(forked)
    }

    /// Move the cursor of a node
    #[must_use]
    pub fn select_variant(&self, node_id: Uuid, index: usize) -> Self {
        let mut next = self.clone();
        if let Some(node) = next.message_nodes.iter_mut().find(|n| n.id() == node_id) {
            node.select(index);
        }
        next
    }

    /// Close every open reasoning part
    #[must_use]
    pub fn finish_reasoning(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        for node in &mut next.message_nodes {
            node.map_messages(|m| m.finish_reasoning(now));
        }
        next
    }

    pub fn has_open_reasoning(&self) -> bool {
        self.message_nodes
            .iter()
            .flat_map(MessageNode::messages)
            .any(Message::has_open_reasoning)
    }

    #[must_use]
    pub fn set_translation(&self, message_id: Uuid, translation: Option<String>) -> Self {
        let mut next = self.clone();
        for node in &mut next.message_nodes {
            if node.contains(message_id) {
                node.map_messages(|m| {
                    if m.id == message_id {
                        Message {
                            translation: translation.clone(),
                            ..m
                        }
                    } else {
                        m
                    }
                });
            }
        }
        next
    }

    /// Rewrite file references listed in `moves`
    #[must_use]
    pub fn relocate_files(&self, moves: &HashMap<String, String>) -> Self {
        let mut next = self.clone();
        for node in &mut next.message_nodes {
            node.map_messages(|m| Message {
                parts: m.parts.into_iter().map(|p| p.relocated(moves)).collect(),
                ..m
            });
        }
        next
    }

    /// Restore node invariants on a value loaded from storage
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            message_nodes: self
                .message_nodes
                .into_iter()
                .filter_map(MessageNode::normalized)
                .collect(),
            ..self
        }
    }
}

fn repair_once(nodes: &[MessageNode]) -> (Vec<MessageNode>, bool) {
    let mut changed = false;
    let repaired = nodes
        .iter()
        .enumerate()
        .filter_map(|(index, node)| {
            let current = node.current_message();
            if !current.has_tool_call() {
                return Some(node.clone());
            }
            let answered = nodes.get(index + 1).is_some_and(|next| {
                let next = next.current_message();
                current
                    .tool_calls()
                    .iter()
                    .all(|(id, _, _)| next.has_result_for(id))
            });
            if answered {
                Some(node.clone())
            } else {
                changed = true;
                node.clone().drop_current()
            }
        })
        .collect();
    (repaired, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use serde_json::json;

    fn conversation(messages: Vec<Message>) -> Conversation {
        Conversation::of_id(Uuid::new_v4(), Uuid::new_v4()).update_current_messages(&messages)
    }

    fn tool_call(id: &str) -> Message {
        Message::new(Role::Assistant, vec![Part::tool_call(id, "search_web", "{}")])
    }

    fn tool_result(id: &str) -> Message {
        Message::new(
            Role::Tool,
            vec![Part::tool_result(id, "search_web", json!({"items": []}))],
        )
    }

    #[test]
    fn test_merge_appends_new_ids_and_replaces_known() {
        let user = Message::user("hi");
        let conv = conversation(vec![user.clone()]);

        let partial = Message::assistant("hel");
        let conv = conv.update_current_messages(&[user.clone(), partial.clone()]);
        assert_eq!(conv.message_nodes.len(), 2);

        let full = partial.with_parts(vec![Part::text("hello")]);
        let conv = conv.update_current_messages(&[user.clone(), full.clone()]);
        assert_eq!(conv.message_nodes.len(), 2);
        assert_eq!(conv.message_nodes[1].messages().len(), 1);
        assert_eq!(conv.current_messages()[1].to_text(), "hello");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let snapshot = vec![Message::user("hi"), Message::assistant("hello")];
        let once = conversation(vec![]).update_current_messages(&snapshot);
        let twice = once.update_current_messages(&snapshot);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_new_id_on_existing_node_becomes_variant() {
        let user = Message::user("hi");
        let conv = conversation(vec![user.clone(), Message::assistant("hello")]);
        let conv = conv.update_current_messages(&[user, Message::assistant("hi there")]);
        let node = &conv.message_nodes[1];
        assert_eq!(node.messages().len(), 2);
        assert_eq!(node.select_index(), 1);
        assert_eq!(node.current_message().to_text(), "hi there");
    }

    #[test]
    fn test_repair_removes_trailing_dangling_call() {
        let conv = conversation(vec![Message::user("search"), tool_call("c1")]);
        let repaired = conv.check_invalid_messages();
        assert_eq!(repaired.message_nodes.len(), 1);
        assert_eq!(repaired.message_nodes[0].role(), Role::User);
    }

    #[test]
    fn test_repair_keeps_answered_calls() {
        let conv = conversation(vec![
            Message::user("search"),
            tool_call("c1"),
            tool_result("c1"),
            Message::assistant("done"),
        ]);
        assert_eq!(conv.check_invalid_messages(), conv);
    }

    #[test]
    fn test_repair_requires_matching_result() {
        let conv = conversation(vec![Message::user("q"), tool_call("c1"), tool_result("other")]);
        let repaired = conv.check_invalid_messages();
        assert_eq!(repaired.message_nodes.len(), 2);
        assert!(!repaired.current_messages()[1].has_tool_call());
    }

    #[test]
    fn test_repair_falls_back_to_older_variant() {
        let user = Message::user("q");
        let answer = Message::assistant("plain answer");
        let conv = conversation(vec![user.clone(), answer]);
        // Regenerated variant that was interrupted mid tool call
        let conv = conv.update_current_messages(&[user, tool_call("c9")]);
        assert_eq!(conv.message_nodes[1].messages().len(), 2);

        let repaired = conv.check_invalid_messages();
        let node = &repaired.message_nodes[1];
        assert_eq!(node.messages().len(), 1);
        assert_eq!(node.select_index(), 0);
        assert_eq!(node.current_message().to_text(), "plain answer");
    }

    #[test]
    fn test_repair_reaches_fixpoint_through_stacked_variants() {
        let user = Message::user("q");
        let conv = conversation(vec![user.clone(), tool_call("a")]);
        let conv = conv.update_current_messages(&[user, tool_call("b")]);
        let once = conv.check_invalid_messages();
        assert_eq!(once.message_nodes.len(), 1);
        assert_eq!(once.check_invalid_messages(), once);
    }

    #[test]
    fn test_edit_adds_variant_with_node_role() {
        let user = Message::user("first");
        let conv = conversation(vec![user.clone(), Message::assistant("reply")]);
        let edited = conv.edit_message(user.id, vec![Part::text("second")]).unwrap();
        let node = &edited.message_nodes[0];
        assert_eq!(node.messages().len(), 2);
        assert_eq!(node.select_index(), 1);
        assert_eq!(node.current_message().role, Role::User);
        assert_eq!(node.current_message().to_text(), "second");
        assert!(conv.edit_message(Uuid::new_v4(), vec![]).is_none());
    }

    #[test]
    fn test_delete_single_variant_removes_node() {
        let reply = Message::assistant("reply");
        let conv = conversation(vec![Message::user("q"), reply.clone()]);
        let deleted = conv.delete_message(reply.id).unwrap();
        assert_eq!(deleted.message_nodes.len(), 1);
    }

    #[test]
    fn test_delete_variant_keeps_node() {
        let user = Message::user("q");
        let first = Message::assistant("one");
        let second = Message::assistant("two");
        let conv = conversation(vec![user.clone(), first.clone()])
            .update_current_messages(&[user, second.clone()]);
        let deleted = conv.delete_message(second.id).unwrap();
        let node = &deleted.message_nodes[1];
        assert_eq!(node.messages().len(), 1);
        assert_eq!(node.current_message().id, first.id);
    }

    #[test]
    fn test_truncate_toggle_at_tail() {
        let mut conv = conversation(vec![Message::user("q"), Message::assistant("a")]);
        conv.title = "Old title".to_string();
        conv.chat_suggestions = vec!["next?".to_string()];

        let cleared = conv.clear_context();
        assert_eq!(cleared.truncate_index, 2);
        assert!(cleared.title.is_empty());
        assert!(cleared.chat_suggestions.is_empty());

        let restored = cleared.clear_context();
        assert_eq!(restored.truncate_index, NO_TRUNCATION);
    }

    #[test]
    fn test_fork_copies_prefix_with_new_id() {
        let middle = Message::assistant("a");
        let conv = conversation(vec![
            Message::user("q"),
            middle.clone(),
            Message::user("q2"),
            Message::assistant("a2"),
        ]);
        let forked = conv.fork_at(middle.id, conv.assistant_id).unwrap();
        assert_ne!(forked.id, conv.id);
        assert_eq!(forked.current_messages(), conv.current_messages()[..2].to_vec());
    }

    #[test]
    fn test_files_cover_all_variants() {
        let user = Message::new(
            Role::User,
            vec![
                Part::image("/files/a.png"),
                Part::document("/files/b.txt", "b.txt", "text/plain"),
            ],
        );
        let conv = conversation(vec![user.clone()]);
        let conv = conv
            .edit_message(user.id, vec![Part::image("/files/c.png")])
            .unwrap();
        let files = conv.files();
        assert_eq!(files.len(), 3);
        assert!(files.contains("/files/b.txt"));
    }

    #[test]
    fn test_set_translation() {
        let reply = Message::assistant("bonjour");
        let conv = conversation(vec![Message::user("q"), reply.clone()]);
        let conv = conv.set_translation(reply.id, Some("hello".to_string()));
        assert_eq!(conv.find_message(reply.id).unwrap().translation.as_deref(), Some("hello"));
        let conv = conv.set_translation(reply.id, None);
        assert!(conv.find_message(reply.id).unwrap().translation.is_none());
    }

    #[test]
    fn test_finish_reasoning_closes_all_variants() {
        let now = Utc::now();
        let thinking = Message::new(Role::Assistant, vec![Part::reasoning("...", now)]);
        let conv = conversation(vec![Message::user("q"), thinking]);
        assert!(conv.has_open_reasoning());
        assert!(!conv.finish_reasoning(now).has_open_reasoning());
    }
}
