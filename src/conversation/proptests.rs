//! Property-based tests for the conversation model
//!
//! These tests verify the node invariants hold across arbitrary edit,
//! delete, merge and repair sequences.

use super::*;
use crate::message::{Message, Part, Role};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

#[derive(Debug, Clone)]
enum MessageKind {
    UserText,
    AssistantText,
    ToolCall,
    ToolResult,
}

fn arb_message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::UserText),
        Just(MessageKind::AssistantText),
        Just(MessageKind::ToolCall),
        Just(MessageKind::ToolResult),
    ]
}

fn build_message(kind: &MessageKind, call_id: u8) -> Message {
    let call_id = format!("call_{call_id}");
    match kind {
        MessageKind::UserText => Message::user("question"),
        MessageKind::AssistantText => Message::assistant("answer"),
        MessageKind::ToolCall => Message::new(
            Role::Assistant,
            vec![Part::tool_call(call_id, "search_web", "{}")],
        ),
        MessageKind::ToolResult => Message::new(
            Role::Tool,
            vec![Part::tool_result(call_id, "search_web", json!("ok"))],
        ),
    }
}

#[derive(Debug, Clone)]
enum Op {
    Append(MessageKind, u8),
    Edit(usize),
    Delete(usize, usize),
    Regenerate(usize, MessageKind, u8),
    Select(usize, usize),
    Repair,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (arb_message_kind(), 0u8..3).prop_map(|(k, c)| Op::Append(k, c)),
        1 => any::<usize>().prop_map(Op::Edit),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(n, v)| Op::Delete(n, v)),
        2 => (any::<usize>(), arb_message_kind(), 0u8..3)
            .prop_map(|(n, k, c)| Op::Regenerate(n, k, c)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(n, i)| Op::Select(n, i)),
        1 => Just(Op::Repair),
    ]
}

fn apply(conv: &Conversation, op: &Op) -> Conversation {
    let len = conv.message_nodes.len();
    match op {
        Op::Append(kind, call) => conv.append_message(build_message(kind, *call)),
        Op::Edit(n) if len > 0 => {
            let id = conv.message_nodes[n % len].current_message().id;
            conv.edit_message(id, vec![Part::text("edited")])
                .unwrap_or_else(|| conv.clone())
        }
        Op::Delete(n, v) if len > 0 => {
            let node = &conv.message_nodes[n % len];
            let id = node.messages()[v % node.messages().len()].id;
            conv.delete_message(id).unwrap_or_else(|| conv.clone())
        }
        Op::Regenerate(n, kind, call) if len > 0 => {
            // Emit a history prefix plus one fresh message at position n
            let at = n % len;
            let mut snapshot = conv.current_messages();
            snapshot.truncate(at);
            snapshot.push(build_message(kind, *call));
            conv.update_current_messages(&snapshot)
        }
        Op::Select(n, i) if len > 0 => {
            let node_id = conv.message_nodes[n % len].id();
            conv.select_variant(node_id, *i)
        }
        Op::Repair => conv.check_invalid_messages(),
        _ => conv.clone(),
    }
}

fn arb_conversation() -> impl Strategy<Value = Conversation> {
    proptest::collection::vec(arb_op(), 0..24).prop_map(|ops| {
        let start = Conversation::of_id(uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        ops.iter().fold(start, |conv, op| apply(&conv, op))
    })
}

fn assert_node_invariants(conv: &Conversation) -> Result<(), TestCaseError> {
    for node in &conv.message_nodes {
        prop_assert!(!node.messages().is_empty());
        prop_assert!(node.select_index() < node.messages().len());
    }
    Ok(())
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_nodes_never_empty_or_out_of_range(conv in arb_conversation()) {
        assert_node_invariants(&conv)?;
    }

    #[test]
    fn prop_repair_is_idempotent(conv in arb_conversation()) {
        let once = conv.check_invalid_messages();
        let twice = once.check_invalid_messages();
        prop_assert_eq!(&once, &twice);
        assert_node_invariants(&once)?;
    }

    #[test]
    fn prop_repair_leaves_no_dangling_calls(conv in arb_conversation()) {
        let repaired = conv.check_invalid_messages();
        let current = repaired.current_messages();
        for (index, message) in current.iter().enumerate() {
            if message.has_tool_call() {
                let next = current.get(index + 1);
                prop_assert!(next.is_some());
                for (id, _, _) in message.tool_calls() {
                    prop_assert!(next.is_some_and(|n| n.has_result_for(id)));
                }
            }
        }
    }

    #[test]
    fn prop_merge_is_idempotent(
        conv in arb_conversation(),
        tail in proptest::collection::vec((arb_message_kind(), 0u8..3), 0..4),
    ) {
        let mut snapshot = conv.current_messages();
        snapshot.extend(tail.iter().map(|(k, c)| build_message(k, *c)));
        let once = conv.update_current_messages(&snapshot);
        let twice = once.update_current_messages(&snapshot);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.current_messages(), snapshot);
    }

    #[test]
    fn prop_truncate_twice_is_identity(conv in arb_conversation(), index in 0i64..30) {
        let toggled = conv.truncate_at(index).truncate_at(index);
        if conv.truncate_index == NO_TRUNCATION {
            prop_assert_eq!(toggled.truncate_index, NO_TRUNCATION);
        }
        let tail = i64::try_from(conv.message_nodes.len()).unwrap();
        if conv.truncate_index != tail {
            let cleared = conv.clear_context();
            prop_assert_eq!(cleared.truncate_index, tail);
            prop_assert_eq!(cleared.clear_context().truncate_index, NO_TRUNCATION);
        }
    }

    #[test]
    fn prop_fork_is_strict_prefix(conv in arb_conversation(), pick in any::<usize>()) {
        prop_assume!(!conv.message_nodes.is_empty());
        let index = pick % conv.message_nodes.len();
        let message_id = conv.message_nodes[index].current_message().id;
        let forked = conv.fork_at(message_id, conv.assistant_id).unwrap();
        prop_assert_ne!(forked.id, conv.id);
        prop_assert_eq!(forked.message_nodes.len(), index + 1);
        for (a, b) in forked.message_nodes.iter().zip(&conv.message_nodes) {
            prop_assert_eq!(a.messages(), b.messages());
            prop_assert_eq!(a.select_index(), b.select_index());
        }
    }
}
