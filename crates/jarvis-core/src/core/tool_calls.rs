//! Merges streamed tool-call fragments into complete call records.

use std::collections::BTreeMap;

use crate::providers::{CallFragment, ToolCallRecord};

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    /// True while `id` is the `call_{index}` placeholder.
    synthetic_id: bool,
    name: String,
    arguments: String,
}

/// Accumulates tool-call fragments of one streamed reply, keyed by index.
///
/// Argument text is only concatenated here; it is decoded when the call
/// runs, so a malformed fragment never aborts accumulation.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PendingCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: CallFragment) {
        let entry = self
            .calls
            .entry(fragment.index)
            .or_insert_with(|| PendingCall {
                id: format!("call_{}", fragment.index),
                synthetic_id: true,
                ..PendingCall::default()
            });

        if let Some(id) = fragment.id.filter(|id| !id.is_empty())
            && entry.synthetic_id
        {
            entry.id = id;
            entry.synthetic_id = false;
        }
        if let Some(name) = fragment.name.filter(|n| !n.is_empty())
            && entry.name.is_empty()
        {
            entry.name = name;
        }
        entry.arguments.push_str(&fragment.arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Returns calls with a non-empty name, ordered by index.
    pub fn finalize(self) -> Vec<ToolCallRecord> {
        self.calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCallRecord {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> CallFragment {
        CallFragment {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: args.to_string(),
        }
    }

    #[test]
    fn test_arguments_concatenate_in_arrival_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(fragment(0, Some("call_a"), Some("file_read"), ""));
        acc.push(fragment(1, Some("call_b"), Some("shell_exec"), "{\"comm"));
        acc.push(fragment(0, None, None, "{\"path\""));
        acc.push(fragment(1, None, None, "and\":\"ls\"}"));
        acc.push(fragment(0, None, None, ":\"a.txt\"}"));

        let calls = acc.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, r#"{"path":"a.txt"}"#);
        assert_eq!(calls[1].name, "shell_exec");
        assert_eq!(calls[1].arguments, r#"{"command":"ls"}"#);
    }

    #[test]
    fn test_arbitrary_fragment_boundaries_reassemble() {
        let full = r#"{"url":"https://example.com","method":"GET"}"#;
        for split in 0..=full.len() {
            let mut acc = ToolCallAccumulator::new();
            acc.push(fragment(0, Some("id"), Some("http_request"), &full[..split]));
            acc.push(fragment(0, None, None, &full[split..]));
            assert_eq!(acc.finalize()[0].arguments, full);
        }
    }

    #[test]
    fn test_nameless_entries_are_discarded() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(fragment(0, Some("call_x"), None, "{}"));
        acc.push(fragment(1, None, Some("file_read"), "{}"));

        let calls = acc.finalize();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "file_read");
    }

    #[test]
    fn test_synthetic_id_replaced_by_later_real_id() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(fragment(2, None, Some("file_write"), "{"));
        acc.push(fragment(2, Some("call_real"), None, "}"));
        acc.push(fragment(3, None, Some("file_read"), "{}"));

        let calls = acc.finalize();
        assert_eq!(calls[0].id, "call_real");
        assert_eq!(calls[1].id, "call_3");
    }

    #[test]
    fn test_records_ordered_by_index_not_arrival() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(fragment(1, Some("b"), Some("second"), ""));
        acc.push(fragment(0, Some("a"), Some("first"), ""));

        let names: Vec<_> = acc.finalize().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
