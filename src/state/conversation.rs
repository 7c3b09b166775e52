use crate::types::{Message, Role, UsagePayload};
use serde_json::Value;
use std::collections::BTreeMap;

/// Conversation-scoped accumulators: the message transcript, server log
/// lines, running usage totals, and the last file tree the server pushed.
///
/// While a response streams, the open assistant message is the only mutable
/// accumulator and this struct's owner is its only writer; a finished
/// message is immutable until the whole log is cleared.
#[derive(Debug, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
    logs: Vec<String>,
    total_tokens: u64,
    total_cost: f64,
    file_tree: Option<Value>,
    stream_open: bool,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::User, content));
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.messages.push(Message::new(Role::System, content));
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// Open an empty assistant message for streaming.
    pub fn begin_assistant_turn(&mut self) {
        debug_assert!(!self.stream_open, "one open stream per message");
        self.messages.push(Message::new(Role::Assistant, ""));
        self.stream_open = true;
    }

    /// Append streamed text to the open assistant message. A no-op once the
    /// stream has been closed.
    pub fn append_assistant_delta(&mut self, text: &str) {
        if !self.stream_open {
            return;
        }
        if let Some(message) = self.messages.last_mut() {
            message.content.push_str(text);
        }
    }

    pub fn finish_assistant_turn(&mut self) {
        self.stream_open = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.stream_open
    }

    pub fn last_assistant_content(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }

    /// Totals are replaced, not summed: the server reports running totals.
    pub fn record_usage(&mut self, usage: &UsagePayload) {
        self.total_tokens = usage.total_tokens;
        self.total_cost = usage.total_cost;
    }

    pub fn update_file_tree(&mut self, tree: Value) {
        self.file_tree = Some(tree);
    }

    /// The only way messages are destroyed.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn usage(&self) -> (u64, f64) {
        (self.total_tokens, self.total_cost)
    }

    pub fn file_tree(&self) -> Option<&Value> {
        self.file_tree.as_ref()
    }
}

/// Flatten the server's nested file tree into `leaf name -> stored path`.
/// Directories are JSON objects; file leaves are strings.
pub fn flatten_file_tree(tree: &Value) -> BTreeMap<String, String> {
    let mut paths = BTreeMap::new();
    collect_paths(tree, &mut paths);
    paths
}

fn collect_paths(node: &Value, paths: &mut BTreeMap<String, String>) {
    let Some(entries) = node.as_object() else {
        return;
    };
    for (name, value) in entries {
        match value {
            Value::String(path) => {
                paths.insert(name.clone(), path.clone());
            }
            other => collect_paths(other, paths),
        }
    }
}
