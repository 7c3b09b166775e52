use serde::Deserialize;
use serde_json::Value;

/// One decoded `data:` payload from the response stream. Every field is
/// optional; the decoder classifies a frame by its first populated field in
/// priority order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFrame {
    pub chunk: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_log: bool,
    pub usage: Option<UsagePayload>,
    pub updated_files: Option<Value>,
    pub error: Option<String>,
    #[serde(rename = "updatedCode")]
    pub updated_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsagePayload {
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// A classified stream frame. Exactly one variant per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Assistant message text delta.
    Content(String),
    /// Server-side progress line, shown outside the transcript.
    Log(String),
    /// A system message appended to the transcript.
    System(String),
    /// Running usage totals for the conversation.
    Usage(UsagePayload),
    /// Replacement file tree after server-side edits.
    FilesUpdated(Value),
    /// Delta of a proposed replacement for a captured selection.
    ProposedCode(String),
    /// Server-reported failure; the stream is over after this.
    Error(String),
}
