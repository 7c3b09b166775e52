use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An (anchor, head) span over a document, in character offsets. Anchor and
/// head may be in either order; `normalized` orders them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub anchor: usize,
    pub head: usize,
}

impl SelectionRange {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn normalized(self) -> (usize, usize) {
        if self.anchor <= self.head {
            (self.anchor, self.head)
        } else {
            (self.head, self.anchor)
        }
    }

    pub fn is_empty(self) -> bool {
        self.anchor == self.head
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    /// The document no longer holds the text the selection was captured over.
    #[error("selected text changed since capture: expected {expected:?}, found {found:?}")]
    SelectionDrift { expected: String, found: String },
    #[error("an edit request is already pending")]
    RequestPending,
    #[error("no edit request is pending")]
    NoRequestPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Empty replacement text: the document is untouched.
    Skipped,
}

/// In-memory implementation of the external structured-text-view contract:
/// value, selection, and range replacement, addressed in character offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    text: String,
    selection: SelectionRange,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selection: SelectionRange::default(),
        }
    }

    pub fn get_value(&self) -> &str {
        &self.text
    }

    pub fn set_value(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.selection = SelectionRange::default();
    }

    pub fn get_selection(&self) -> SelectionRange {
        self.selection
    }

    /// Clamped to the document's character count.
    pub fn set_selection(&mut self, range: SelectionRange) {
        let chars = self.char_count();
        self.selection = SelectionRange::new(range.anchor.min(chars), range.head.min(chars));
    }

    pub fn selected_text(&self) -> &str {
        let (start, end) = self.selection.normalized();
        self.slice_chars(start, end)
    }

    /// Substitute the current selection in place; the selection collapses to
    /// the end of the inserted text.
    pub fn replace_selection(&mut self, replacement: &str) {
        let (start, end) = self.selection.normalized();
        let byte_start = self.byte_offset(start);
        let byte_end = self.byte_offset(end);
        self.text.replace_range(byte_start..byte_end, replacement);
        let caret = start + replacement.chars().count();
        self.selection = SelectionRange::new(caret, caret);
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Slice by character offsets; both ends are clamped to the document.
    pub fn slice_chars(&self, start: usize, end: usize) -> &str {
        &self.text[self.byte_offset(start)..self.byte_offset(end.max(start))]
    }

    fn byte_offset(&self, char_index: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_index)
            .map(|(offset, _)| offset)
            .unwrap_or(self.text.len())
    }
}

/// A selection frozen at request time: the range plus the text it covered,
/// kept so the apply step can detect that the document moved underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedSelection {
    pub range: SelectionRange,
    pub text: String,
}

impl CapturedSelection {
    pub fn capture(document: &Document, range: SelectionRange) -> Self {
        let chars = document.char_count();
        let range = SelectionRange::new(range.anchor.min(chars), range.head.min(chars));
        let (start, end) = range.normalized();
        Self {
            range,
            text: document.slice_chars(start, end).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditScope {
    WholeFile,
    Selection,
}

/// One user-initiated edit, bundled into a single value so there is exactly
/// one object to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub scope: EditScope,
    pub file_path: String,
    pub selection: Option<CapturedSelection>,
    pub instruction: String,
}

impl EditRequest {
    pub fn whole_file(file_path: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            scope: EditScope::WholeFile,
            file_path: file_path.into(),
            selection: None,
            instruction: instruction.into(),
        }
    }

    pub fn selection(
        file_path: impl Into<String>,
        captured: CapturedSelection,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            scope: EditScope::Selection,
            file_path: file_path.into(),
            selection: Some(captured),
            instruction: instruction.into(),
        }
    }
}

/// Replacement text streamed for a pending edit request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposedChange {
    raw_text: String,
    complete: bool,
}

impl ProposedChange {
    pub fn append(&mut self, chunk: &str) {
        self.raw_text.push_str(chunk);
    }

    pub fn finalize(&mut self) {
        self.complete = true;
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Restore the captured selection and substitute the proposed text for
/// exactly that range. Empty proposed text is a silent no-op, not an error.
pub fn apply_change(
    document: &mut Document,
    range: SelectionRange,
    proposed: &str,
) -> ApplyOutcome {
    if proposed.is_empty() {
        return ApplyOutcome::Skipped;
    }
    document.set_selection(range);
    document.replace_selection(proposed);
    ApplyOutcome::Applied
}

/// `apply_change` plus the drift check: refuses to substitute when the
/// document no longer holds the captured text at the captured range.
pub fn apply_change_checked(
    document: &mut Document,
    captured: &CapturedSelection,
    proposed: &str,
) -> Result<ApplyOutcome, EditError> {
    if proposed.is_empty() {
        return Ok(ApplyOutcome::Skipped);
    }

    let (start, end) = captured.range.normalized();
    let found = document.slice_chars(start, end);
    if found != captured.text {
        return Err(EditError::SelectionDrift {
            expected: captured.text.clone(),
            found: found.to_string(),
        });
    }

    Ok(apply_change(document, captured.range, proposed))
}

/// One pending edit round trip. The request, the streamed proposal, and the
/// in-flight flag live and die together: resolution clears all three at once
/// so a stale range can never leak into a later request.
#[derive(Debug, Default)]
pub struct EditSession {
    request: Option<EditRequest>,
    proposed: Option<ProposedChange>,
    loading: bool,
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, request: EditRequest) -> Result<(), EditError> {
        if self.request.is_some() {
            return Err(EditError::RequestPending);
        }
        self.request = Some(request);
        self.proposed = None;
        self.loading = true;
        Ok(())
    }

    /// Accumulate streamed replacement text. Ignored without an open request.
    pub fn append_proposed(&mut self, chunk: &str) {
        if self.request.is_none() {
            return;
        }
        self.proposed
            .get_or_insert_with(ProposedChange::default)
            .append(chunk);
    }

    /// The response stream completed; the proposal stops growing.
    pub fn finalize_proposed(&mut self) {
        if let Some(proposed) = &mut self.proposed {
            proposed.finalize();
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn request(&self) -> Option<&EditRequest> {
        self.request.as_ref()
    }

    pub fn proposed_text(&self) -> Option<&str> {
        self.proposed.as_ref().map(ProposedChange::raw_text)
    }

    /// Apply the proposal into the document and resolve the session. The
    /// session resolves even when the drift check fails: the request is
    /// spent either way.
    pub fn accept(&mut self, document: &mut Document) -> Result<ApplyOutcome, EditError> {
        let Some(request) = self.request.take() else {
            return Err(EditError::NoRequestPending);
        };
        let proposed = self
            .proposed
            .take()
            .map(|change| change.raw_text)
            .unwrap_or_default();
        self.clear();

        match (request.scope, request.selection) {
            (EditScope::Selection, Some(captured)) => {
                apply_change_checked(document, &captured, &proposed)
            }
            // Whole-file edits are applied server-side; nothing to do locally.
            _ => Ok(ApplyOutcome::Skipped),
        }
    }

    pub fn reject(&mut self) {
        self.clear();
    }

    /// Teardown path: a request closed before its stream completes discards
    /// any partial proposal.
    pub fn discard(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.request = None;
        self.proposed = None;
        self.loading = false;
    }
}
