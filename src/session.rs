use crate::api::client::{ApiClient, ByteStream};
use crate::api::decoder::decode_stream;
use crate::edit::{
    ApplyOutcome, CapturedSelection, Document, EditError, EditRequest, EditSession, SelectionRange,
};
use crate::state::conversation::ConversationLog;
use crate::state::segment::{segment, Segment};
use crate::state::view_pool::{ViewFactory, ViewPool};
use crate::types::{ChatRequest, StreamEvent};
use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Incremental updates a frontend can render while a turn streams.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    AssistantDelta(String),
    SystemMessage(String),
    LogLine(String),
    UsageUpdated { total_tokens: u64, total_cost: f64 },
    FilesUpdated,
    ProposedDelta(String),
}

/// How a streamed turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed(String),
}

/// One conversation's client-side state: the transcript, the pooled code
/// views of the streaming message, and at most one pending edit request.
///
/// A single turn runs at a time; the open assistant message is mutated only
/// by the task consuming its stream, so no locking is needed.
pub struct ChatSession<F: ViewFactory> {
    client: ApiClient,
    conversation: ConversationLog,
    edit: EditSession,
    views: ViewPool<F>,
    segments: Vec<Segment>,
    model: Option<String>,
    command: String,
}

impl<F: ViewFactory> ChatSession<F> {
    pub fn new(
        client: ApiClient,
        factory: F,
        model: Option<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            client,
            conversation: ConversationLog::new(),
            edit: EditSession::new(),
            views: ViewPool::new(factory),
            segments: Vec::new(),
            model,
            command: command.into(),
        }
    }

    pub fn conversation(&self) -> &ConversationLog {
        &self.conversation
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn views(&self) -> &ViewPool<F> {
        &self.views
    }

    pub fn proposed_text(&self) -> Option<&str> {
        self.edit.proposed_text()
    }

    pub fn has_pending_edit(&self) -> bool {
        self.edit.request().is_some()
    }

    /// Send one chat prompt and stream the assistant's reply to completion,
    /// cancellation, or failure.
    pub async fn send(
        &mut self,
        prompt: &str,
        selected_files: Vec<String>,
        update_tx: Option<&mpsc::UnboundedSender<SessionUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<TurnStatus> {
        let user_message = if selected_files.is_empty() {
            prompt.to_string()
        } else {
            format!(
                "{prompt}\n\nSelected files:\n{}",
                selected_files.join("\n")
            )
        };
        self.conversation.push_user(user_message.clone());

        let request = ChatRequest {
            message: user_message,
            selected_files,
            model: self.model.clone(),
            command: self.command.clone(),
            selected_code: None,
            file: None,
        };

        let bytes = match self.client.create_chat_stream(&request).await {
            Ok(bytes) => bytes,
            Err(error) => return Ok(self.fail_turn(error.to_string(), update_tx)),
        };
        self.stream_assistant_turn(bytes, update_tx, cancel).await
    }

    /// Consume an already-open response stream as one assistant turn.
    ///
    /// Events are processed strictly in arrival order. Cancellation is
    /// observed before every await of the next event; it releases the read
    /// loop, disposes the message's pooled views, and discards any partial
    /// proposed change. A transport or server-reported error ends the turn
    /// as a failure without discarding content streamed so far.
    pub async fn stream_assistant_turn(
        &mut self,
        bytes: ByteStream,
        update_tx: Option<&mpsc::UnboundedSender<SessionUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<TurnStatus> {
        // Views from the previous message would collide with the new
        // message's segment ids; release them before streaming starts.
        self.views.dispose_all();
        self.segments.clear();
        self.conversation.begin_assistant_turn();

        let mut events = Box::pin(decode_stream(bytes));
        let status = loop {
            // Biased so the token is always observed before awaiting the
            // next event.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.teardown_streaming();
                    break TurnStatus::Cancelled;
                }
                next = events.next() => next,
            };

            match next {
                None => break TurnStatus::Completed,
                Some(Ok(event)) => {
                    if let Some(status) = self.handle_event(event, update_tx) {
                        break status;
                    }
                }
                Some(Err(error)) => break self.fail_turn(error.to_string(), update_tx),
            }
        };

        self.conversation.finish_assistant_turn();
        Ok(status)
    }

    fn handle_event(
        &mut self,
        event: StreamEvent,
        update_tx: Option<&mpsc::UnboundedSender<SessionUpdate>>,
    ) -> Option<TurnStatus> {
        match event {
            StreamEvent::Content(text) => {
                if text.is_empty() {
                    return None;
                }
                self.conversation.append_assistant_delta(&text);
                self.resegment_streaming_message();
                emit_update(update_tx, SessionUpdate::AssistantDelta(text));
            }
            StreamEvent::Log(line) => {
                self.conversation.push_log(line.clone());
                emit_update(update_tx, SessionUpdate::LogLine(line));
            }
            StreamEvent::System(text) => {
                self.conversation.push_system(text.clone());
                emit_update(update_tx, SessionUpdate::SystemMessage(text));
            }
            StreamEvent::Usage(usage) => {
                self.conversation.record_usage(&usage);
                emit_update(
                    update_tx,
                    SessionUpdate::UsageUpdated {
                        total_tokens: usage.total_tokens,
                        total_cost: usage.total_cost,
                    },
                );
            }
            StreamEvent::FilesUpdated(tree) => {
                self.conversation.update_file_tree(tree);
                emit_update(update_tx, SessionUpdate::FilesUpdated);
            }
            StreamEvent::ProposedCode(code) => {
                self.edit.append_proposed(&code);
                emit_update(update_tx, SessionUpdate::ProposedDelta(code));
            }
            StreamEvent::Error(message) => return Some(self.fail_turn(message, update_tx)),
        }
        None
    }

    /// Open an edit request for an already-captured selection without
    /// issuing a network request; pair with `stream_edit_response`.
    pub fn begin_selection_edit(
        &mut self,
        file_path: &str,
        captured: CapturedSelection,
        instruction: &str,
    ) -> Result<(), EditError> {
        self.edit
            .begin(EditRequest::selection(file_path, captured, instruction))
    }

    /// Capture the selection, stream the proposed replacement for it, and
    /// leave the proposal pending for `accept_pending_edit` or
    /// `reject_pending_edit`.
    pub async fn request_selection_edit(
        &mut self,
        file_path: &str,
        document: &Document,
        range: SelectionRange,
        instruction: &str,
        update_tx: Option<&mpsc::UnboundedSender<SessionUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<TurnStatus> {
        let captured = CapturedSelection::capture(document, range);
        let request = ChatRequest {
            message: instruction.to_string(),
            selected_files: Vec::new(),
            model: self.model.clone(),
            command: "inline".to_string(),
            selected_code: Some(captured.text.clone()),
            file: Some(file_path.to_string()),
        };
        self.begin_selection_edit(file_path, captured, instruction)?;

        let bytes = match self.client.create_chat_stream(&request).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.edit.discard();
                return Ok(self.fail_turn(error.to_string(), update_tx));
            }
        };
        self.stream_edit_response(bytes, update_tx, cancel).await
    }

    /// Consume the response stream of a pending edit request. Only the
    /// proposed-code payload feeds the edit session; narration on this path
    /// is kept as log noise rather than transcript content.
    pub async fn stream_edit_response(
        &mut self,
        bytes: ByteStream,
        update_tx: Option<&mpsc::UnboundedSender<SessionUpdate>>,
        cancel: &CancellationToken,
    ) -> Result<TurnStatus> {
        let mut events = Box::pin(decode_stream(bytes));
        let status = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.edit.discard();
                    break TurnStatus::Cancelled;
                }
                next = events.next() => next,
            };

            match next {
                None => {
                    self.edit.finalize_proposed();
                    break TurnStatus::Completed;
                }
                Some(Ok(StreamEvent::ProposedCode(code))) => {
                    self.edit.append_proposed(&code);
                    emit_update(update_tx, SessionUpdate::ProposedDelta(code));
                }
                Some(Ok(StreamEvent::Usage(usage))) => {
                    self.conversation.record_usage(&usage);
                    emit_update(
                        update_tx,
                        SessionUpdate::UsageUpdated {
                            total_tokens: usage.total_tokens,
                            total_cost: usage.total_cost,
                        },
                    );
                }
                Some(Ok(StreamEvent::FilesUpdated(tree))) => {
                    self.conversation.update_file_tree(tree);
                    emit_update(update_tx, SessionUpdate::FilesUpdated);
                }
                Some(Ok(StreamEvent::Error(message))) => {
                    self.edit.discard();
                    break self.fail_turn(message, update_tx);
                }
                Some(Ok(
                    StreamEvent::Content(text)
                    | StreamEvent::Log(text)
                    | StreamEvent::System(text),
                )) => {
                    if !text.is_empty() {
                        self.conversation.push_log(text.clone());
                        emit_update(update_tx, SessionUpdate::LogLine(text));
                    }
                }
                Some(Err(error)) => {
                    self.edit.discard();
                    break self.fail_turn(error.to_string(), update_tx);
                }
            }
        };
        Ok(status)
    }

    /// Resolve the pending edit into the document. Clears the request,
    /// proposal, and loading flag together regardless of outcome.
    pub fn accept_pending_edit(
        &mut self,
        document: &mut Document,
    ) -> Result<ApplyOutcome, EditError> {
        self.edit.accept(document)
    }

    pub fn reject_pending_edit(&mut self) {
        self.edit.reject();
    }

    /// Drop the transcript and every derived resource.
    pub fn clear_conversation(&mut self) {
        self.conversation.clear();
        self.views.dispose_all();
        self.segments.clear();
    }

    fn resegment_streaming_message(&mut self) {
        let content = self.conversation.last_assistant_content().unwrap_or("");
        let segments = segment(content);
        self.views.reconcile(&segments);
        self.segments = segments;
    }

    fn teardown_streaming(&mut self) {
        self.views.dispose_all();
        self.segments.clear();
        self.edit.discard();
    }

    fn fail_turn(
        &mut self,
        message: String,
        update_tx: Option<&mpsc::UnboundedSender<SessionUpdate>>,
    ) -> TurnStatus {
        let rendered = format!("An error occurred: {message}. Please try again.");
        self.conversation.push_system(rendered.clone());
        self.conversation.push_log(format!("Error: {message}"));
        emit_update(update_tx, SessionUpdate::SystemMessage(rendered));
        emit_update(update_tx, SessionUpdate::LogLine(format!("Error: {message}")));
        TurnStatus::Failed(message)
    }
}

fn emit_update(
    update_tx: Option<&mpsc::UnboundedSender<SessionUpdate>>,
    update: SessionUpdate,
) {
    if let Some(tx) = update_tx {
        let _ = tx.send(update);
    }
}
