use super::client::ByteStream;
use super::logging::{emit_discarded_residual, emit_frame_decode_error};
use crate::types::{RawFrame, StreamEvent};
use anyhow::Result;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;

const FRAME_DELIMITER: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data: ";

/// Reassembles `data:`-framed JSON events from an arbitrarily chunked byte
/// stream. A frame split across chunks is buffered until its terminator
/// arrives; a chunk carrying several frames yields several events. Buffering
/// is byte-level, so a chunk boundary inside a multi-byte character cannot
/// corrupt a field.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and drain every frame completed by it.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(end) = find_delimiter(&self.buffer[start..]) {
            let frame_end = start + end + FRAME_DELIMITER.len();
            let frame_text = String::from_utf8_lossy(&self.buffer[start..frame_end]);

            for line in frame_text.lines() {
                let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                    continue;
                };
                match serde_json::from_str::<RawFrame>(payload.trim()) {
                    Ok(frame) => events.push(classify_frame(frame)),
                    Err(parse_error) => emit_frame_decode_error(payload, &parse_error),
                }
            }

            start = frame_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        events
    }

    /// Trailing bytes with no frame terminator. Never a valid event; the
    /// caller decides whether to report the discard.
    pub fn take_residual(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned()
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

/// First populated field wins: `error`, then `updated_files`, the system
/// flags, `usage`, `updatedCode`, and finally plain content.
fn classify_frame(frame: RawFrame) -> StreamEvent {
    if let Some(message) = frame.error {
        return StreamEvent::Error(message);
    }
    if let Some(tree) = frame.updated_files {
        return StreamEvent::FilesUpdated(tree);
    }
    if frame.is_system {
        let text = frame.chunk.unwrap_or_default();
        return if frame.is_log {
            StreamEvent::Log(text)
        } else {
            StreamEvent::System(text)
        };
    }
    if let Some(usage) = frame.usage {
        return StreamEvent::Usage(usage);
    }
    if let Some(code) = frame.updated_code {
        return StreamEvent::ProposedCode(code);
    }
    StreamEvent::Content(frame.chunk.unwrap_or_default())
}

struct DecodeState {
    bytes: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

/// Adapt a raw response-body stream into a stream of typed events.
///
/// Transport failures surface once as an `Err` item and terminate the
/// sequence; an incomplete trailing frame at end-of-stream is discarded and
/// reported to the diagnostic sink.
pub fn decode_stream(bytes: ByteStream) -> impl Stream<Item = Result<StreamEvent>> {
    let state = DecodeState {
        bytes,
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.process(&chunk)),
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(error), state));
                }
                None => {
                    state.done = true;
                    let residual = state.decoder.take_residual();
                    if !residual.trim().is_empty() {
                        emit_discarded_residual(&residual);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn decode_whole(text: &str) -> Vec<StreamEvent> {
        FrameDecoder::new().process(text.as_bytes())
    }

    #[test]
    fn test_content_frame_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.process(b"data: {\"chunk\":\"He").is_empty());
        let events = decoder.process(b"llo\"}\n\n");
        assert_eq!(events, vec![StreamEvent::Content("Hello".to_string())]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let events = decode_whole("data: {\"chunk\":\"a\"}\n\ndata: {\"chunk\":\"b\"}\n\n");
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("a".to_string()),
                StreamEvent::Content("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_field_wins_over_everything_else() {
        let events = decode_whole(
            "data: {\"error\":\"boom\",\"chunk\":\"x\",\"is_system\":true,\"usage\":{\"total_tokens\":1,\"total_cost\":0.1}}\n\n",
        );
        assert_eq!(events, vec![StreamEvent::Error("boom".to_string())]);
    }

    #[test]
    fn test_updated_files_wins_over_system_flags() {
        let events =
            decode_whole("data: {\"updated_files\":{\"src\":{}},\"is_system\":true}\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::FilesUpdated(serde_json::json!({"src": {}}))]
        );
    }

    #[test]
    fn test_system_log_classification() {
        let events = decode_whole(
            "data: {\"chunk\":\"scanning repo\",\"is_system\":true,\"is_log\":true}\n\n\
             data: {\"chunk\":\"model changed\",\"is_system\":true}\n\n",
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Log("scanning repo".to_string()),
                StreamEvent::System("model changed".to_string()),
            ]
        );
    }

    #[test]
    fn test_usage_frame_classification() {
        let events =
            decode_whole("data: {\"usage\":{\"total_tokens\":42,\"total_cost\":0.5}}\n\n");
        match &events[..] {
            [StreamEvent::Usage(usage)] => {
                assert_eq!(usage.total_tokens, 42);
                assert!((usage.total_cost - 0.5).abs() < f64::EPSILON);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_updated_code_frame_classification() {
        let events = decode_whole("data: {\"updatedCode\":\"fn new() {}\"}\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::ProposedCode("fn new() {}".to_string())]
        );
    }

    #[test]
    fn test_frame_without_chunk_defaults_to_empty_content() {
        let events = decode_whole("data: {}\n\n");
        assert_eq!(events, vec![StreamEvent::Content(String::new())]);
    }

    #[test]
    fn test_malformed_json_line_is_skipped_not_fatal() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.process(b"data: {broken\n\ndata: {\"chunk\":\"ok\"}\n\n");
        assert_eq!(events, vec![StreamEvent::Content("ok".to_string())]);
    }

    #[test]
    fn test_non_data_lines_are_ignored() {
        let events = decode_whole("event: message\nid: 7\ndata: {\"chunk\":\"x\"}\n\n");
        assert_eq!(events, vec![StreamEvent::Content("x".to_string())]);
    }

    #[test]
    fn test_take_residual_returns_unterminated_tail() {
        let mut decoder = FrameDecoder::new();
        decoder.process(b"data: {\"chunk\":\"done\"}\n\ndata: {\"chu");
        assert_eq!(decoder.take_residual(), "data: {\"chu");
        assert_eq!(decoder.take_residual(), "");
    }

    fn byte_stream(chunks: Vec<Result<Bytes>>) -> ByteStream {
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_decode_stream_yields_events_in_arrival_order() {
        let bytes = byte_stream(vec![
            Ok(Bytes::from_static(b"data: {\"chunk\":\"Hi\"}\n\ndata: {\"chunk\":\" there\"}\n\n")),
            Ok(Bytes::from_static(b"data: {\"usage\":{\"total_tokens\":9,\"total_cost\":0.2}}\n\n")),
        ]);

        let events: Vec<_> = decode_stream(bytes).collect().await;
        let events: Vec<_> = events
            .into_iter()
            .map(|item| item.expect("no transport errors"))
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Content("Hi".to_string()));
        assert_eq!(events[1], StreamEvent::Content(" there".to_string()));
        assert!(matches!(events[2], StreamEvent::Usage(_)));
    }

    #[tokio::test]
    async fn test_decode_stream_ends_after_transport_error() {
        let bytes = byte_stream(vec![
            Ok(Bytes::from_static(b"data: {\"chunk\":\"partial\"}\n\n")),
            Err(anyhow::anyhow!("connection reset")),
            Ok(Bytes::from_static(b"data: {\"chunk\":\"never seen\"}\n\n")),
        ]);

        let items: Vec<_> = decode_stream(bytes).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].as_ref().expect("first item ok"),
            &StreamEvent::Content("partial".to_string())
        );
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_decode_stream_discards_trailing_partial_frame() {
        let bytes = byte_stream(vec![Ok(Bytes::from_static(
            b"data: {\"chunk\":\"whole\"}\n\ndata: {\"chunk\":\"cut",
        ))]);

        let events: Vec<_> = decode_stream(bytes).collect().await;
        let events: Vec<_> = events
            .into_iter()
            .map(|item| item.expect("no transport errors"))
            .collect();
        assert_eq!(events, vec![StreamEvent::Content("whole".to_string())]);
    }
}
