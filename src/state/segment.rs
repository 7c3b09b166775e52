use serde::{Deserialize, Serialize};

pub const REPLACEMENT_OPEN_MARKER: &str = "<<<<<<< SEARCH";
pub const REPLACEMENT_CLOSE_MARKER: &str = ">>>>>>> REPLACE";
pub const FENCE_MARKER: &str = "```";

/// Language recorded for fenced blocks that carry no tag.
pub const DEFAULT_FENCE_LANGUAGE: &str = "javascript";

/// A contiguous run of message content, classified as prose or code. Ids are
/// sequential scan-order ordinals; the view pool reconciles by id across
/// re-parses of the same growing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    #[serde(flatten)]
    pub kind: SegmentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentKind {
    Text { content: String },
    Code {
        content: String,
        language: Option<String>,
    },
}

impl Segment {
    pub fn is_code(&self) -> bool {
        matches!(self.kind, SegmentKind::Code { .. })
    }

    pub fn content(&self) -> &str {
        match &self.kind {
            SegmentKind::Text { content } => content,
            SegmentKind::Code { content, .. } => content,
        }
    }
}

/// Byte span of a matched block inside the scanned string.
struct BlockSpan {
    /// First byte after the opener line.
    inner_start: usize,
    /// First byte of the closer line.
    inner_end: usize,
    /// First byte past the closer marker itself (not its line terminator).
    block_end: usize,
}

/// Split message content into alternating prose and code segments.
///
/// Two block grammars are recognized, leftmost successful match first: a
/// `<<<<<<< SEARCH` / `>>>>>>> REPLACE` replacement block and a triple-backtick
/// fence with an optional word-character language tag. Marker lines must be
/// whole lines. An opener whose closer never appears does not match: the
/// opener stays in the surrounding text run and scanning resumes on the next
/// line, so an unterminated trailing block of a still-streaming message is
/// never speculatively emitted as code.
///
/// Text outside blocks is kept verbatim; code payloads are trimmed. The
/// function is deterministic and re-runnable on a growing string: segments
/// over an unchanged prefix keep their ids and kinds.
pub fn segment(content: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut text_start = 0usize;
    let mut cursor = 0usize;

    while cursor < content.len() {
        let next = next_line_start(content, cursor);
        let line = line_body(content, cursor, next);

        let block = if line == REPLACEMENT_OPEN_MARKER {
            find_block_close(content, next, REPLACEMENT_CLOSE_MARKER).map(|span| (span, None))
        } else if let Some(tag) = fence_tag(line) {
            let language = if tag.is_empty() {
                DEFAULT_FENCE_LANGUAGE.to_string()
            } else {
                tag.to_string()
            };
            find_block_close(content, next, FENCE_MARKER).map(|span| (span, Some(language)))
        } else {
            None
        };

        match block {
            Some((span, language)) => {
                if text_start < cursor {
                    push_text(&mut segments, &content[text_start..cursor]);
                }
                push_code(
                    &mut segments,
                    content[span.inner_start..span.inner_end].trim(),
                    language,
                );
                cursor = span.block_end;
                text_start = span.block_end;
            }
            None => cursor = next,
        }
    }

    if text_start < content.len() {
        push_text(&mut segments, &content[text_start..]);
    }

    segments
}

fn next_line_start(content: &str, from: usize) -> usize {
    content[from..]
        .find('\n')
        .map(|offset| from + offset + 1)
        .unwrap_or(content.len())
}

fn line_body(content: &str, start: usize, next_start: usize) -> &str {
    content[start..next_start].trim_end_matches('\n')
}

/// Scan forward one line at a time until `closer` is a whole line. The block
/// ends at the closer marker itself so trailing text keeps its own leading
/// newline.
fn find_block_close(content: &str, inner_start: usize, closer: &str) -> Option<BlockSpan> {
    let mut cursor = inner_start;
    while cursor < content.len() {
        let next = next_line_start(content, cursor);
        if line_body(content, cursor, next) == closer {
            return Some(BlockSpan {
                inner_start,
                inner_end: cursor,
                block_end: cursor + closer.len(),
            });
        }
        cursor = next;
    }
    None
}

/// A fence opener is the marker plus an optional word-character tag; anything
/// else on the line disqualifies it.
fn fence_tag(line: &str) -> Option<&str> {
    let tag = line.strip_prefix(FENCE_MARKER)?;
    if tag.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        Some(tag)
    } else {
        None
    }
}

fn push_text(segments: &mut Vec<Segment>, content: &str) {
    let id = segments.len();
    segments.push(Segment {
        id,
        kind: SegmentKind::Text {
            content: content.to_string(),
        },
    });
}

fn push_code(segments: &mut Vec<Segment>, content: &str, language: Option<String>) {
    let id = segments.len();
    segments.push(Segment {
        id,
        kind: SegmentKind::Code {
            content: content.to_string(),
            language,
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> SegmentKind {
        SegmentKind::Text {
            content: content.to_string(),
        }
    }

    fn code(content: &str, language: Option<&str>) -> SegmentKind {
        SegmentKind::Code {
            content: content.to_string(),
            language: language.map(ToOwned::to_owned),
        }
    }

    fn kinds(segments: &[Segment]) -> Vec<SegmentKind> {
        segments.iter().map(|segment| segment.kind.clone()).collect()
    }

    #[test]
    fn test_fenced_block_between_prose() {
        let segments = segment("Here:\n```js\nfoo()\n```\ndone");
        assert_eq!(
            kinds(&segments),
            vec![text("Here:\n"), code("foo()", Some("js")), text("\ndone")]
        );
        let ids: Vec<usize> = segments.iter().map(|segment| segment.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_replacement_block_has_no_language() {
        let content = "apply this:\n<<<<<<< SEARCH\nold()\n=======\nnew()\n>>>>>>> REPLACE\nok";
        let segments = segment(content);
        assert_eq!(
            kinds(&segments),
            vec![
                text("apply this:\n"),
                code("old()\n=======\nnew()", None),
                text("\nok"),
            ]
        );
    }

    #[test]
    fn test_untagged_fence_gets_default_language() {
        let segments = segment("```\nlet x = 1;\n```");
        assert_eq!(
            kinds(&segments),
            vec![code("let x = 1;", Some(DEFAULT_FENCE_LANGUAGE))]
        );
    }

    #[test]
    fn test_code_payload_is_trimmed_text_is_not() {
        let segments = segment("  padded  \n```py\n\n  x = 1\n\n```\n");
        assert_eq!(
            kinds(&segments),
            vec![text("  padded  \n"), code("x = 1", Some("py")), text("\n")]
        );
    }

    #[test]
    fn test_unterminated_block_stays_in_trailing_text() {
        let segments = segment("Here:\n```js\nfoo(");
        assert_eq!(kinds(&segments), vec![text("Here:\n```js\nfoo(")]);
    }

    #[test]
    fn test_block_appears_once_closing_marker_arrives() {
        let before = segment("Here:\n```js\nfoo()");
        assert!(before.iter().all(|segment| !segment.is_code()));

        let after = segment("Here:\n```js\nfoo()\n```");
        assert_eq!(
            kinds(&after),
            vec![text("Here:\n"), code("foo()", Some("js"))]
        );
    }

    #[test]
    fn test_appending_text_preserves_prior_segment_ids_and_kinds() {
        let before = segment("intro\n```rs\nfn a() {}\n```\ntail");
        let after = segment("intro\n```rs\nfn a() {}\n```\ntail and more");

        assert_eq!(before.len(), 3);
        for (old, new) in before.iter().zip(after.iter()) {
            assert_eq!(old.id, new.id);
            assert_eq!(old.is_code(), new.is_code());
        }
        assert_eq!(after[2].content(), "\ntail and more");
    }

    #[test]
    fn test_unterminated_fence_does_not_shadow_later_replacement_block() {
        let content = "```js\nnot closed\n<<<<<<< SEARCH\nfoo\n>>>>>>> REPLACE";
        let segments = segment(content);
        assert_eq!(
            kinds(&segments),
            vec![text("```js\nnot closed\n"), code("foo", None)]
        );
    }

    #[test]
    fn test_fence_inside_replacement_block_is_payload() {
        let content = "<<<<<<< SEARCH\n```js\nfoo\n```\n>>>>>>> REPLACE";
        let segments = segment(content);
        assert_eq!(kinds(&segments), vec![code("```js\nfoo\n```", None)]);
    }

    #[test]
    fn test_fence_line_with_non_word_tag_is_plain_text() {
        let segments = segment("``` not a tag\nbody\n```js\nreal\n```\n");
        assert_eq!(
            kinds(&segments),
            vec![
                text("``` not a tag\nbody\n"),
                code("real", Some("js")),
                text("\n"),
            ]
        );
    }

    #[test]
    fn test_adjacent_blocks_produce_consecutive_code_segments() {
        let content = "```a\none\n```\n```b\ntwo\n```";
        let segments = segment(content);
        assert_eq!(
            kinds(&segments),
            vec![code("one", Some("a")), text("\n"), code("two", Some("b"))]
        );
    }

    #[test]
    fn test_empty_content_yields_no_segments() {
        assert!(segment("").is_empty());
    }

    #[test]
    fn test_rejoining_segments_reproduces_the_message() {
        let content = "intro\n```js\nfoo()\n```\nmiddle\n<<<<<<< SEARCH\nbar()\n>>>>>>> REPLACE\nend";
        let mut rejoined = String::new();
        for segment in segment(content) {
            match &segment.kind {
                SegmentKind::Text { content } => rejoined.push_str(content),
                SegmentKind::Code { content, language } => match language {
                    Some(language) => {
                        rejoined.push_str(&format!("```{language}\n{content}\n```"));
                    }
                    None => {
                        rejoined.push_str(&format!(
                            "{REPLACEMENT_OPEN_MARKER}\n{content}\n{REPLACEMENT_CLOSE_MARKER}"
                        ));
                    }
                },
            }
        }
        assert_eq!(rejoined, content);
    }

    #[test]
    fn test_segment_round_trip_serialization() {
        let segment = Segment {
            id: 3,
            kind: SegmentKind::Code {
                content: "x".to_string(),
                language: Some("rs".to_string()),
            },
        };
        let json = serde_json::to_string(&segment).expect("serialize");
        let parsed: Segment = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, segment);
    }
}
