//! Incremental parser for gadget blocks embedded in the model's text stream.
//!
//! The model emits plain text interspersed with blocks of the form
//!
//! ```text
//! <<<GADGET_START>>>Name:InvocationId
//! <params body: JSON or key=value / heredoc lines>
//! <<<GADGET_END>>>Name:InvocationId
//! ```
//!
//! Non-block text is emitted in arrival order as early as possible; only a
//! tail that could still become a start marker is held back. Body parse
//! failures, mismatched or missing end markers, and duplicate invocation IDs
//! all surface as calls carrying a structured parse error, never as panics.

use crate::block::parse_block_params;
use crate::markers::Markers;
use gadgeteer_core::{GadgetCall, ParseError};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Clone, Debug)]
pub enum ParserEvent {
    Text(String),
    Call(GadgetCall),
}

enum State {
    Text,
    Header,
    Body {
        name: String,
        invocation_id: String,
        header_error: Option<ParseError>,
    },
}

pub struct StreamParser {
    markers: Markers,
    buf: String,
    raw: String,
    state: State,
    seen_ids: HashSet<String>,
}

impl StreamParser {
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            buf: String::new(),
            raw: String::new(),
            state: State::Text,
            seen_ids: HashSet::new(),
        }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Feed one chunk; returns the events it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<ParserEvent> {
        self.buf.push_str(chunk);
        self.drain(false)
    }

    /// Signal end of stream. Held-back text is flushed and an open block
    /// becomes an unterminated-block parse error.
    pub fn finish(&mut self) -> Vec<ParserEvent> {
        self.drain(true)
    }

    fn drain(&mut self, at_end: bool) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        loop {
            match &self.state {
                State::Text => {
                    if let Some(idx) = self.buf.find(&self.markers.start) {
                        if idx > 0 {
                            events.push(ParserEvent::Text(self.buf[..idx].to_string()));
                        }
                        let consumed = idx + self.markers.start.len();
                        self.raw = self.buf[idx..consumed].to_string();
                        self.buf.drain(..consumed);
                        self.state = State::Header;
                    } else {
                        let hold = if at_end {
                            0
                        } else {
                            holdback_len(&self.buf, &self.markers.start)
                        };
                        let emit = self.buf.len() - hold;
                        if emit > 0 {
                            events.push(ParserEvent::Text(self.buf[..emit].to_string()));
                            self.buf.drain(..emit);
                        }
                        break;
                    }
                }
                State::Header => {
                    if let Some(nl) = self.buf.find('\n') {
                        let line = self.buf[..nl].trim_end_matches('\r').to_string();
                        self.raw.push_str(&self.buf[..=nl]);
                        self.buf.drain(..=nl);
                        let (name, invocation_id, header_error) = parse_header(&line);
                        self.state = State::Body {
                            name,
                            invocation_id,
                            header_error,
                        };
                    } else if at_end {
                        let line = self.buf.trim_end_matches('\r').to_string();
                        self.raw.push_str(&self.buf);
                        self.buf.clear();
                        let (name, invocation_id, _) = parse_header(&line);
                        events.push(self.emit_call(
                            name,
                            invocation_id,
                            Value::Null,
                            Some(ParseError::new("unterminated gadget block")),
                        ));
                        self.state = State::Text;
                    } else {
                        break;
                    }
                }
                State::Body {
                    name,
                    invocation_id,
                    header_error,
                } => {
                    let expected = format!("{}:{}", name, invocation_id);
                    match self.find_block_end(&expected, at_end) {
                        BlockEnd::Found {
                            body,
                            consumed,
                            end_error,
                        } => {
                            let name = name.clone();
                            let invocation_id = invocation_id.clone();
                            let header_error = header_error.clone();
                            self.raw.push_str(&self.buf[..consumed]);
                            self.buf.drain(..consumed);

                            let first_error = header_error.or(end_error);
                            let (params, body_error) = if first_error.is_some() {
                                (Value::Null, None)
                            } else {
                                match parse_body(&body) {
                                    Ok(v) => (v, None),
                                    Err(e) => (Value::Null, Some(e)),
                                }
                            };
                            let error = first_error.or(body_error);
                            events.push(self.emit_call(name, invocation_id, params, error));
                            self.state = State::Text;
                        }
                        BlockEnd::NeedMore => break,
                        BlockEnd::Unterminated => {
                            let name = name.clone();
                            let invocation_id = invocation_id.clone();
                            self.raw.push_str(&self.buf);
                            self.buf.clear();
                            events.push(self.emit_call(
                                name,
                                invocation_id,
                                Value::Null,
                                Some(ParseError::new("unterminated gadget block")),
                            ));
                            self.state = State::Text;
                        }
                    }
                }
            }
        }
        events
    }

    /// Locate the end marker for the current block. Valid occurrences sit at
    /// the start of a line and carry a complete `Name:InvocationId` header.
    fn find_block_end(&self, expected: &str, at_end: bool) -> BlockEnd {
        let end = &self.markers.end;
        let mut search_from = 0;

        while let Some(rel) = self.buf[search_from..].find(end.as_str()) {
            let pos = search_from + rel;
            let at_line_start = pos == 0 || self.buf.as_bytes()[pos - 1] == b'\n';
            if !at_line_start {
                search_from = pos + 1;
                continue;
            }

            let after = &self.buf[pos + end.len()..];
            let (header_line, header_len) = match after.find('\n') {
                Some(nl) => (after[..nl].trim_end_matches('\r'), nl + 1),
                None if at_end => (after.trim_end_matches('\r'), after.len()),
                None => return BlockEnd::NeedMore,
            };

            let mut body = &self.buf[..pos];
            if let Some(stripped) = body.strip_suffix('\n') {
                body = stripped.strip_suffix('\r').unwrap_or(stripped);
            }
            let end_error = if header_line == expected {
                None
            } else {
                Some(ParseError::at(
                    format!(
                        "mismatched end marker: expected '{}', found '{}'",
                        expected, header_line
                    ),
                    pos,
                ))
            };
            return BlockEnd::Found {
                body: body.to_string(),
                consumed: pos + end.len() + header_len,
                end_error,
            };
        }

        if at_end {
            BlockEnd::Unterminated
        } else {
            BlockEnd::NeedMore
        }
    }

    fn emit_call(
        &mut self,
        name: String,
        invocation_id: String,
        parameters: Value,
        mut parse_error: Option<ParseError>,
    ) -> ParserEvent {
        if parse_error.is_none() && !invocation_id.is_empty() {
            if !self.seen_ids.insert(invocation_id.clone()) {
                parse_error = Some(ParseError::new(format!(
                    "duplicate invocation id '{}' in one response",
                    invocation_id
                )));
            }
        }
        ParserEvent::Call(GadgetCall {
            name,
            invocation_id,
            parameters,
            raw_text: std::mem::take(&mut self.raw),
            parse_error,
        })
    }
}

enum BlockEnd {
    Found {
        body: String,
        consumed: usize,
        end_error: Option<ParseError>,
    },
    NeedMore,
    Unterminated,
}

/// Longest proper prefix of `marker` that the buffer ends with. Those bytes
/// may still grow into a start marker, so they are not emitted as text.
fn holdback_len(buf: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(buf.len());
    for k in (1..=max).rev() {
        if buf.ends_with(&marker[..k]) {
            return k;
        }
    }
    0
}

fn parse_header(line: &str) -> (String, String, Option<ParseError>) {
    match line.split_once(':') {
        Some((name, id)) if !name.trim().is_empty() && !id.trim().is_empty() => {
            (name.trim().to_string(), id.trim().to_string(), None)
        }
        _ => (
            line.trim().to_string(),
            String::new(),
            Some(ParseError::new(format!(
                "malformed block header '{}': expected Name:InvocationId",
                line.trim()
            ))),
        ),
    }
}

/// JSON body when it looks like JSON, block format otherwise.
fn parse_body(body: &str) -> Result<Value, ParseError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| {
            ParseError::at(e.to_string(), byte_offset(trimmed, e.line(), e.column()))
        })
    } else {
        parse_block_params(body)
    }
}

/// Byte offset of a 1-based (line, column) position.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, l) in text.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            return offset + column.saturating_sub(1);
        }
        offset += l.len();
    }
    offset + column.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> StreamParser {
        StreamParser::new(Markers::default())
    }

    fn texts(events: &[ParserEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn calls(events: Vec<ParserEvent>) -> Vec<GadgetCall> {
        events
            .into_iter()
            .filter_map(|e| match e {
                ParserEvent::Call(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_passes_through_in_order() {
        let mut p = parser();
        let mut events = p.push("Hi ");
        events.extend(p.push("there!"));
        events.extend(p.finish());
        assert_eq!(texts(&events), "Hi there!");
        assert!(calls(events).is_empty());
    }

    #[test]
    fn single_json_block() {
        let mut p = parser();
        let mut events = p.push("ok ");
        events.extend(p.push("<<<GADGET_START>>>Echo:1\n{\"msg\":\"hi\"}\n<<<GADGET_END>>>Echo:1\n"));
        events.extend(p.finish());

        assert_eq!(texts(&events), "ok ");
        let calls = calls(events);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "Echo");
        assert_eq!(calls[0].invocation_id, "1");
        assert_eq!(calls[0].parameters, json!({"msg": "hi"}));
        assert!(calls[0].parse_error.is_none());
        assert!(calls[0].raw_text.starts_with("<<<GADGET_START>>>Echo:1"));
        assert!(calls[0].raw_text.ends_with("<<<GADGET_END>>>Echo:1\n"));
    }

    #[test]
    fn marker_split_across_chunks_is_held_back() {
        let mut p = parser();
        let events = p.push("hello <<<GAD");
        assert_eq!(texts(&events), "hello ");

        let mut rest = p.push("GET_START>>>Echo:7\n{}\n");
        rest.extend(p.push("<<<GADGET_END>>>Echo:7\n"));
        let calls = calls(rest);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].invocation_id, "7");
        assert_eq!(calls[0].parameters, json!({}));
    }

    #[test]
    fn false_marker_prefix_flushes_at_finish() {
        let mut p = parser();
        let events = p.push("almost <<<GADGET_ST");
        assert_eq!(texts(&events), "almost ");
        let events = p.finish();
        assert_eq!(texts(&events), "<<<GADGET_ST");
    }

    #[test]
    fn text_between_and_after_blocks() {
        let mut p = parser();
        let mut events = p.push(
            "before\n<<<GADGET_START>>>A:1\n{}\n<<<GADGET_END>>>A:1\nmiddle\n<<<GADGET_START>>>B:2\n{}\n<<<GADGET_END>>>B:2\nafter",
        );
        events.extend(p.finish());
        assert_eq!(texts(&events), "before\nmiddle\nafter");
        let calls = calls(events);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "A");
        assert_eq!(calls[1].name, "B");
    }

    #[test]
    fn malformed_json_body_reports_position() {
        let mut p = parser();
        let events =
            p.push("<<<GADGET_START>>>Echo:1\n{\"msg\": }\n<<<GADGET_END>>>Echo:1\n");
        let calls = calls(events);
        assert_eq!(calls.len(), 1);
        let err = calls[0].parse_error.as_ref().unwrap();
        assert!(err.message.contains("column"));
        assert!(err.position.is_some());
        assert_eq!(calls[0].parameters, Value::Null);
    }

    #[test]
    fn block_format_body() {
        let mut p = parser();
        let events = p.push(
            "<<<GADGET_START>>>Write:3\npath=/tmp/a.txt\ncontent:<<<EOF\nhello\nworld\nEOF\n<<<GADGET_END>>>Write:3\n",
        );
        let calls = calls(events);
        assert_eq!(
            calls[0].parameters,
            json!({"path": "/tmp/a.txt", "content": "hello\nworld"})
        );
    }

    #[test]
    fn unterminated_block_at_stream_end() {
        let mut p = parser();
        let mut events = p.push("<<<GADGET_START>>>Echo:1\n{\"msg\":\"hi\"}");
        events.extend(p.finish());
        let calls = calls(events);
        assert_eq!(calls.len(), 1);
        let err = calls[0].parse_error.as_ref().unwrap();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn mismatched_end_marker_is_an_error() {
        let mut p = parser();
        let events =
            p.push("<<<GADGET_START>>>Echo:1\n{}\n<<<GADGET_END>>>Echo:2\ntail");
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Call(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 1);
        assert!(calls[0]
            .parse_error
            .as_ref()
            .unwrap()
            .message
            .contains("mismatched end marker"));
        assert_eq!(texts(&events), "tail");
    }

    #[test]
    fn duplicate_invocation_id_flags_second_call() {
        let mut p = parser();
        let mut events =
            p.push("<<<GADGET_START>>>A:1\n{}\n<<<GADGET_END>>>A:1\n<<<GADGET_START>>>B:1\n{}\n<<<GADGET_END>>>B:1\n");
        events.extend(p.finish());
        let calls = calls(events);
        assert_eq!(calls.len(), 2);
        assert!(calls[0].parse_error.is_none());
        assert!(calls[1]
            .parse_error
            .as_ref()
            .unwrap()
            .message
            .contains("duplicate invocation id"));
    }

    #[test]
    fn empty_body_is_empty_params() {
        let mut p = parser();
        let events = p.push("<<<GADGET_START>>>Ping:9\n<<<GADGET_END>>>Ping:9\n");
        let calls = calls(events);
        assert_eq!(calls[0].parameters, json!({}));
        assert!(calls[0].parse_error.is_none());
    }

    #[test]
    fn header_split_across_chunks() {
        let mut p = parser();
        assert!(calls(p.push("<<<GADGET_START>>>Ec")).is_empty());
        assert!(calls(p.push("ho:4")).is_empty());
        let events = p.push("\n{}\n<<<GADGET_END>>>Echo:4\n");
        let calls = calls(events);
        assert_eq!(calls[0].name, "Echo");
        assert_eq!(calls[0].invocation_id, "4");
    }

    #[test]
    fn malformed_header_surfaces_error() {
        let mut p = parser();
        let mut events = p.push("<<<GADGET_START>>>NoColonHere\n{}\n");
        events.extend(p.push("<<<GADGET_END>>>NoColonHere\n"));
        let calls = calls(events);
        assert_eq!(calls.len(), 1);
        assert!(calls[0]
            .parse_error
            .as_ref()
            .unwrap()
            .message
            .contains("malformed block header"));
    }

    #[test]
    fn custom_markers() {
        let mut p = StreamParser::new(Markers::new("[[CALL]]", "[[DONE]]"));
        let mut events = p.push("x[[CALL]]Echo:1\n{\"a\":1}\n[[DONE]]Echo:1\ny");
        events.extend(p.finish());
        assert_eq!(texts(&events), "xy");
        let calls = calls(events);
        assert_eq!(calls[0].parameters, json!({"a": 1}));
    }

    #[test]
    fn end_marker_text_outside_block_is_plain_text() {
        let mut p = parser();
        let mut events = p.push("note: <<<GADGET_END>>>Echo:1 is the end marker");
        events.extend(p.finish());
        assert_eq!(
            texts(&events),
            "note: <<<GADGET_END>>>Echo:1 is the end marker"
        );
    }
}
