//! Incremental parser for the file-block format the model streams during
//! phase implementation:
//!
//! ```text
//! <file path="src/App.tsx" purpose="root component">
//! ...contents...
//! </file>
//! ```
//!
//! The parser consumes arbitrary chunk boundaries and emits events as soon
//! as they are unambiguous, holding back only enough of the tail to avoid
//! leaking a partial closing tag into the file contents.

use serde::Deserialize;

use crate::client::InferenceError;

const OPEN_PREFIX: &str = "<file ";
const CLOSE_TAG: &str = "</file>";
/// The newline separating content from the closing tag belongs to neither;
/// hold it back together with any partial tag.
const NL_CLOSE_TAG: &str = "\n</file>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileBlockEvent {
    FileStarted {
        path: String,
        purpose: String,
    },
    FileChunk {
        path: String,
        delta: String,
    },
    FileCompleted {
        path: String,
        purpose: String,
        contents: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub path: String,
    pub purpose: String,
    pub contents: String,
}

enum ParserState {
    Outside,
    InFile { path: String, purpose: String, contents: String },
}

pub struct FileBlockParser {
    buffer: String,
    state: ParserState,
    /// Text outside any file block, kept for trailing command payloads.
    residual: String,
}

impl Default for FileBlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBlockParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: ParserState::Outside,
            residual: String::new(),
        }
    }

    pub fn push(&mut self, chunk: &str) -> Vec<FileBlockEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        loop {
            match &mut self.state {
                ParserState::Outside => {
                    match self.buffer.find(OPEN_PREFIX) {
                        Some(start) => {
                            // Need the full opening tag before we can start.
                            let Some(tag_end_rel) = self.buffer[start..].find('>') else {
                                // Keep everything from the tag start onward.
                                self.residual.push_str(&self.buffer[..start]);
                                self.buffer.drain(..start);
                                break;
                            };
                            let tag_end = start + tag_end_rel;
                            let tag = self.buffer[start..=tag_end].to_string();
                            self.residual.push_str(&self.buffer[..start]);
                            self.buffer.drain(..=tag_end);
                            // Content starts after an optional newline.
                            if self.buffer.starts_with('\n') {
                                self.buffer.remove(0);
                            }
                            let path = attr_value(&tag, "path").unwrap_or_default();
                            let purpose = attr_value(&tag, "purpose").unwrap_or_default();
                            events.push(FileBlockEvent::FileStarted {
                                path: path.clone(),
                                purpose: purpose.clone(),
                            });
                            self.state = ParserState::InFile {
                                path,
                                purpose,
                                contents: String::new(),
                            };
                        }
                        None => {
                            // Hold back a potential partial opening tag.
                            let keep = partial_suffix_len(&self.buffer, OPEN_PREFIX);
                            let emit_to = self.buffer.len() - keep;
                            self.residual.push_str(&self.buffer[..emit_to]);
                            self.buffer.drain(..emit_to);
                            break;
                        }
                    }
                }
                ParserState::InFile { path, purpose, contents } => {
                    match self.buffer.find(CLOSE_TAG) {
                        Some(end) => {
                            let mut body = self.buffer[..end].to_string();
                            // The closing tag sits on its own line.
                            if body.ends_with('\n') {
                                body.pop();
                            }
                            if !body.is_empty() {
                                contents.push_str(&body);
                                events.push(FileBlockEvent::FileChunk {
                                    path: path.clone(),
                                    delta: body,
                                });
                            }
                            self.buffer.drain(..end + CLOSE_TAG.len());
                            let completed = FileBlockEvent::FileCompleted {
                                path: path.clone(),
                                purpose: purpose.clone(),
                                contents: contents.clone(),
                            };
                            events.push(completed);
                            self.state = ParserState::Outside;
                        }
                        None => {
                            // Emit all but a possible partial closing tag.
                            let keep = partial_suffix_len(&self.buffer, CLOSE_TAG)
                                .max(partial_suffix_len(&self.buffer, NL_CLOSE_TAG));
                            let emit_to = self.buffer.len() - keep;
                            if emit_to > 0 {
                                let delta = self.buffer[..emit_to].to_string();
                                contents.push_str(&delta);
                                events.push(FileBlockEvent::FileChunk {
                                    path: path.clone(),
                                    delta,
                                });
                                self.buffer.drain(..emit_to);
                            }
                            break;
                        }
                    }
                }
            }
        }
        events
    }

    /// Flush at end of stream. An unterminated file block is completed with
    /// whatever content arrived; models occasionally drop the closing tag on
    /// their final file.
    pub fn finish(mut self) -> (Vec<FileBlockEvent>, String) {
        let mut events = Vec::new();
        match self.state {
            ParserState::Outside => {
                self.residual.push_str(&self.buffer);
            }
            ParserState::InFile { path, purpose, mut contents } => {
                contents.push_str(&self.buffer);
                events.push(FileBlockEvent::FileCompleted {
                    path,
                    purpose,
                    contents,
                });
            }
        }
        (events, self.residual)
    }
}

fn attr_value(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// Length of the longest suffix of `buffer` that is a proper prefix of
/// `token`; that many bytes must be held back until the next chunk.
fn partial_suffix_len(buffer: &str, token: &str) -> usize {
    let max = token.len().saturating_sub(1).min(buffer.len());
    for len in (1..=max).rev() {
        if buffer.is_char_boundary(buffer.len() - len)
            && token.starts_with(&buffer[buffer.len() - len..])
        {
            return len;
        }
    }
    0
}

/// Extract a JSON payload from model output: either a ```json fenced block
/// or the first `{...}`/`[...]` span.
pub fn parse_json_payload<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, InferenceError> {
    let candidate = fenced_json(text)
        .or_else(|| bracketed_json(text))
        .unwrap_or_else(|| text.trim().to_string());
    serde_json::from_str(&candidate)
        .map_err(|err| InferenceError::Malformed(format!("{err}: {candidate}")))
}

fn fenced_json(text: &str) -> Option<String> {
    let start = text.find("```json").map(|i| i + "```json".len())
        .or_else(|| text.find("```").map(|i| i + 3))?;
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

fn bracketed_json(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let open = text.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let end = text.bytes().rposition(|b| b == close)?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

/// Run a full text through the parser in one go; convenience for
/// non-streaming operations.
pub fn parse_all_file_blocks(text: &str) -> (Vec<ParsedFile>, String) {
    let mut parser = FileBlockParser::new();
    let mut files = Vec::new();
    for event in parser.push(text) {
        if let FileBlockEvent::FileCompleted { path, purpose, contents } = event {
            files.push(ParsedFile { path, purpose, contents });
        }
    }
    let (events, residual) = parser.finish();
    for event in events {
        if let FileBlockEvent::FileCompleted { path, purpose, contents } = event {
            files.push(ParsedFile { path, purpose, contents });
        }
    }
    (files, residual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_block_split_across_chunks() {
        let mut parser = FileBlockParser::new();
        let mut events = Vec::new();
        let text = "<file path=\"src/App.tsx\" purpose=\"root\">\nline one\nline two\n</file>";
        for chunk in text.as_bytes().chunks(7) {
            events.extend(parser.push(std::str::from_utf8(chunk).unwrap()));
        }
        let completed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                FileBlockEvent::FileCompleted { path, contents, .. } => {
                    Some((path.clone(), contents.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            completed,
            vec![("src/App.tsx".to_string(), "line one\nline two".to_string())]
        );
        // Chunks concatenate to the final contents.
        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                FileBlockEvent::FileChunk { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, "line one\nline two");
    }

    #[test]
    fn closing_tag_never_leaks_into_chunks() {
        let mut parser = FileBlockParser::new();
        let mut chunks = String::new();
        for piece in ["<file path=\"a\" purpose=\"p\">\nbody", "</fi", "le>"] {
            for event in parser.push(piece) {
                if let FileBlockEvent::FileChunk { delta, .. } = event {
                    chunks.push_str(&delta);
                }
            }
        }
        assert_eq!(chunks, "body");
    }

    #[test]
    fn multiple_blocks_and_residual_commands() {
        let text = "<file path=\"a.ts\" purpose=\"one\">\na\n</file>\nsome text\n<file path=\"b.ts\" purpose=\"two\">\nb\n</file>\n```json\n{\"commands\": [\"bun install zod\"]}\n```";
        let (files, residual) = parse_all_file_blocks(text);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.ts");
        assert_eq!(files[1].contents, "b");
        assert!(residual.contains("commands"));
    }

    #[test]
    fn unterminated_block_completes_on_finish() {
        let mut parser = FileBlockParser::new();
        parser.push("<file path=\"a.ts\" purpose=\"p\">\npartial content");
        let (events, _) = parser.finish();
        assert!(matches!(
            &events[..],
            [FileBlockEvent::FileCompleted { contents, .. }] if contents.contains("partial content")
        ));
    }

    #[test]
    fn json_payload_parses_fenced_and_bare() {
        #[derive(Deserialize)]
        struct Payload {
            commands: Vec<String>,
        }
        let fenced: Payload =
            parse_json_payload("prose\n```json\n{\"commands\": [\"bun install\"]}\n```\n").unwrap();
        assert_eq!(fenced.commands, vec!["bun install"]);

        let bare: Payload = parse_json_payload("{\"commands\": []}").unwrap();
        assert!(bare.commands.is_empty());
    }
}
