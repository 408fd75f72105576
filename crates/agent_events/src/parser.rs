//! Streaming, bounded-memory parser for mixed JSONL + noise output.
//!
//! Feed arbitrary byte chunks; the parser frames on LF, skips anything that
//! cannot be JSON without attempting a decode, classifies the backend flavor
//! on the first recognizable event, and accumulates the normalized
//! `(message, session_id)` view up to a fixed cap.

use serde_json::Value;
use thiserror::Error;

use crate::extract;
use crate::flavor::{classify_event, BackendFlavor};
use crate::progress::{infer_progress, ProgressUpdate};

/// Hard ceiling on accumulated message bytes. Fragments past the cap are
/// dropped; event processing (session id, progress) continues.
pub const MESSAGE_CAP_BYTES: usize = 10 * 1024 * 1024;

/// Raised only when the underlying stream fails irrecoverably. Individual
/// undecodable lines never surface here.
#[derive(Debug, Error)]
#[error("event stream aborted: {source}")]
pub struct ParseAborted {
    #[source]
    pub source: std::io::Error,
}

/// The normalized output of parsing one stream to EOF.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ParsedStream {
    pub message: String,
    pub session_id: String,
    pub flavor: BackendFlavor,
    /// Whether the backend emitted its own completion marker before EOF.
    pub completed: bool,
    /// Whether message fragments were dropped at the cap.
    pub truncated: bool,
}

type ProgressFn = Box<dyn FnMut(&ProgressUpdate) + Send>;

#[derive(Default)]
pub struct StreamParser {
    flavor: Option<BackendFlavor>,
    session_id: String,
    message: String,
    saturated: bool,
    completed: bool,
    pending: Vec<u8>,
    on_progress: Option<ProgressFn>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked once per decoded event after the flavor
    /// is known.
    pub fn on_progress(mut self, callback: impl FnMut(&ProgressUpdate) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// The flavor latched so far, if any event has classified.
    pub fn flavor(&self) -> BackendFlavor {
        self.flavor.unwrap_or_default()
    }

    /// Consumes one chunk of raw stdout bytes. Chunk boundaries are
    /// arbitrary; incomplete trailing lines are buffered.
    pub fn feed(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(newline);
            if self.pending.is_empty() {
                self.process_line(head);
            } else {
                self.pending.extend_from_slice(head);
                let line = std::mem::take(&mut self.pending);
                self.process_line(&line);
            }
            rest = &tail[1..];
        }
        self.pending.extend_from_slice(rest);
    }

    /// Flushes the trailing unterminated fragment, if any. Call at EOF.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.process_line(&line);
        }
    }

    pub fn into_parsed(self) -> ParsedStream {
        ParsedStream {
            message: self.message,
            session_id: self.session_id,
            flavor: self.flavor.unwrap_or_default(),
            completed: self.completed,
            truncated: self.saturated,
        }
    }

    fn process_line(&mut self, line: &[u8]) {
        // Fast filter: a line that does not start (modulo whitespace) with an
        // object or array opener cannot be an event; skip without decoding.
        let Some(start) = line.iter().position(|b| !b.is_ascii_whitespace()) else {
            return;
        };
        if line[start] != b'{' && line[start] != b'[' {
            return;
        }

        let Ok(event) = serde_json::from_slice::<Value>(&line[start..]) else {
            return;
        };
        self.handle_event(&event);
    }

    fn handle_event(&mut self, event: &Value) {
        let flavor = match self.flavor {
            Some(flavor) => flavor,
            None => {
                let classified = classify_event(event);
                if classified != BackendFlavor::Unknown {
                    self.flavor = Some(classified);
                }
                classified
            }
        };

        if self.session_id.is_empty() {
            if let Some(id) = extract::session_id(event, flavor) {
                self.session_id = id;
            }
        }

        if let Some(fragment) = extract::message_fragment(event, flavor) {
            self.append_fragment(&fragment);
        }

        if extract::is_completion(event, flavor) {
            self.completed = true;
        }

        if self.flavor.is_some() {
            if let Some(update) = infer_progress(event, flavor) {
                if let Some(callback) = self.on_progress.as_mut() {
                    callback(&update);
                }
            }
        }
    }

    fn append_fragment(&mut self, fragment: &str) {
        if self.saturated {
            return;
        }
        if self.message.len() + fragment.len() > MESSAGE_CAP_BYTES {
            self.saturated = true;
            return;
        }
        self.message.push_str(fragment);
    }
}

impl std::fmt::Debug for StreamParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamParser")
            .field("flavor", &self.flavor)
            .field("session_id", &self.session_id)
            .field("message_bytes", &self.message.len())
            .field("saturated", &self.saturated)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(feature = "tokio")]
mod drive {
    use tokio::io::{AsyncRead, AsyncReadExt};

    use super::{ParseAborted, StreamParser};

    /// Drives a [`StreamParser`] over an async reader until EOF.
    ///
    /// The trailing fragment is flushed on both success and abort, so
    /// whatever was parsed before a stream failure remains usable.
    pub async fn parse_stream<R>(
        mut reader: R,
        parser: &mut StreamParser,
    ) -> Result<(), ParseAborted>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => parser.feed(&chunk[..n]),
                Err(source) => {
                    parser.finish();
                    return Err(ParseAborted { source });
                }
            }
        }
        parser.finish();
        Ok(())
    }
}

#[cfg(feature = "tokio")]
pub use drive::parse_stream;

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &str) -> ParsedStream {
        let mut parser = StreamParser::new();
        parser.feed(input.as_bytes());
        parser.finish();
        parser.into_parsed()
    }

    #[test]
    fn noise_and_blank_lines_are_skipped_without_decode() {
        let parsed = parse_all("\n \nnpm WARN deprecated\n{\"result\":\"ok\"}\n");
        assert_eq!(parsed.message, "ok");
        assert_eq!(parsed.flavor, BackendFlavor::Claude);
    }

    #[test]
    fn tiny_whitespace_lines_are_skipped() {
        for line in ["", " ", "  "] {
            let parsed = parse_all(&format!("{line}\n"));
            assert_eq!(parsed.message, "");
            assert_eq!(parsed.flavor, BackendFlavor::Unknown);
        }
    }

    #[test]
    fn bad_json_is_swallowed_and_parsing_continues() {
        let parsed = parse_all("{not json\n{\"result\":\"later\"}\n");
        assert_eq!(parsed.message, "later");
    }

    #[test]
    fn chunk_boundaries_do_not_split_events() {
        let mut parser = StreamParser::new();
        let line = b"{\"thread_id\":\"t1\",\"item\":{\"type\":\"message\",\"content\":\"split\"}}\n";
        for byte in line.iter() {
            parser.feed(std::slice::from_ref(byte));
        }
        parser.finish();
        let parsed = parser.into_parsed();
        assert_eq!(parsed.message, "split");
        assert_eq!(parsed.session_id, "t1");
    }

    #[test]
    fn final_unterminated_fragment_is_processed_at_eof() {
        let parsed = parse_all("{\"result\":\"no newline\"}");
        assert_eq!(parsed.message, "no newline");
    }

    #[test]
    fn flavor_latches_on_first_classifiable_event() {
        // First event is unclassifiable; second latches Codex; a later
        // Claude-shaped event is still read as Codex.
        let parsed = parse_all(concat!(
            "{\"noise\":true}\n",
            "{\"thread_id\":\"t1\"}\n",
            "{\"result\":\"claude-shaped\",\"item\":{\"content\":\"codex-read\"}}\n",
        ));
        assert_eq!(parsed.flavor, BackendFlavor::Codex);
        assert_eq!(parsed.message, "codex-read");
        assert_eq!(parsed.session_id, "t1");
    }

    #[test]
    fn first_session_id_is_sticky() {
        let parsed = parse_all(concat!(
            "{\"thread_id\":\"first\"}\n",
            "{\"thread_id\":\"second\"}\n",
        ));
        assert_eq!(parsed.session_id, "first");
    }

    #[test]
    fn message_cap_drops_fragment_and_all_later_ones() {
        let mut parser = StreamParser::new();
        let big = "x".repeat(MESSAGE_CAP_BYTES - 10);
        parser.feed(format!("{{\"result\":\"{big}\"}}\n").as_bytes());
        // Would exceed the cap: dropped, and everything after it too.
        parser.feed(b"{\"content\":\"abcdefghijklmnop\"}\n");
        parser.feed(b"{\"content\":\"tiny\"}\n");
        // Session id extraction still runs past saturation.
        parser.feed(b"{\"session_id\":\"late\"}\n");
        parser.finish();
        let parsed = parser.into_parsed();
        assert_eq!(parsed.message.len(), MESSAGE_CAP_BYTES - 10);
        assert!(parsed.truncated);
        assert_eq!(parsed.session_id, "late");
    }

    #[test]
    fn progress_callback_fires_only_after_flavor_known() {
        let updates = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = updates.clone();
        let mut parser = StreamParser::new().on_progress(move |update| {
            sink.lock().unwrap().push(update.clone());
        });
        // Unclassifiable event first: no progress.
        parser.feed(b"{\"content\":\"x\"}\n");
        parser.feed(b"{\"subtype\":\"tool_use\",\"name\":\"bash\"}\n");
        parser.finish();
        let seen = updates.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tool.as_deref(), Some("bash"));
    }

    #[test]
    fn completion_marker_does_not_stop_parsing() {
        let parsed = parse_all(concat!(
            "{\"thread_id\":\"t\",\"type\":\"completed\"}\n",
            "{\"item\":{\"content\":\"after\"}}\n",
        ));
        assert!(parsed.completed);
        assert_eq!(parsed.message, "after");
    }

    #[test]
    fn empty_stream_yields_defaults() {
        let parsed = parse_all("");
        assert_eq!(parsed.message, "");
        assert_eq!(parsed.session_id, "");
        assert_eq!(parsed.flavor, BackendFlavor::Unknown);
        assert!(!parsed.completed);
    }
}
