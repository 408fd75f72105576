#![forbid(unsafe_code)]
//! Backend-agnostic ingestion of AI agent CLI JSONL output.
//!
//! The four supported backends (Codex, Claude, Gemini, Opencode) each speak
//! their own line-delimited JSON dialect, interleaved with arbitrary non-JSON
//! noise. This crate provides:
//! - A bounded-memory, chunk-fed [`StreamParser`] that frames lines, skips
//!   noise without decoding, and normalizes events into a
//!   [`ParsedStream`] (`message`, `session_id`, flavor).
//! - Shape-based flavor classification ([`classify_event`]), latched on the
//!   first recognizable event of a stream.
//! - Progress-stage inference ([`infer_progress`]) for live UI.
//!
//! Events stay `serde_json::Value`; extraction is best-effort through small
//! accessor helpers rather than a rigid typed schema.

mod extract;
mod flavor;
mod parser;
mod progress;

pub use extract::{is_completion, message_fragment, session_id};
pub use flavor::{classify_event, BackendFlavor};
pub use parser::{ParseAborted, ParsedStream, StreamParser, MESSAGE_CAP_BYTES};
pub use progress::{infer_progress, ProgressStage, ProgressUpdate};

#[cfg(feature = "tokio")]
pub use parser::parse_stream;
