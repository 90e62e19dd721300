//! Core library for bridging aider's interactive CLI to a turn-based API.
//!
//! Aider is a terminal program: it prints a banner, waits at a `>` prompt,
//! and streams mixed human-oriented text while it works. This crate wraps
//! that loop so callers see discrete turns instead of a raw byte stream.
//!
//! # Components
//!
//! - `session`: spawns and supervises the aider process, detects turn
//!   boundaries, and broadcasts session events
//! - `output`: classifies raw output into structured records (metadata,
//!   message prose, code blocks, prompts, edit blocks)
//! - `types`: shared data types for session state and classified output

pub mod output;
pub mod session;
pub mod types;

pub use output::{classify, format_info, Classifier, EditScanner};
pub use session::{
    AiderOptions, AiderSession, CompletedTurn, SessionError, SessionEvent, StreamSource,
    TurnDetector, TurnSignal, TurnTicket,
};
pub use types::{AiderInfo, CodeBlock, EditBlock, OutputRecord, SessionState};
