//! Output classification for aider's text stream.
//!
//! # Components
//! - [`Classifier`]: streaming line classifier (metadata, prompts, fences, message text)
//! - [`EditScanner`]: search/replace edit envelope extraction

mod classifier;
mod edits;

pub use classifier::{classify, format_info, Classifier};
pub use edits::{EditScanner, ScanOutcome};
