//! Streaming classifier for aider output.
//!
//! Splits the raw text stream into structured records: labeled metadata from
//! the startup banner, warning/error lines, interactive prompt lines, fenced
//! code blocks (captured verbatim), search/replace edits, and whatever is
//! left as plain message text. Chunks may split lines, fences, and edit
//! envelopes at arbitrary byte positions; state carries across [`push`]
//! calls until [`finish`] flushes the turn.
//!
//! [`push`]: Classifier::push
//! [`finish`]: Classifier::finish

use once_cell::sync::Lazy;
use regex::Regex;

use super::edits::EditScanner;
use crate::types::{AiderInfo, CodeBlock, OutputRecord};

// ========== Patterns ==========

/// Version banner (e.g., "Aider v0.86.1")
static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Aider (v[0-9.]+\S*)").unwrap());

static MAIN_MODEL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Main model: (.+)").unwrap());

static WEAK_MODEL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Weak model: (.+)").unwrap());

static GIT_REPO_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Git repo: (.+)").unwrap());

static REPO_MAP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Repo-map: (.+)").unwrap());

static TOKENS_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Tokens: (.+)").unwrap());

static COST_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"Cost: (.+)").unwrap());

/// Label-shaped line (e.g., "Model info: ..."); dropped before the first
/// message line so banner variants never leak into message text.
static GENERIC_LABEL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z\s]+:").unwrap());

// ========== Classifier ==========

/// Streaming text-to-records transducer.
///
/// One instance per turn stream. [`Classifier::push`] classifies every
/// complete line in the chunk and returns a record of what it produced;
/// [`Classifier::finish`] flushes the trailing partial line and any
/// abandoned edit envelope, then resets for the next turn.
pub struct Classifier {
    pending: String,
    in_fence: bool,
    block: Option<CodeBlock>,
    scanner: EditScanner,
    message_started: bool,
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            in_fence: false,
            block: None,
            scanner: EditScanner::new(),
            message_started: false,
        }
    }

    /// Classify every complete line in `chunk`.
    pub fn push(&mut self, chunk: &str) -> OutputRecord {
        let mut rec = OutputRecord::default();
        self.pending.push_str(chunk);
        self.drain_lines(&mut rec);
        rec
    }

    /// Flush the turn: process the trailing partial line, hand abandoned
    /// edit-envelope lines back to the message, and drop any unterminated
    /// fence block. The classifier is ready for the next turn afterwards.
    pub fn finish(&mut self) -> OutputRecord {
        let mut rec = OutputRecord::default();
        self.finish_into(&mut rec);
        rec
    }

    /// Discard all buffered state.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.in_fence = false;
        self.block = None;
        self.scanner = EditScanner::new();
        self.message_started = false;
    }

    fn finish_into(&mut self, rec: &mut OutputRecord) {
        self.drain_lines(rec);
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.process_line(&line, rec);
        }
        let released = self.scanner.finish();
        for held in released {
            self.append_message(rec, &held);
        }
        self.in_fence = false;
        self.block = None;
        self.message_started = false;
    }

    fn drain_lines(&mut self, rec: &mut OutputRecord) {
        while let Some(pos) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=pos).collect();
            line.pop();
            self.process_line(&line, rec);
        }
    }

    /// Per-line policy, first match wins: fence boundary, in-fence capture,
    /// edit envelope, labeled metadata, prompt, warning, error, message.
    fn process_line(&mut self, line: &str, rec: &mut OutputRecord) {
        if line.starts_with("```") {
            for held in self.scanner.fence_boundary() {
                self.append_message(rec, &held);
            }
            if self.in_fence {
                if let Some(mut block) = self.block.take() {
                    block.content.push_str(line);
                    block.content.push('\n');
                    rec.code_blocks.push(block);
                }
                self.in_fence = false;
            } else {
                let label = line[3..].trim();
                self.scanner.observe(label);
                self.block = Some(CodeBlock {
                    path: label.to_string(),
                    content: format!("{}\n", line),
                });
                self.in_fence = true;
            }
            return;
        }

        if self.in_fence {
            if let Some(block) = self.block.as_mut() {
                block.content.push_str(line);
                block.content.push('\n');
            }
            let outcome = self.scanner.push(line, true);
            if let Some(block) = outcome.block {
                rec.edit_blocks.push(block);
            }
            return;
        }

        let outcome = self.scanner.push(line, false);
        for held in outcome.released {
            self.append_message(rec, &held);
        }
        if let Some(block) = outcome.block {
            rec.edit_blocks.push(block);
        }
        if outcome.consumed {
            return;
        }

        let trimmed = line.trim();

        if let Some(caps) = VERSION_PATTERN.captures(trimmed) {
            rec.info.version = Some(caps[1].to_string());
            return;
        }
        if let Some(caps) = MAIN_MODEL_PATTERN.captures(trimmed) {
            rec.info.main_model = Some(caps[1].to_string());
            return;
        }
        if let Some(caps) = WEAK_MODEL_PATTERN.captures(trimmed) {
            rec.info.weak_model = Some(caps[1].to_string());
            return;
        }
        if let Some(caps) = GIT_REPO_PATTERN.captures(trimmed) {
            rec.info.git_repo = Some(caps[1].to_string());
            return;
        }
        if let Some(caps) = REPO_MAP_PATTERN.captures(trimmed) {
            rec.info.repo_map = Some(caps[1].to_string());
            return;
        }
        if let Some(caps) = TOKENS_PATTERN.captures(trimmed) {
            rec.info.chat_tokens = Some(caps[1].to_string());
            return;
        }
        if let Some(caps) = COST_PATTERN.captures(trimmed) {
            rec.info.cost = Some(caps[1].to_string());
            return;
        }

        if is_prompt_line(trimmed) {
            rec.prompts.push(trimmed.to_string());
            return;
        }

        if trimmed.starts_with("Warning:") || trimmed.contains("warning") {
            rec.info.warnings.push(trimmed.to_string());
            return;
        }
        if trimmed.starts_with("Error:") || trimmed.contains("error") {
            rec.info.errors.push(trimmed.to_string());
            return;
        }

        if trimmed.is_empty() {
            return;
        }
        if !self.message_started && GENERIC_LABEL_PATTERN.is_match(trimmed) {
            return;
        }
        self.append_message(rec, line);
    }

    fn append_message(&mut self, rec: &mut OutputRecord, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.message_started = true;
        if !rec.message.is_empty() {
            rec.message.push_str("\n\n");
        }
        rec.message.push_str(line);
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify one complete block of text in a single pass.
pub fn classify(text: &str) -> OutputRecord {
    let mut classifier = Classifier::new();
    let mut rec = classifier.push(text);
    classifier.finish_into(&mut rec);
    rec
}

/// Interactive prompt heuristic: aider's confirm questions offer
/// (Y)es/(N)o choices or end with a bracketed default.
fn is_prompt_line(line: &str) -> bool {
    line.contains("(Y)es/(N)o") || line.ends_with("[Yes]:") || line.ends_with("[No]:")
}

/// Render captured metadata as a markdown block. Empty input produces an
/// empty string; otherwise the block carries a trailing blank line.
pub fn format_info(info: &AiderInfo) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(ref version) = info.version {
        parts.push(format!("🚀 **Aider**: {}", version));
    }
    if let Some(ref main_model) = info.main_model {
        parts.push(format!("🤖 **Main Model**: {}", main_model));
    }
    if let Some(ref weak_model) = info.weak_model {
        parts.push(format!("🤖 **Weak Model**: {}", weak_model));
    }
    if let Some(ref git_repo) = info.git_repo {
        parts.push(format!("📁 **Repo**: {}", git_repo));
    }
    if let Some(ref repo_map) = info.repo_map {
        parts.push(format!("🗺️ **Repo-map**: {}", repo_map));
    }
    if let Some(ref chat_tokens) = info.chat_tokens {
        parts.push(format!("💬 **Tokens**: {}", chat_tokens));
    }
    if let Some(ref cost) = info.cost {
        parts.push(format!("💰 **Cost**: {}", cost));
    }
    for warning in &info.warnings {
        parts.push(format!("⚠️ {}", warning));
    }
    for error in &info.errors {
        parts.push(format!("❌ {}", error));
    }

    if parts.is_empty() {
        return String::new();
    }

    let joined = parts
        .iter()
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n\n", joined)
}
