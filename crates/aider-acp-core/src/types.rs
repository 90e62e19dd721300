//! Core types for the aider bridge.

use serde::{Deserialize, Serialize};

// ============ Session State ============

/// Session state machine.
///
/// `WaitingForConfirmation` is only entered from `Starting`, when aider asks
/// its one-time .gitignore question before the first prompt appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Process spawned, startup banner still streaming
    Starting,
    /// Blocked on the startup confirmation question
    WaitingForConfirmation,
    /// A command is in flight
    Processing,
    /// Idle prompt is visible, ready for the next command
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::WaitingForConfirmation => "waiting_for_confirmation",
            SessionState::Processing => "processing",
            SessionState::Ready => "ready",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(SessionState::Starting),
            "waiting_for_confirmation" => Some(SessionState::WaitingForConfirmation),
            "processing" => Some(SessionState::Processing),
            "ready" => Some(SessionState::Ready),
            _ => None,
        }
    }
}

// ============ Classified Output ============

/// Metadata scraped from aider's banner and status lines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiderInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weak_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_map: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_tokens: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl AiderInfo {
    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.main_model.is_none()
            && self.weak_model.is_none()
            && self.git_repo.is_none()
            && self.repo_map.is_none()
            && self.chat_tokens.is_none()
            && self.cost.is_none()
            && self.warnings.is_empty()
            && self.errors.is_empty()
    }
}

/// Fenced code block captured verbatim, fence lines included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlock {
    /// Text after the opening fence, trimmed; may be empty
    pub path: String,
    pub content: String,
}

/// Proposed search/replace edit to one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditBlock {
    pub path: String,
    pub search: String,
    pub replace: String,
}

/// Result of classifying one flush of aider output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    #[serde(default, skip_serializing_if = "AiderInfo::is_empty")]
    pub info: AiderInfo,
    /// Plain conversational text, non-empty lines joined with blank lines
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_blocks: Vec<CodeBlock>,
    /// Interactive yes/no prompt lines that surfaced mid-turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_blocks: Vec<EditBlock>,
}
