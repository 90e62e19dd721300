//! Formatting of classified aider output into displayable message text.
//!
//! The classifier keeps everything; this module decides what a protocol
//! client should actually see. Prompt echoes, raw edit markers, and
//! bare filename labels are display noise and get dropped here.

use aider_acp_core::CodeBlock;

/// Filter a classified plain message for display.
///
/// `last_prompt` is the most recent prompt text; a line repeating it
/// verbatim is treated as an echo artifact and dropped.
pub fn filter_message(message: &str, last_prompt: Option<&str>) -> String {
    message
        .split('\n')
        .filter_map(|line| filter_line(line, last_prompt))
        .collect::<Vec<_>>()
        .join("\n")
}

fn filter_line(line: &str, last_prompt: Option<&str>) -> Option<String> {
    // Command echoes; edit markers also start with '>' so spare those.
    if line.starts_with("> ") && !line.contains(">>>") && !line.contains("<<<") {
        return None;
    }
    // Fence and edit-envelope fragments are rendered through their own
    // channels, never as plain message text.
    if line.starts_with("```")
        || line.contains("<<<<<<< SEARCH")
        || line.contains(">>>>>>> REPLACE")
        || line.contains("=======")
    {
        return None;
    }
    // Progress-bar noise.
    if line.contains("Scanning repo:") {
        return None;
    }
    if line.starts_with("Added ") {
        return Some(format!("📁 {}", line));
    }
    if line.contains("is already in the chat") {
        return Some(format!("⚠️ {}", line));
    }
    if last_prompt.is_some_and(|prompt| line == prompt) {
        return None;
    }
    if is_bare_filename(line) {
        return None;
    }
    Some(line.to_string())
}

/// Heuristic for lines that are only a filename label (aider prints the
/// target path on its own line before an edit). A dotted word counts only
/// when the final segment looks like a file extension; version numbers
/// ("1.2.3") and dotted identifiers ("e.g.") stay in the message.
fn is_bare_filename(line: &str) -> bool {
    let candidate = line.trim();
    if candidate.is_empty() || candidate.contains(':') || candidate.contains(' ') {
        return false;
    }
    let Some((_, ext)) = candidate.rsplit_once('.') else {
        return false;
    };
    (1..=8).contains(&ext.len())
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && ext.chars().any(|c| c.is_ascii_alphabetic())
}

/// Notice for the startup confirmation question.
pub fn confirmation_notice(question: &str) -> String {
    format!("\n**Aider requires input:**\n{}", question)
}

/// Notice for an interactive prompt line found in turn output.
pub fn prompt_notice(line: &str) -> String {
    format!("**Aider requires input:**\n{}", line)
}

/// Notice for a stream error event. Returns `None` for progress-bar noise;
/// known benign diagnostics downgrade to a warning.
pub fn stream_error_notice(text: &str) -> Option<String> {
    if text.contains("Scanning repo:") {
        return None;
    }
    if text.contains("leaked semaphore objects") {
        return Some(format!("\n**Warning:**\n{}", text));
    }
    Some(format!("\n**Error:**\n{}", text))
}

/// Notice for process termination.
pub fn exit_notice(code: Option<i32>) -> String {
    let code = match code {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    };
    format!(
        "\n**Aider process terminated:** Aider process exited with code {}",
        code
    )
}

/// Re-wrap a captured code block in a fence labeled with its path.
pub fn code_block_chunk(block: &CodeBlock) -> String {
    format!("```{}\n{}\n```", block.path, block.content)
}
