//! Turn boundary detection over the raw output stream.
//!
//! Aider has no structured output mode, so turn completion is inferred from
//! the trailing idle prompt marker and the startup confirmation is matched
//! as an exact sentence. Heuristic by design, not a framing protocol.

use std::mem;

/// Marker aider prints when idle and awaiting the next command
pub const READY_PROMPT: &str = ">";

/// The one-time question aider asks during startup in a fresh repository
pub const GITIGNORE_CONFIRMATION: &str = "Add .aider* to .gitignore (recommended)?";

/// Boundary found while absorbing a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnSignal {
    /// The startup confirmation question appeared
    Confirmation(String),
    /// The idle prompt appeared; `output` is every chunk since the last
    /// boundary, trigger marker included
    Turn { output: String },
}

/// Accumulates raw chunks and watches for turn boundaries.
///
/// Holds two buffers: a scan buffer examined for boundary conditions, and a
/// turn buffer carrying the exact concatenation of absorbed chunks. Both are
/// cleared at every boundary so no data is double-counted across turns.
#[derive(Debug, Default)]
pub struct TurnDetector {
    scan: String,
    turn: String,
}

impl TurnDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk and check for a boundary.
    ///
    /// `confirmation_armed` is true only while the session is starting; the
    /// .gitignore question is recognized nowhere else.
    pub fn absorb(&mut self, chunk: &str, confirmation_armed: bool) -> Option<TurnSignal> {
        self.scan.push_str(chunk);
        self.turn.push_str(chunk);

        if confirmation_armed && self.scan.contains(GITIGNORE_CONFIRMATION) {
            self.scan.clear();
            self.turn.clear();
            return Some(TurnSignal::Confirmation(GITIGNORE_CONFIRMATION.to_string()));
        }

        if self.scan.trim_end().ends_with(READY_PROMPT) {
            self.scan.clear();
            return Some(TurnSignal::Turn {
                output: mem::take(&mut self.turn),
            });
        }

        None
    }

    /// Drop buffered output. Called when a new command begins a turn.
    pub fn reset(&mut self) {
        self.scan.clear();
        self.turn.clear();
    }
}

/// Strip the echoed command line from the front of a chunk.
///
/// Aider repeats the just-sent command as `> <command>` on the first output
/// line. Returns the remainder when the first line exactly reproduces the
/// echo, `None` when it does not.
pub fn strip_command_echo(chunk: &str, command: &str) -> Option<String> {
    let (first, rest) = match chunk.find('\n') {
        Some(pos) => (&chunk[..pos], &chunk[pos + 1..]),
        None => (chunk, ""),
    };
    let first = first.strip_suffix('\r').unwrap_or(first);

    if first == format!("> {}", command) {
        Some(rest.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_output_is_exact_concatenation() {
        let mut detector = TurnDetector::new();

        assert_eq!(detector.absorb("applying ", false), None);
        assert_eq!(detector.absorb("edits\npartial", false), None);
        let signal = detector.absorb("ly done\n> ", false);

        assert_eq!(
            signal,
            Some(TurnSignal::Turn {
                output: "applying edits\npartially done\n> ".to_string()
            })
        );
    }

    #[test]
    fn test_marker_mid_output_does_not_end_turn() {
        let mut detector = TurnDetector::new();
        assert_eq!(detector.absorb("a > b\n", false), None);
        assert!(detector.absorb("> ", false).is_some());
    }

    #[test]
    fn test_confirmation_split_across_chunks() {
        let mut detector = TurnDetector::new();

        assert_eq!(detector.absorb("Add .aider* to .gitignore", true), None);
        let signal = detector.absorb(" (recommended)? (Y)es/(N)o [Yes]: ", true);

        assert_eq!(
            signal,
            Some(TurnSignal::Confirmation(GITIGNORE_CONFIRMATION.to_string()))
        );

        // Both buffers cleared: the question is not part of any turn.
        let signal = detector.absorb("done\n> ", false);
        assert_eq!(
            signal,
            Some(TurnSignal::Turn {
                output: "done\n> ".to_string()
            })
        );
    }

    #[test]
    fn test_confirmation_only_recognized_while_armed() {
        let mut detector = TurnDetector::new();

        let text = "Add .aider* to .gitignore (recommended)?";
        assert_eq!(detector.absorb(text, false), None);

        // Unarmed, the sentence rides along in the turn output instead.
        let signal = detector.absorb("\n> ", false);
        match signal {
            Some(TurnSignal::Turn { output }) => {
                assert!(output.contains(text));
            }
            other => panic!("expected turn, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_clears_buffers() {
        let mut detector = TurnDetector::new();
        detector.absorb("half a turn", false);
        detector.reset();

        let signal = detector.absorb("fresh\n> ", false);
        assert_eq!(
            signal,
            Some(TurnSignal::Turn {
                output: "fresh\n> ".to_string()
            })
        );
    }

    #[test]
    fn test_strip_command_echo() {
        assert_eq!(
            strip_command_echo("> add a test\nWorking on it\n", "add a test"),
            Some("Working on it\n".to_string())
        );
        assert_eq!(
            strip_command_echo("> add a test\r\nWorking\n", "add a test"),
            Some("Working\n".to_string())
        );
        // Echo-only chunk strips to nothing.
        assert_eq!(strip_command_echo("> hi", "hi"), Some(String::new()));
        // Non-echo first lines pass through untouched.
        assert_eq!(strip_command_echo("Working on it\n", "add a test"), None);
        assert_eq!(strip_command_echo("> different\nx\n", "add a test"), None);
    }
}
