//! Search/replace edit envelope extraction.
//!
//! Aider proposes file edits as a three-marker envelope embedded in its
//! conversational output:
//!
//! ```text
//! foo.py
//! <<<<<<< SEARCH
//! old lines
//! =======
//! new lines
//! >>>>>>> REPLACE
//! ```
//!
//! Lines are held while an envelope is open. A complete envelope becomes an
//! [`EditBlock`]; an abandoned one hands its held lines back so the caller can
//! treat them as ordinary message text. Envelopes never span fence boundaries.

use crate::types::EditBlock;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Result of feeding one line to the scanner
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Line was absorbed into an open envelope
    pub consumed: bool,
    /// Held lines handed back after an envelope was abandoned
    pub released: Vec<String>,
    /// Completed edit
    pub block: Option<EditBlock>,
}

/// Lines held while a candidate envelope is open
struct Hold {
    in_fence: bool,
    raw: Vec<String>,
    search: Vec<String>,
    replace: Option<Vec<String>>,
}

impl Hold {
    fn new(in_fence: bool, opener: &str) -> Self {
        Self {
            in_fence,
            raw: vec![opener.to_string()],
            search: Vec::new(),
            replace: None,
        }
    }
}

/// Line-oriented scanner for edit envelopes.
///
/// The path of a completed edit is the nearest preceding path-shaped line or
/// fence label; a language label like `python` never overrides it.
pub struct EditScanner {
    path_context: Option<String>,
    hold: Option<Hold>,
}

impl EditScanner {
    pub fn new() -> Self {
        Self {
            path_context: None,
            hold: None,
        }
    }

    /// Record `candidate` as path context when it names a file.
    pub fn observe(&mut self, candidate: &str) {
        if path_like(candidate) {
            self.path_context = Some(candidate.to_string());
        }
    }

    /// Feed one line. `in_fence` marks lines inside a fenced code block;
    /// held lines from inside a fence are never released back (the fence
    /// already keeps them verbatim).
    pub fn push(&mut self, line: &str, in_fence: bool) -> ScanOutcome {
        let trimmed = line.trim();
        let mut outcome = ScanOutcome::default();

        let Some(mut hold) = self.hold.take() else {
            if trimmed == SEARCH_MARKER {
                self.hold = Some(Hold::new(in_fence, line));
                outcome.consumed = true;
            } else {
                self.observe(trimmed);
            }
            return outcome;
        };

        outcome.consumed = true;

        if trimmed == SEARCH_MARKER {
            // A second opener restarts the envelope; the held lines never
            // formed a complete edit.
            if !hold.in_fence {
                outcome.released = hold.raw;
            }
            self.hold = Some(Hold::new(in_fence, line));
            return outcome;
        }

        if trimmed == REPLACE_MARKER {
            match hold.replace {
                Some(replace) => {
                    outcome.block = Some(EditBlock {
                        path: self.path_context.clone().unwrap_or_default(),
                        search: hold.search.join("\n"),
                        replace: replace.join("\n"),
                    });
                }
                None => {
                    // Closer without a divider is not an edit.
                    if !hold.in_fence {
                        hold.raw.push(line.to_string());
                        outcome.released = hold.raw;
                    }
                }
            }
            return outcome;
        }

        if trimmed == DIVIDER && hold.replace.is_none() {
            hold.raw.push(line.to_string());
            hold.replace = Some(Vec::new());
            self.hold = Some(hold);
            return outcome;
        }

        hold.raw.push(line.to_string());
        match hold.replace.as_mut() {
            Some(replace) => replace.push(line.to_string()),
            None => hold.search.push(line.to_string()),
        }
        self.hold = Some(hold);
        outcome
    }

    /// Abandon any open envelope at a fence boundary.
    pub fn fence_boundary(&mut self) -> Vec<String> {
        self.abandon()
    }

    /// Flush at end of input: abandon any open envelope and drop the
    /// path context.
    pub fn finish(&mut self) -> Vec<String> {
        let released = self.abandon();
        self.path_context = None;
        released
    }

    fn abandon(&mut self) -> Vec<String> {
        match self.hold.take() {
            Some(hold) if !hold.in_fence => hold.raw,
            _ => Vec::new(),
        }
    }
}

impl Default for EditScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// A line that plausibly names a file: no whitespace, no colon, and at least
/// one dot or path separator.
fn path_like(line: &str) -> bool {
    !line.is_empty()
        && !line.contains(char::is_whitespace)
        && !line.contains(':')
        && (line.contains('.') || line.contains('/'))
}
