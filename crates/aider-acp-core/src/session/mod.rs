//! Process session management.
//!
//! Drives one aider child process as a sequence of turns: a command goes in,
//! output accumulates until the idle prompt returns, and the accumulated text
//! becomes the turn result. Startup confirmation prompts are intercepted
//! before the first turn.
//!
//! # Components
//!
//! - `manager`: process lifecycle, state machine, event broadcasting
//! - `turn`: turn boundary and confirmation detection over the output stream

mod manager;
mod turn;

pub use manager::{
    AiderOptions, AiderSession, CompletedTurn, SessionError, SessionEvent, StreamSource,
    TurnTicket,
};
pub use turn::{strip_command_echo, TurnDetector, TurnSignal, GITIGNORE_CONFIRMATION, READY_PROMPT};
