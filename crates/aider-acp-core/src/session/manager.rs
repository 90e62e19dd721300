//! Aider process lifecycle and turn management.
//!
//! Owns one child process per session: commands go in over stdin, raw
//! stdout/stderr chunks are broadcast as events, and the output stream is
//! scanned for the boundaries that complete a turn. Callers get a
//! [`TurnTicket`] per command that resolves when the idle prompt returns.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, warn};

use super::turn::{strip_command_echo, TurnDetector, TurnSignal};
use crate::types::SessionState;

// ========== Types ==========

/// Which pipe a data chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Events emitted by the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Raw chunk from the child, command echo already stripped
    Data { source: StreamSource, text: String },
    /// State machine transition
    StateChange {
        from: SessionState,
        to: SessionState,
    },
    /// Session is blocked on the startup confirmation question
    ConfirmationRequired(String),
    /// A turn finished; `output` is the exact accumulated turn text,
    /// trailing prompt marker included
    TurnCompleted { output: String },
    /// Stderr content worth surfacing
    StreamError(String),
    /// Child process exited
    Exited { code: Option<i32> },
}

/// Errors from session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Aider process is not running.")]
    NotRunning,
    #[error("a command is already in flight")]
    TurnInFlight,
    #[error("session ended before the turn completed")]
    Abandoned,
    #[error("interrupt is not supported on this platform")]
    InterruptUnsupported,
    #[error("failed to signal aider: {0}")]
    Signal(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Options for spawning aider
#[derive(Debug, Clone)]
pub struct AiderOptions {
    /// Binary to execute
    pub program: String,
    /// Model identifier passed as `--model`
    pub model: String,
    /// Working directory for the child process
    pub working_dir: PathBuf,
}

impl AiderOptions {
    /// Fixed argument set: line-oriented output, no side effects on
    /// version control, no browser.
    pub fn spawn_args(&self) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.model.clone(),
            "--no-pretty".to_string(),
            "--no-show-model-warnings".to_string(),
            "--no-browser".to_string(),
            "--no-auto-commits".to_string(),
            "--no-auto-test".to_string(),
            "--no-dirty-commits".to_string(),
        ]
    }
}

/// Output of a completed turn
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub output: String,
}

/// Resolves when the command that produced it completes its turn
#[derive(Debug)]
pub struct TurnTicket {
    rx: oneshot::Receiver<CompletedTurn>,
}

impl TurnTicket {
    /// Wait for the turn to complete. Fails with [`SessionError::Abandoned`]
    /// if the session dies first.
    pub async fn wait(self) -> Result<CompletedTurn, SessionError> {
        self.rx.await.map_err(|_| SessionError::Abandoned)
    }
}

// ========== Internal State ==========

/// State behind a single lock: the state machine, the turn detector, and
/// in-flight command bookkeeping always move together.
struct Machine {
    state: SessionState,
    detector: TurnDetector,
    last_command: Option<String>,
    pending_confirmation: Option<String>,
    pending_turn: Option<oneshot::Sender<CompletedTurn>>,
}

impl Machine {
    fn new() -> Self {
        Self {
            state: SessionState::Starting,
            detector: TurnDetector::new(),
            last_command: None,
            pending_confirmation: None,
            pending_turn: None,
        }
    }

    fn reset(&mut self) {
        *self = Machine::new();
    }

    /// Mark a command in flight and hand back the ticket for its turn.
    fn arm(&mut self, command: &str) -> TurnTicket {
        self.state = SessionState::Processing;
        self.detector.reset();
        self.last_command = Some(command.to_string());
        let (tx, rx) = oneshot::channel();
        self.pending_turn = Some(tx);
        TurnTicket { rx }
    }

    /// Roll back a failed [`Machine::arm`].
    fn disarm(&mut self, state: SessionState) {
        self.state = state;
        self.last_command = None;
        self.pending_turn = None;
    }
}

/// Live child process plumbing
struct ProcessHandle {
    stdin: ChildStdin,
    pid: Option<u32>,
    shutdown: Option<oneshot::Sender<()>>,
}

// ========== AiderSession ==========

/// One aider process bridged to turn-based callers.
///
/// The child is spawned by [`start`](AiderSession::start) and watched by
/// three tasks: stdout (turn detection), stderr (diagnostics), and a
/// supervisor that reaps the exit status. All observations flow out through
/// the broadcast event channel.
pub struct AiderSession {
    options: AiderOptions,
    machine: Mutex<Machine>,
    process: Mutex<Option<ProcessHandle>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl AiderSession {
    /// Create a session; nothing is spawned until [`start`](AiderSession::start).
    pub fn new(options: AiderOptions) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            options,
            machine: Mutex::new(Machine::new()),
            process: Mutex::new(None),
            event_tx,
        }
    }

    // ========== Getters ==========

    /// Current state machine position
    pub async fn state(&self) -> SessionState {
        self.machine.lock().await.state
    }

    /// Pending startup question, when blocked on one
    pub async fn pending_confirmation(&self) -> Option<String> {
        self.machine.lock().await.pending_confirmation.clone()
    }

    /// Whether a child process is alive
    pub async fn is_running(&self) -> bool {
        self.process.lock().await.is_some()
    }

    /// Child process id
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.pid)
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    // ========== Lifecycle ==========

    /// Spawn the aider process and the tasks that watch it.
    ///
    /// Idempotent: a second call while the child is alive is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }

        let args = self.options.spawn_args();
        debug!(program = %self.options.program, ?args, "Starting aider");

        let mut child = match Command::new(&self.options.program)
            .args(&args)
            .current_dir(&self.options.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = self.event_tx.send(SessionEvent::StreamError(format!(
                    "Failed to start aider: {}",
                    e
                )));
                return Err(SessionError::Spawn {
                    program: self.options.program.clone(),
                    source: e,
                });
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "failed to capture stderr"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "failed to capture stdin"))?;

        self.machine.lock().await.reset();

        let pid = child.id();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *process = Some(ProcessHandle {
            stdin,
            pid,
            shutdown: Some(shutdown_tx),
        });
        drop(process);

        debug!(?pid, "Aider spawned");

        tokio::spawn(Self::stdout_loop(Arc::clone(self), stdout));
        tokio::spawn(Self::stderr_loop(Arc::clone(self), stderr));
        tokio::spawn(Self::supervise(Arc::clone(self), child, shutdown_rx));

        Ok(())
    }

    /// Kill the child and wait for the exit event. Safe to call when no
    /// process is running.
    pub async fn stop(&self) -> Result<(), SessionError> {
        // Subscribe before touching the handle: the supervisor clears the
        // handle under the same lock before it emits Exited, so a receiver
        // obtained here cannot miss that event.
        let mut rx = self.event_tx.subscribe();

        let shutdown = {
            let mut process = self.process.lock().await;
            match process.as_mut() {
                Some(handle) => handle.shutdown.take(),
                None => return Ok(()),
            }
        };
        // A missing channel means another stop is already driving teardown;
        // fall through and wait for the exit event alongside it.
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }

        loop {
            match rx.recv().await {
                Ok(SessionEvent::Exited { .. }) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged while stopping");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        Ok(())
    }

    /// Send an interrupt signal to cancel in-flight work without ending
    /// the session.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        let pid = {
            let process = self.process.lock().await;
            process.as_ref().and_then(|p| p.pid)
        };
        let Some(pid) = pid else {
            return Err(SessionError::NotRunning);
        };
        Self::signal_interrupt(pid)
    }

    #[cfg(unix)]
    fn signal_interrupt(pid: u32) -> Result<(), SessionError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .map_err(|e| SessionError::Signal(e.to_string()))
    }

    #[cfg(not(unix))]
    fn signal_interrupt(_pid: u32) -> Result<(), SessionError> {
        Err(SessionError::InterruptUnsupported)
    }

    // ========== Commands ==========

    /// Write a command to the child and begin a turn.
    ///
    /// Fails with [`SessionError::TurnInFlight`] while a previous command is
    /// still processing; callers must await the returned ticket (or the
    /// `TurnCompleted` event) before issuing the next command.
    pub async fn send_command(&self, command: &str) -> Result<TurnTicket, SessionError> {
        if !self.is_running().await {
            let _ = self.event_tx.send(SessionEvent::StreamError(
                "Aider process is not running.".to_string(),
            ));
            return Err(SessionError::NotRunning);
        }

        let (ticket, prev) = {
            let mut machine = self.machine.lock().await;
            if machine.state == SessionState::Processing {
                return Err(SessionError::TurnInFlight);
            }
            let prev = machine.state;
            (machine.arm(command), prev)
        };
        let _ = self.event_tx.send(SessionEvent::StateChange {
            from: prev,
            to: SessionState::Processing,
        });

        if let Err(e) = self.write_line(command).await {
            warn!(?e, "Failed to write command to aider");
            self.machine.lock().await.disarm(prev);
            let _ = self.event_tx.send(SessionEvent::StateChange {
                from: SessionState::Processing,
                to: prev,
            });
            let _ = self.event_tx.send(SessionEvent::StreamError(format!(
                "Failed to write to aider: {}",
                e
            )));
            return Err(e);
        }

        debug!(command_len = command.len(), "Command sent");
        Ok(ticket)
    }

    /// Answer the startup confirmation question.
    ///
    /// Returns `Ok(None)` when the session is not waiting on one; otherwise
    /// clears the pending question and sends the answer as a command.
    pub async fn answer_confirmation(
        &self,
        answer: &str,
    ) -> Result<Option<TurnTicket>, SessionError> {
        let ticket = {
            let mut machine = self.machine.lock().await;
            if machine.state != SessionState::WaitingForConfirmation {
                return Ok(None);
            }
            machine.pending_confirmation = None;
            machine.arm(answer)
        };
        let prev = SessionState::WaitingForConfirmation;
        let _ = self.event_tx.send(SessionEvent::StateChange {
            from: prev,
            to: SessionState::Processing,
        });

        if let Err(e) = self.write_line(answer).await {
            warn!(?e, "Failed to write confirmation answer to aider");
            self.machine.lock().await.disarm(prev);
            let _ = self.event_tx.send(SessionEvent::StateChange {
                from: SessionState::Processing,
                to: prev,
            });
            let _ = self.event_tx.send(SessionEvent::StreamError(format!(
                "Failed to write to aider: {}",
                e
            )));
            return Err(e);
        }

        Ok(Some(ticket))
    }

    async fn write_line(&self, text: &str) -> Result<(), SessionError> {
        let mut process = self.process.lock().await;
        let handle = process.as_mut().ok_or(SessionError::NotRunning)?;
        handle
            .stdin
            .write_all(format!("{}\n", text).as_bytes())
            .await?;
        handle.stdin.flush().await?;
        Ok(())
    }

    // ========== Stream Tasks ==========

    async fn stdout_loop(session: Arc<Self>, mut stdout: ChildStdout) {
        let mut buf = [0u8; 8192];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                    session.handle_stdout_chunk(&chunk).await;
                }
                Err(e) => {
                    warn!(?e, "stdout read error");
                    break;
                }
            }
        }
    }

    async fn handle_stdout_chunk(&self, chunk: &str) {
        let mut events: Vec<SessionEvent> = Vec::new();
        let mut completed: Option<(oneshot::Sender<CompletedTurn>, CompletedTurn)> = None;

        {
            let mut machine = self.machine.lock().await;

            // The first chunk after a command opens with the echoed command
            // line; strip it once. A chunk that becomes empty is dropped.
            let text = match machine.last_command.take() {
                Some(command) => {
                    strip_command_echo(chunk, &command).unwrap_or_else(|| chunk.to_string())
                }
                None => chunk.to_string(),
            };

            if !text.is_empty() {
                events.push(SessionEvent::Data {
                    source: StreamSource::Stdout,
                    text: text.clone(),
                });
            }

            let armed = machine.state == SessionState::Starting;
            match machine.detector.absorb(&text, armed) {
                Some(TurnSignal::Confirmation(question)) => {
                    let from = machine.state;
                    machine.state = SessionState::WaitingForConfirmation;
                    machine.pending_confirmation = Some(question.clone());
                    events.push(SessionEvent::StateChange {
                        from,
                        to: SessionState::WaitingForConfirmation,
                    });
                    events.push(SessionEvent::ConfirmationRequired(question));
                }
                Some(TurnSignal::Turn { output }) => {
                    let from = machine.state;
                    machine.state = SessionState::Ready;
                    events.push(SessionEvent::TurnCompleted {
                        output: output.clone(),
                    });
                    events.push(SessionEvent::StateChange {
                        from,
                        to: SessionState::Ready,
                    });
                    if let Some(tx) = machine.pending_turn.take() {
                        completed = Some((tx, CompletedTurn { output }));
                    }
                }
                None => {}
            }
        }

        for event in events {
            let _ = self.event_tx.send(event);
        }
        // Resolve the ticket last so awaiting callers observe Ready.
        if let Some((tx, turn)) = completed {
            let _ = tx.send(turn);
        }
    }

    async fn stderr_loop(session: Arc<Self>, mut stderr: ChildStderr) {
        let mut buf = [0u8; 8192];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                    // Known benign diagnostic from running on a pipe.
                    if chunk.contains("Input is not a terminal") {
                        continue;
                    }
                    let _ = session.event_tx.send(SessionEvent::Data {
                        source: StreamSource::Stderr,
                        text: chunk.clone(),
                    });
                    let _ = session.event_tx.send(SessionEvent::StreamError(chunk));
                }
                Err(e) => {
                    warn!(?e, "stderr read error");
                    break;
                }
            }
        }
    }

    /// Reap the child: wait for natural exit or the stop signal, then
    /// release the handle and abandon any pending turn.
    async fn supervise(session: Arc<Self>, mut child: Child, shutdown_rx: oneshot::Receiver<()>) {
        let code = tokio::select! {
            status = child.wait() => status.ok().and_then(|s| s.code()),
            _ = shutdown_rx => {
                if let Err(e) = child.kill().await {
                    warn!(?e, "Failed to kill aider");
                }
                child.wait().await.ok().and_then(|s| s.code())
            }
        };

        *session.process.lock().await = None;

        {
            let mut machine = session.machine.lock().await;
            // Dropping the sender wakes any ticket waiter with Abandoned.
            machine.pending_turn = None;
            machine.pending_confirmation = None;
            machine.last_command = None;
            machine.detector.reset();
        }

        debug!(?code, "Aider exited");
        let _ = session.event_tx.send(SessionEvent::Exited { code });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn fake_aider(dir: &tempfile::TempDir, script: &str) -> AiderOptions {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-aider.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(script.as_bytes()).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        AiderOptions {
            program: path.to_string_lossy().to_string(),
            model: "test-model".to_string(),
            working_dir: dir.path().to_path_buf(),
        }
    }

    /// Banner then an echoing read loop, like aider on a pipe.
    const ECHO_SCRIPT: &str = "#!/bin/sh\n\
        printf 'Aider v0.86.1\\nMain model: test-model\\n> '\n\
        while IFS= read -r line; do\n\
          printf '> %s\\nack %s\\n> ' \"$line\" \"$line\"\n\
        done\n";

    async fn wait_for_state(
        rx: &mut broadcast::Receiver<SessionEvent>,
        session: &Arc<AiderSession>,
        target: SessionState,
    ) {
        if session.state().await == target {
            return;
        }
        timeout(WAIT, async {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::StateChange { to, .. }) if to == target => break,
                    Ok(_) => {}
                    Err(e) => panic!("event stream ended before {:?}: {:?}", target, e),
                }
            }
        })
        .await
        .expect("timed out waiting for state");
    }

    async fn wait_for_exit(rx: &mut broadcast::Receiver<SessionEvent>) -> Option<i32> {
        timeout(WAIT, async {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::Exited { code }) => return code,
                    Ok(_) => {}
                    Err(e) => panic!("event stream ended before exit: {:?}", e),
                }
            }
        })
        .await
        .expect("timed out waiting for exit")
    }

    #[tokio::test]
    async fn test_startup_reaches_ready() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, ECHO_SCRIPT)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        assert!(session.is_running().await);

        wait_for_state(&mut rx, &session, SessionState::Ready).await;
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, ECHO_SCRIPT)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        let pid = session.pid().await;
        session.start().await.unwrap();
        assert_eq!(session.pid().await, pid);

        wait_for_state(&mut rx, &session, SessionState::Ready).await;
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_command_turn_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, ECHO_SCRIPT)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        wait_for_state(&mut rx, &session, SessionState::Ready).await;

        let ticket = session.send_command("do it").await.unwrap();
        assert_eq!(session.state().await, SessionState::Processing);

        let turn = timeout(WAIT, ticket.wait()).await.unwrap().unwrap();
        // Echo stripped at source; the marker stays in the turn output.
        assert_eq!(turn.output, "ack do it\n> ");
        assert_eq!(session.state().await, SessionState::Ready);

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_data_events_match_turn_output() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, ECHO_SCRIPT)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        wait_for_state(&mut rx, &session, SessionState::Ready).await;

        let mut data_rx = session.subscribe();
        let ticket = session.send_command("hello").await.unwrap();
        let turn = timeout(WAIT, ticket.wait()).await.unwrap().unwrap();

        let mut streamed = String::new();
        timeout(WAIT, async {
            loop {
                match data_rx.recv().await.unwrap() {
                    SessionEvent::Data {
                        source: StreamSource::Stdout,
                        text,
                    } => streamed.push_str(&text),
                    SessionEvent::TurnCompleted { .. } => break,
                    _ => {}
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(streamed, turn.output);
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_confirmation_flow() {
        let script = "#!/bin/sh\n\
            printf 'Add .aider* to .gitignore (recommended)? (Y)es/(N)o [Yes]: '\n\
            IFS= read -r answer\n\
            printf 'Added .gitignore\\n> '\n\
            while IFS= read -r line; do printf '> %s\\nok\\n> ' \"$line\"; done\n";

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, script)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();

        let question = timeout(WAIT, async {
            loop {
                if let Ok(SessionEvent::ConfirmationRequired(q)) = rx.recv().await {
                    return q;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(question, "Add .aider* to .gitignore (recommended)?");
        assert_eq!(
            session.state().await,
            SessionState::WaitingForConfirmation
        );
        assert_eq!(session.pending_confirmation().await, Some(question));

        let ticket = session.answer_confirmation("y").await.unwrap().unwrap();
        let turn = timeout(WAIT, ticket.wait()).await.unwrap().unwrap();
        assert_eq!(turn.output, "Added .gitignore\n> ");
        assert_eq!(session.state().await, SessionState::Ready);
        assert_eq!(session.pending_confirmation().await, None);

        // Answering again is a no-op outside the waiting state.
        assert!(session.answer_confirmation("y").await.unwrap().is_none());

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_process_fails() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, ECHO_SCRIPT)));
        let mut rx = session.subscribe();

        let err = session.send_command("hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NotRunning));

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        match event {
            SessionEvent::StreamError(text) => {
                assert_eq!(text, "Aider process is not running.")
            }
            other => panic!("expected stream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_command_rejected_while_processing() {
        let script = "#!/bin/sh\n\
            printf '> '\n\
            IFS= read -r line\n\
            sleep 5\n\
            printf 'late\\n> '\n";

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, script)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        wait_for_state(&mut rx, &session, SessionState::Ready).await;

        let _ticket = session.send_command("first").await.unwrap();
        let err = session.send_command("second").await.unwrap_err();
        assert!(matches!(err, SessionError::TurnInFlight));

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_turn() {
        let script = "#!/bin/sh\n\
            printf '> '\n\
            IFS= read -r line\n\
            sleep 30\n";

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, script)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        wait_for_state(&mut rx, &session, SessionState::Ready).await;

        let ticket = session.send_command("never finishes").await.unwrap();
        session.stop().await.unwrap();

        let err = timeout(WAIT, ticket.wait()).await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Abandoned));
        assert!(!session.is_running().await);

        // stop is safe to repeat.
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_event_and_restart() {
        let script = "#!/bin/sh\nprintf '> '\nexit 0\n";

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, script)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        assert_eq!(wait_for_exit(&mut rx).await, Some(0));
        assert!(!session.is_running().await);

        // The handle was released, so a fresh start succeeds.
        session.start().await.unwrap();
        assert!(session.is_running().await);
        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_benign_stderr_suppressed() {
        let script = "#!/bin/sh\n\
            printf 'Input is not a terminal (use --no-stream).\\n' >&2\n\
            printf '> '\n\
            IFS= read -r line\n";

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, script)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();

        timeout(WAIT, async {
            loop {
                match rx.recv().await.unwrap() {
                    SessionEvent::StreamError(text) => {
                        panic!("suppressed diagnostic surfaced: {}", text)
                    }
                    SessionEvent::StateChange {
                        to: SessionState::Ready,
                        ..
                    } => break,
                    _ => {}
                }
            }
        })
        .await
        .unwrap();

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stderr_surfaced_as_stream_error() {
        let script = "#!/bin/sh\n\
            printf 'boom\\n' >&2\n\
            printf '> '\n\
            IFS= read -r line\n";

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, script)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();

        let text = timeout(WAIT, async {
            loop {
                if let Ok(SessionEvent::StreamError(text)) = rx.recv().await {
                    return text;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(text, "boom\n");

        session.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_signals_child() {
        // Block in the read builtin: a shell waiting on a foreground child
        // defers SIGINT until the child exits, which would stall this test.
        let script = "#!/bin/sh\nprintf '> '\nIFS= read -r line\n";

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, script)));
        let mut rx = session.subscribe();

        session.start().await.unwrap();
        wait_for_state(&mut rx, &session, SessionState::Ready).await;

        session.interrupt().await.unwrap();
        // Killed by signal: no exit code.
        assert_eq!(wait_for_exit(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_interrupt_without_process_fails() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(AiderSession::new(fake_aider(&dir, ECHO_SCRIPT)));

        let err = session.interrupt().await.unwrap_err();
        assert!(matches!(err, SessionError::NotRunning));
    }

    #[test]
    fn test_spawn_args() {
        let options = AiderOptions {
            program: "aider".to_string(),
            model: "gemini/gemini-2.5-flash".to_string(),
            working_dir: PathBuf::from("/tmp"),
        };

        let args = options.spawn_args();
        assert_eq!(args[0], "--model");
        assert_eq!(args[1], "gemini/gemini-2.5-flash");
        assert!(args.contains(&"--no-pretty".to_string()));
        assert!(args.contains(&"--no-auto-commits".to_string()));
        assert!(args.contains(&"--no-dirty-commits".to_string()));
    }
}
