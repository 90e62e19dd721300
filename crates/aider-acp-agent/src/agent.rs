//! ACP agent implementation backed by aider sessions.
//!
//! Each protocol session owns one aider process. Prompt requests become
//! aider commands; session events stream back as agent message chunks and
//! tool calls. The agent runs on a single-threaded task set, so session
//! bookkeeping lives in `Rc<RefCell<..>>`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use agent_client_protocol::{
    Agent, AgentCapabilities, AgentSideConnection, AuthenticateRequest, AuthenticateResponse,
    CancelNotification, Client, ContentBlock, Diff, EmbeddedResourceResource, Error,
    Implementation, InitializeRequest, InitializeResponse, LoadSessionRequest,
    LoadSessionResponse, McpCapabilities, NewSessionRequest, NewSessionResponse,
    PromptCapabilities, PromptRequest, PromptResponse, SessionId, SessionNotification,
    SessionUpdate, SetSessionModeRequest, SetSessionModeResponse, SetSessionModelRequest,
    SetSessionModelResponse, StopReason, TextContent, ToolCall, ToolCallContent, ToolCallId,
    ToolCallStatus, ToolKind, V1,
};
use chrono::{DateTime, Utc};
use once_cell::unsync::OnceCell;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use aider_acp_core::{
    classify, format_info, AiderOptions, AiderSession, Classifier, EditBlock, OutputRecord,
    SessionError, SessionEvent, StreamSource,
};

use crate::render;
use crate::AgentConfig;

// ========== Session Table ==========

/// One live session: the aider process plus bridge-side bookkeeping.
struct SessionEntry {
    session: Arc<AiderSession>,
    created: DateTime<Utc>,
    model: String,
    working_dir: PathBuf,
    /// Most recent prompt text, used to filter echo artifacts from output.
    last_prompt: RefCell<Option<String>>,
}

type SessionTable = Rc<RefCell<HashMap<SessionId, Rc<SessionEntry>>>>;

// ========== Agent ==========

/// The aider implementation of the ACP `Agent` trait.
pub struct AiderAgent {
    config: AgentConfig,
    sessions: SessionTable,
    connection: OnceCell<Rc<AgentSideConnection>>,
}

impl AiderAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            sessions: Rc::default(),
            connection: OnceCell::new(),
        }
    }

    /// Attach the protocol connection used for session notifications.
    /// The connection only exists after the agent is constructed, so this
    /// is a separate step from `new`.
    pub fn attach_connection(&self, connection: Rc<AgentSideConnection>) {
        if self.connection.set(connection).is_err() {
            warn!("Protocol connection already attached");
        }
    }

    fn entry(&self, session_id: &SessionId) -> Result<Rc<SessionEntry>, Error> {
        self.sessions
            .borrow()
            .get(session_id)
            .cloned()
            .ok_or_else(Error::invalid_request)
    }
}

#[async_trait::async_trait(?Send)]
impl Agent for AiderAgent {
    async fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, Error> {
        debug!(protocol_version = ?request.protocol_version, "Received initialize request");

        Ok(InitializeResponse {
            protocol_version: V1,
            agent_capabilities: AgentCapabilities {
                load_session: false,
                prompt_capabilities: PromptCapabilities {
                    image: false,
                    audio: false,
                    embedded_context: true,
                    meta: None,
                },
                mcp_capabilities: McpCapabilities {
                    http: false,
                    sse: false,
                    meta: None,
                },
                meta: None,
            },
            agent_info: Some(Implementation {
                name: "aider-acp".into(),
                title: Some("Aider ACP".into()),
                version: env!("CARGO_PKG_VERSION").into(),
            }),
            auth_methods: vec![],
            meta: None,
        })
    }

    async fn authenticate(
        &self,
        _request: AuthenticateRequest,
    ) -> Result<AuthenticateResponse, Error> {
        Err(Error::invalid_request().with_data("Authentication not implemented."))
    }

    async fn new_session(&self, request: NewSessionRequest) -> Result<NewSessionResponse, Error> {
        let working_dir = if request.cwd.as_os_str().is_empty() {
            std::env::current_dir().map_err(Error::into_internal_error)?
        } else {
            request.cwd.clone()
        };

        let session_id = SessionId(
            format!(
                "sess_{}_{}",
                Utc::now().timestamp_millis(),
                &Uuid::new_v4().simple().to_string()[..8]
            )
            .into(),
        );

        let session = Arc::new(AiderSession::new(AiderOptions {
            program: self.config.program.clone(),
            model: self.config.model.clone(),
            working_dir: working_dir.clone(),
        }));
        let entry = Rc::new(SessionEntry {
            session: Arc::clone(&session),
            created: Utc::now(),
            model: self.config.model.clone(),
            working_dir,
            last_prompt: RefCell::new(None),
        });

        // Subscribe before start so no startup event is missed.
        let events = session.subscribe();
        match self.connection.get() {
            Some(connection) => {
                tokio::task::spawn_local(pump_events(
                    Rc::clone(connection),
                    Rc::clone(&self.sessions),
                    Rc::clone(&entry),
                    session_id.clone(),
                    events,
                ));
            }
            None => warn!("No protocol connection attached, session events will be dropped"),
        }

        if let Err(e) = session.start().await {
            warn!(?e, "Failed to start aider");
        }

        info!(
            session_id = %session_id,
            model = %entry.model,
            working_dir = %entry.working_dir.display(),
            "Created session"
        );
        self.sessions
            .borrow_mut()
            .insert(session_id.clone(), entry);

        Ok(NewSessionResponse {
            session_id,
            modes: None,
            models: None,
            meta: None,
        })
    }

    async fn load_session(
        &self,
        _request: LoadSessionRequest,
    ) -> Result<LoadSessionResponse, Error> {
        Err(Error::method_not_found())
    }

    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse, Error> {
        let entry = self.entry(&request.session_id)?;

        if !entry.session.is_running().await {
            return Err(Error::invalid_request().with_data("Aider process is not running."));
        }

        let prompt_text = inline_text(&request.prompt);
        if !prompt_text.is_empty() {
            *entry.last_prompt.borrow_mut() = Some(prompt_text.clone());
        }

        // The startup confirmation swallows the whole prompt as its answer.
        if let Some(ticket) = entry
            .session
            .answer_confirmation(&prompt_text)
            .await
            .map_err(to_protocol_error)?
        {
            let stop_reason = match ticket.wait().await {
                Ok(_) => StopReason::EndTurn,
                Err(_) => StopReason::Cancelled,
            };
            return Ok(PromptResponse {
                stop_reason,
                meta: None,
            });
        }

        // File resources join the working set first, one turn per file.
        for path in resource_paths(&request.prompt) {
            let ticket = entry
                .session
                .send_command(&format!("/add {}", path))
                .await
                .map_err(to_protocol_error)?;
            if ticket.wait().await.is_err() {
                return Ok(PromptResponse {
                    stop_reason: StopReason::Cancelled,
                    meta: None,
                });
            }
        }

        if prompt_text.is_empty() {
            return Ok(PromptResponse {
                stop_reason: StopReason::EndTurn,
                meta: None,
            });
        }

        let ticket = entry
            .session
            .send_command(&prompt_text)
            .await
            .map_err(to_protocol_error)?;
        let stop_reason = match ticket.wait().await {
            Ok(_) => StopReason::EndTurn,
            Err(_) => StopReason::Cancelled,
        };
        Ok(PromptResponse {
            stop_reason,
            meta: None,
        })
    }

    async fn cancel(&self, args: CancelNotification) -> Result<(), Error> {
        let Ok(entry) = self.entry(&args.session_id) else {
            return Ok(());
        };
        if let Err(e) = entry.session.interrupt().await {
            warn!(?e, "Interrupt failed, stopping aider");
            if let Err(e) = entry.session.stop().await {
                warn!(?e, "Failed to stop aider");
            }
        }
        Ok(())
    }

    async fn set_session_mode(
        &self,
        _args: SetSessionModeRequest,
    ) -> Result<SetSessionModeResponse, Error> {
        Err(Error::method_not_found())
    }

    async fn set_session_model(
        &self,
        _args: SetSessionModelRequest,
    ) -> Result<SetSessionModelResponse, Error> {
        Err(Error::method_not_found())
    }
}

// ========== Prompt Content ==========

/// Concatenate inline text items: trim each, drop empties, join with a space.
fn inline_text(prompt: &[ContentBlock]) -> String {
    prompt
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text(text) => {
                let trimmed = text.text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filesystem paths of referenced file resources, `file://` prefix stripped.
fn resource_paths(prompt: &[ContentBlock]) -> Vec<String> {
    prompt
        .iter()
        .filter_map(|block| {
            let uri = match block {
                ContentBlock::Resource(resource) => match &resource.resource {
                    EmbeddedResourceResource::TextResourceContents(text) => text.uri.clone(),
                    EmbeddedResourceResource::BlobResourceContents(blob) => blob.uri.clone(),
                },
                ContentBlock::ResourceLink(link) => link.uri.clone(),
                _ => return None,
            };
            Some(uri.strip_prefix("file://").unwrap_or(&uri).to_string())
        })
        .collect()
}

fn to_protocol_error(e: SessionError) -> Error {
    match e {
        SessionError::NotRunning | SessionError::TurnInFlight => {
            Error::invalid_request().with_data(e.to_string())
        }
        other => Error::into_internal_error(other),
    }
}

// ========== Event Pump ==========

/// Forward session events to the client as session updates.
///
/// Runs until the process exits or the event channel closes. Stdout chunks
/// feed a stateful classifier so fences and partial lines survive chunk
/// boundaries; stderr chunks are classified standalone to keep them from
/// corrupting stdout fence state.
async fn pump_events(
    connection: Rc<AgentSideConnection>,
    sessions: SessionTable,
    entry: Rc<SessionEntry>,
    session_id: SessionId,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    let mut classifier = Classifier::new();
    let mut edit_seq: u64 = 0;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let sent = match event {
            SessionEvent::Data {
                source: StreamSource::Stdout,
                text,
            } => {
                let record = classifier.push(&text);
                let last_prompt = entry.last_prompt.borrow().clone();
                render_record(
                    &connection,
                    &session_id,
                    &record,
                    last_prompt.as_deref(),
                    &mut edit_seq,
                )
                .await
            }
            SessionEvent::Data {
                source: StreamSource::Stderr,
                text,
            } => {
                let record = classify(&text);
                let last_prompt = entry.last_prompt.borrow().clone();
                render_record(
                    &connection,
                    &session_id,
                    &record,
                    last_prompt.as_deref(),
                    &mut edit_seq,
                )
                .await
            }
            SessionEvent::ConfirmationRequired(question) => {
                // The question text is still sitting in the classifier as a
                // partial line; drop it so only the notice reaches the client.
                classifier.reset();
                send_chunk(&connection, &session_id, render::confirmation_notice(&question)).await
            }
            SessionEvent::TurnCompleted { output } => {
                debug!(output_len = output.len(), "Turn completed");
                let record = classifier.finish();
                let last_prompt = entry.last_prompt.borrow().clone();
                render_record(
                    &connection,
                    &session_id,
                    &record,
                    last_prompt.as_deref(),
                    &mut edit_seq,
                )
                .await
            }
            SessionEvent::StreamError(text) => match render::stream_error_notice(&text) {
                Some(notice) => send_chunk(&connection, &session_id, notice).await,
                None => Ok(()),
            },
            SessionEvent::Exited { code } => {
                let _ = send_chunk(&connection, &session_id, render::exit_notice(code)).await;
                sessions.borrow_mut().remove(&session_id);
                info!(
                    session_id = %session_id,
                    uptime_secs = (Utc::now() - entry.created).num_seconds(),
                    "Session ended"
                );
                break;
            }
            SessionEvent::StateChange { from, to } => {
                debug!(?from, ?to, "Session state changed");
                Ok(())
            }
        };

        if let Err(e) = sent {
            warn!(?e, "Failed to send session update, stopping event pump");
            break;
        }
    }
}

/// Send one classified record as protocol updates, in display order:
/// metadata block, interactive prompts, plain message, edit tool calls,
/// code blocks.
async fn render_record(
    connection: &AgentSideConnection,
    session_id: &SessionId,
    record: &OutputRecord,
    last_prompt: Option<&str>,
    edit_seq: &mut u64,
) -> Result<(), Error> {
    let info = format_info(&record.info);
    if !info.trim().is_empty() {
        send_chunk(connection, session_id, info).await?;
    }

    for line in &record.prompts {
        send_chunk(connection, session_id, render::prompt_notice(line)).await?;
    }

    let message = render::filter_message(&record.message, last_prompt);
    if !message.trim().is_empty() {
        send_chunk(connection, session_id, message).await?;
    }

    for block in &record.edit_blocks {
        let id = format!("edit_{}", *edit_seq);
        *edit_seq += 1;
        connection
            .session_notification(SessionNotification {
                session_id: session_id.clone(),
                update: SessionUpdate::ToolCall(ToolCall {
                    id: ToolCallId(id.into()),
                    title: format!("Editing {}", block.path),
                    kind: ToolKind::Edit,
                    status: ToolCallStatus::Completed,
                    content: vec![edit_diff(block)],
                    locations: vec![],
                    raw_input: serde_json::to_value(block).ok(),
                    raw_output: None,
                    meta: None,
                }),
                meta: None,
            })
            .await?;
    }

    for block in &record.code_blocks {
        send_chunk(connection, session_id, render::code_block_chunk(block)).await?;
    }

    Ok(())
}

/// One edit block maps to one diff unit; fragments pass through verbatim.
fn edit_diff(block: &EditBlock) -> ToolCallContent {
    ToolCallContent::Diff {
        diff: Diff {
            path: PathBuf::from(&block.path),
            old_text: if block.search.is_empty() {
                None
            } else {
                Some(block.search.clone())
            },
            new_text: block.replace.clone(),
            meta: None,
        },
    }
}

async fn send_chunk(
    connection: &AgentSideConnection,
    session_id: &SessionId,
    text: String,
) -> Result<(), Error> {
    connection
        .session_notification(SessionNotification {
            session_id: session_id.clone(),
            update: SessionUpdate::AgentMessageChunk {
                content: ContentBlock::Text(TextContent {
                    annotations: None,
                    text,
                    meta: None,
                }),
            },
            meta: None,
        })
        .await
}
