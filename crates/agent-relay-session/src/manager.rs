//! Session manager: runs agent turns and relays their events.

use std::{pin::pin, sync::Arc, time::Duration};

use agent_relay_core::{
    AgentCatalog, AgentDefinition, CatalogError, ErrorKind, IsolationMode, LaunchError, LaunchSpec,
    Launcher, OutputStreams, ProtocolEvent, RelayConfig, SessionState, StreamRequest,
};
use agent_relay_executor::{EntrypointSynthesizer, SynthesisError, translate};
use futures::{StreamExt, stream::BoxStream};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    registry::{Claim, SessionRegistry},
    session::{Session, SessionResources},
};

/// Errors that abort a request before any event is streamed.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),
    #[error("Agent source unavailable: {0}")]
    SourceUnavailable(#[source] SynthesisError),
    #[error("Failed to launch agent: {0}")]
    LaunchFailed(#[from] LaunchError),
    #[error("Agent catalog error: {0}")]
    Catalog(#[source] std::io::Error),
}

impl From<CatalogError> for RelayError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(name) => Self::AgentNotFound(name),
            CatalogError::Io(e) => Self::Catalog(e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DriverSettings {
    pacing: Duration,
    drain_grace: Duration,
}

/// Session manager for agent turns.
pub struct SessionManager {
    catalog: AgentCatalog,
    synthesizer: EntrypointSynthesizer,
    launcher: Arc<dyn Launcher>,
    registry: Arc<SessionRegistry>,
    settings: DriverSettings,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: &RelayConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self::with_registry(config, launcher, Arc::new(SessionRegistry::new()))
    }

    /// Create a manager over an existing registry (shared with the reaper).
    #[must_use]
    pub fn with_registry(
        config: &RelayConfig,
        launcher: Arc<dyn Launcher>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            catalog: AgentCatalog::new(config.agents_dir.clone()),
            synthesizer: EntrypointSynthesizer::from_config(config),
            launcher,
            registry,
            settings: DriverSettings {
                pacing: config.pacing,
                drain_grace: config.drain_grace,
            },
        }
    }

    #[must_use]
    pub const fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stream one agent turn.
    ///
    /// A request for a key whose turn is still running follows that turn
    /// instead of launching again. The returned stream always ends with a
    /// completion or an error event.
    ///
    /// # Errors
    /// Returns error if the agent is unknown or the turn cannot be started.
    pub async fn stream(
        &self,
        request: StreamRequest,
    ) -> Result<BoxStream<'static, ProtocolEvent>, RelayError> {
        let agent = self.catalog.resolve(&request.agent_name).await?;
        let key = request.session_key();

        let (session, replaced) = match self.registry.get_or_create(key, agent.isolation()).await {
            Claim::Attached(session) => {
                tracing::info!(session = %session.key(), "Attaching to running turn");
                return Ok(session.subscribe());
            }
            Claim::Created { session, replaced } => (session, replaced),
        };

        if let Some(previous) = replaced {
            tracing::info!(session = %previous.key(), "Starting follow-up turn");
            previous.retire().await;
        }

        session.events().push(ProtocolEvent::debug(format!(
            "Starting agent {} with {} messages",
            agent.name,
            request.conversation.len()
        )));
        let events = session.subscribe();

        match self.start(&session, agent, &request).await {
            Ok(output) => {
                tokio::spawn(drive(
                    Arc::clone(&session),
                    output,
                    Arc::clone(&self.registry),
                    self.settings,
                ));
                Ok(events)
            }
            Err(e) => {
                tracing::error!(session = %session.key(), "Failed to start agent: {e}");
                session
                    .events()
                    .push(ProtocolEvent::error(ErrorKind::LaunchFailed, e.to_string()));
                session.events().finish();
                session.set_state(SessionState::Closed);
                self.registry.remove_session(&session).await;
                Err(e)
            }
        }
    }

    async fn start(
        &self,
        session: &Session,
        agent: AgentDefinition,
        request: &StreamRequest,
    ) -> Result<OutputStreams, RelayError> {
        let artifacts = self
            .synthesizer
            .synthesize(&agent.source_path, &request.conversation, request.max_tokens)
            .await
            .map_err(RelayError::SourceUnavailable)?;

        let unit = self
            .launcher
            .launch(LaunchSpec {
                agent,
                key: session.key().clone(),
                artifacts,
            })
            .await?;

        session
            .install(SessionResources {
                handle: unit.handle,
                artifacts: unit.artifacts,
            })
            .await;
        Ok(unit.output)
    }
}

/// Relay one turn's output into the session's event store, then settle
/// the session's resources.
async fn drive(
    session: Arc<Session>,
    output: OutputStreams,
    registry: Arc<SessionRegistry>,
    settings: DriverSettings,
) {
    session.set_state(SessionState::Streaming);
    let OutputStreams { stdout, stderr } = output;

    // Drained concurrently so a chatty stderr never blocks stdout.
    let mut collector = tokio::spawn(read_lossy(stderr));
    let stderr_text = {
        let session = Arc::clone(&session);
        async move {
            session.set_state(SessionState::Draining);
            match tokio::time::timeout(settings.drain_grace, &mut collector).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    tracing::warn!(session = %session.key(), "stderr reader failed: {e}");
                    String::new()
                }
                Err(_) => {
                    tracing::warn!(session = %session.key(), "stderr still open after output ended");
                    collector.abort();
                    String::new()
                }
            }
        }
    };

    let touch = {
        let session = Arc::clone(&session);
        move || session.touch()
    };
    let mut events = pin!(translate(stdout, stderr_text, touch));
    while let Some(event) = events.next().await {
        let paced = matches!(
            event,
            ProtocolEvent::ContentChunk { .. } | ProtocolEvent::NewMessageBoundary { .. }
        );
        session.events().push(event);
        if paced && !settings.pacing.is_zero() {
            tokio::time::sleep(settings.pacing).await;
        }
    }
    session.events().finish();
    // The turn is over; a new request starts a fresh turn from here on.
    session.set_state(match session.mode() {
        IsolationMode::Direct => SessionState::Closed,
        IsolationMode::Container => SessionState::Idle,
    });

    settle(&session, settings.drain_grace).await;
    if session.state() == SessionState::Closed {
        registry.remove_session(&session).await;
    }
}

/// Direct turns release everything; container turns keep the container.
async fn settle(session: &Session, grace: Duration) {
    let mut guard = session.resources.lock().await;
    let Some(mut resources) = guard.take() else {
        // Reclaimed by the reaper, or handed to a follow-up turn.
        session.set_state(SessionState::Closed);
        return;
    };

    match resources.handle.finish(grace).await {
        Ok(Some(status)) => tracing::info!(session = %session.key(), %status, "Agent exited"),
        Ok(None) => {}
        Err(e) => tracing::warn!(session = %session.key(), "Failed to reap agent: {e}"),
    }

    match session.mode() {
        IsolationMode::Direct => {
            if let Err(e) = resources.artifacts.release() {
                tracing::warn!(session = %session.key(), "Failed to delete temp files: {e}");
            }
        }
        IsolationMode::Container => *guard = Some(resources),
    }
}

async fn read_lossy(mut reader: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!("stderr read ended early: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
