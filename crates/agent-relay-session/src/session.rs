//! A single session: one caller identity talking to one agent.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use agent_relay_core::{
    EventStore, ExecutionHandle, IsolationMode, ProtocolEvent, SessionKey, SessionState,
    TempArtifacts,
};
use futures::stream::BoxStream;

/// Everything a session must release when it ends.
pub struct SessionResources {
    pub handle: ExecutionHandle,
    pub artifacts: TempArtifacts,
}

/// Outcome of a teardown attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Resources released; `clean` is false if any step failed.
    Released { clean: bool },
    /// Nothing left to release.
    AlreadyReleased,
    /// Someone else holds the resources right now.
    Busy,
}

/// Session record shared by the registry, the stream driver and the reaper.
///
/// The resources lock is the claim: whoever holds it owns the handle and
/// temp files until they release it.
pub struct Session {
    key: SessionKey,
    mode: IsolationMode,
    started_at: Instant,
    last_activity: Mutex<Instant>,
    state: Mutex<SessionState>,
    pub(crate) resources: tokio::sync::Mutex<Option<SessionResources>>,
    events: Arc<EventStore>,
}

impl Session {
    #[must_use]
    pub fn new(key: SessionKey, mode: IsolationMode) -> Self {
        let now = Instant::now();
        Self {
            key,
            mode,
            started_at: now,
            last_activity: Mutex::new(now),
            state: Mutex::new(SessionState::Starting),
            resources: tokio::sync::Mutex::new(None),
            events: Arc::new(EventStore::new()),
        }
    }

    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub const fn mode(&self) -> IsolationMode {
        self.mode
    }

    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    /// Record activity (an output line was observed).
    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: SessionState) {
        let mut current = lock(&self.state);
        if *current != state {
            tracing::debug!(session = %self.key, from = ?*current, to = ?state, "Session state change");
            *current = state;
        }
    }

    #[must_use]
    pub const fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// Events of the current turn: history first, then live.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, ProtocolEvent> {
        self.events.subscribe()
    }

    /// Hand launched resources to the session.
    pub async fn install(&self, resources: SessionResources) {
        *self.resources.lock().await = Some(resources);
    }

    /// Release resources unless another task holds them.
    ///
    /// Safe to call any number of times; only the first successful claim
    /// releases anything.
    pub async fn try_teardown(&self) -> Teardown {
        let Ok(mut guard) = self.resources.try_lock() else {
            return Teardown::Busy;
        };
        let Some(mut resources) = guard.take() else {
            return Teardown::AlreadyReleased;
        };
        if !self.state().is_turn_active() {
            self.set_state(SessionState::Closed);
        }

        let mut clean = true;
        if let Err(e) = resources.handle.terminate().await {
            tracing::warn!(session = %self.key, "Failed to stop execution unit: {e}");
            clean = false;
        }
        if let Err(e) = resources.artifacts.release() {
            tracing::warn!(session = %self.key, "Failed to delete temp files: {e}");
            clean = false;
        }
        Teardown::Released { clean }
    }

    /// Give up a finished session that a new turn is replacing.
    ///
    /// Waits for any in-progress teardown. Temp files are deleted; a kept
    /// container is left for the next launch to replace by name.
    pub async fn retire(&self) {
        let mut guard = self.resources.lock().await;
        if let Some(mut resources) = guard.take() {
            if let ExecutionHandle::Container(container) = &mut resources.handle {
                container.detach().await;
            } else if let Err(e) = resources.handle.terminate().await {
                tracing::warn!(session = %self.key, "Failed to stop replaced process: {e}");
            }
            if let Err(e) = resources.artifacts.release() {
                tracing::warn!(session = %self.key, "Failed to delete temp files: {e}");
            }
        }
        self.set_state(SessionState::Closed);
        self.events.finish();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
