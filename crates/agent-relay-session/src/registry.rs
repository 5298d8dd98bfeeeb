//! Process-wide table of sessions.

use std::{collections::HashMap, sync::Arc};

use agent_relay_core::{IsolationMode, SessionKey};
use tokio::sync::RwLock;

use crate::session::Session;

/// Result of [`SessionRegistry::get_or_create`].
pub enum Claim {
    /// A turn is in flight for this key; follow its events.
    Attached(Arc<Session>),
    /// The caller must start a turn on `session`.
    Created {
        session: Arc<Session>,
        /// Finished session that used to hold the key.
        replaced: Option<Arc<Session>>,
    },
}

/// At most one session per key.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the live session under `key`, or atomically create one.
    ///
    /// A session whose turn has ended (idle or closed) is replaced.
    pub async fn get_or_create(&self, key: SessionKey, mode: IsolationMode) -> Claim {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&key) {
            if existing.state().is_turn_active() {
                return Claim::Attached(Arc::clone(existing));
            }
        }

        let session = Arc::new(Session::new(key.clone(), mode));
        let replaced = sessions.insert(key, Arc::clone(&session));
        Claim::Created { session, replaced }
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(key)
    }

    /// Remove `session` if it still holds its key.
    ///
    /// Returns false when the entry is gone or belongs to a newer session.
    pub async fn remove_session(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(session.key()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.key());
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of all sessions; later inserts and removals do
    /// not affect it.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
