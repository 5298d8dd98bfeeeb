//! Expiring in-memory access tokens.

use std::{collections::HashMap, sync::Mutex};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Login credentials accepted by the relay.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "user".to_string(),
            password: "password".to_string(),
        }
    }
}

impl Credentials {
    #[must_use]
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}

struct TokenEntry {
    username: String,
    expires: DateTime<Utc>,
}

/// Issued tokens and their expiry.
pub struct TokenStore {
    ttl: Duration,
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl TokenStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TokenEntry>> {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Issue a fresh token for `username`.
    pub fn issue(&self, username: &str) -> (String, DateTime<Utc>) {
        let token = Uuid::new_v4().simple().to_string();
        let expires = Utc::now() + self.ttl;
        self.lock().insert(
            token.clone(),
            TokenEntry {
                username: username.to_string(),
                expires,
            },
        );
        (token, expires)
    }

    /// Username behind a live token. Expired tokens are dropped.
    #[must_use]
    pub fn validate(&self, token: &str) -> Option<String> {
        self.validate_at(token, Utc::now())
    }

    fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let mut tokens = self.lock();
        match tokens.get(token) {
            Some(entry) if entry.expires > now => Some(entry.username.clone()),
            Some(_) => {
                tokens.remove(token);
                None
            }
            None => None,
        }
    }

    /// Drop every expired token; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, entry| entry.expires > now);
        before - tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let store = TokenStore::new(Duration::hours(24));
        let (token, expires) = store.issue("user");
        assert_eq!(token.len(), 32);
        assert!(expires > Utc::now() + Duration::hours(23));
        assert_eq!(store.validate(&token).as_deref(), Some("user"));
        assert_eq!(store.validate("forged"), None);
    }

    #[test]
    fn test_expired_token_rejected_and_dropped() {
        let store = TokenStore::new(Duration::hours(1));
        let (token, _) = store.issue("user");
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(store.validate_at(&token, later), None);
        assert_eq!(store.validate(&token), None);
    }

    #[test]
    fn test_purge() {
        let store = TokenStore::new(Duration::seconds(-1));
        store.issue("a");
        store.issue("b");
        assert_eq!(store.purge_expired(), 2);
    }

    #[test]
    fn test_default_credentials() {
        let creds = Credentials::default();
        assert!(creds.matches("user", "password"));
        assert!(!creds.matches("user", "wrong"));
    }
}
