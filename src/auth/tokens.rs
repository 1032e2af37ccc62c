//! Token storage and management

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stored access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<u64>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| now_secs() + secs);
        Self { token, expires_at }
    }

    /// Tokens without a known expiry are never considered expired locally;
    /// the backend's 401 is the authority for those.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Consider expired if less than 5 minutes remaining
            Some(exp) => now_secs() + 300 >= exp,
            None => false,
        }
    }
}

/// Everything persisted for a logged-in user. Cleared as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub refresh_token: Option<String>,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    /// Serialized user object from the login response
    pub user: Option<String>,
    /// Serialized tenant object from the login response
    pub tenant: Option<String>,
    pub access_token: Option<StoredToken>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        *self == Session::default()
    }
}

/// Token store trait for different storage backends.
///
/// Implementations use interior mutability: one store is shared by every
/// in-flight request of a client.
pub trait TokenStore: Send + Sync {
    /// Snapshot of the current session.
    fn session(&self) -> Session;

    /// Apply `apply` to the session and persist the result.
    fn update_session(&self, apply: &mut dyn FnMut(&mut Session)) -> Result<()>;

    fn get_access_token(&self) -> Option<StoredToken> {
        self.session().access_token
    }

    /// Remove every session key in one write.
    fn clear_tokens(&self) -> Result<()> {
        self.update_session(&mut |s| *s = Session::default())
    }
}

/// Process-local store. Used by tests and by callers that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: Mutex<Session>,
}

impl MemoryTokenStore {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn session(&self) -> Session {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_session(&self, apply: &mut dyn FnMut(&mut Session)) -> Result<()> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut session);
        Ok(())
    }
}
