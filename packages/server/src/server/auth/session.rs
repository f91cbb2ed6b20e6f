//! In-memory bearer-token sessions for the admin dashboard.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

/// Session token (random UUID)
pub type SessionToken = String;

/// Session data stored after a successful login.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory session store.
///
/// Sessions expire after 24 hours and do not survive a restart; admins log
/// in again after a deploy.
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionToken, Session>>>,
}

const SESSION_TTL_HOURS: i64 = 24;

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new session and return the token.
    pub async fn create_session(&self, user_id: i64, username: &str) -> SessionToken {
        let token = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            token.clone(),
            Session {
                user_id,
                username: username.to_string(),
                created_at: chrono::Utc::now(),
            },
        );
        token
    }

    /// Get session by token, None when unknown or expired.
    pub async fn get_session(&self, token: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(token)?;

        let elapsed = chrono::Utc::now().signed_duration_since(session.created_at);
        if elapsed.num_hours() >= SESSION_TTL_HOURS {
            return None;
        }

        Some(session.clone())
    }

    /// Delete session (logout).
    pub async fn delete_session(&self, token: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token);
    }

    /// Clean up expired sessions (run periodically).
    pub async fn cleanup_expired(&self) {
        let mut sessions = self.sessions.write().await;
        let now = chrono::Utc::now();

        sessions.retain(|_, session| {
            now.signed_duration_since(session.created_at).num_hours() < SESSION_TTL_HOURS
        });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_creation() {
        let store = SessionStore::new();
        let token = store.create_session(1, "admin").await;
        assert!(!token.is_empty());

        let session = store.get_session(&token).await;
        assert!(session.is_some());
        assert_eq!(session.unwrap().username, "admin");
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let store = SessionStore::new();
        assert!(store.get_session("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_session_expiration() {
        let store = SessionStore::new();
        let token = store.create_session(1, "admin").await;

        {
            let mut sessions = store.sessions.write().await;
            let session = sessions.get_mut(&token).unwrap();
            session.created_at = chrono::Utc::now() - chrono::Duration::hours(25);
        }

        assert!(
            store.get_session(&token).await.is_none(),
            "expired session should return None"
        );
    }

    #[tokio::test]
    async fn test_logout_deletes_session() {
        let store = SessionStore::new();
        let token = store.create_session(1, "admin").await;
        store.delete_session(&token).await;
        assert!(store.get_session(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let store = SessionStore::new();
        let stale = store.create_session(1, "old").await;
        {
            let mut sessions = store.sessions.write().await;
            sessions.get_mut(&stale).unwrap().created_at =
                chrono::Utc::now() - chrono::Duration::hours(48);
        }
        let fresh = store.create_session(2, "new").await;

        store.cleanup_expired().await;

        assert!(store.sessions.read().await.get(&stale).is_none());
        assert!(store.sessions.read().await.get(&fresh).is_some());
    }
}
