//! Password login and cookie sessions for the admin panel

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

pub const SESSION_COOKIE: &str = "admin_session";
const SESSION_TTL_HOURS: i64 = 24;
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct AdminSession {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AdminSession {
    /// Create a new session with 24-hour expiry
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl Default for AdminSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps session tokens to session data
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, AdminSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session` under a fresh random token and return the token
    pub async fn create_session(&self, session: AdminSession) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.sessions.write().await.insert(token.clone(), session);
        token
    }

    /// None if unknown or expired
    pub async fn get_session(&self, token: &str) -> Option<AdminSession> {
        let sessions = self.sessions.read().await;
        sessions.get(token).filter(|s| !s.is_expired()).cloned()
    }

    pub async fn remove_session(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    /// Drop expired sessions, returning how many were removed
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        before - sessions.len()
    }

    #[cfg(test)]
    pub async fn insert_raw(&self, token: &str, session: AdminSession) {
        self.sessions.write().await.insert(token.to_string(), session);
    }
}

pub type SharedSessionStore = Arc<SessionStore>;

pub fn create_session_store() -> SharedSessionStore {
    Arc::new(SessionStore::new())
}

/// Periodically sweep expired sessions for the life of the process
pub fn spawn_session_cleanup(store: SharedSessionStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = store.cleanup_expired().await;
            if removed > 0 {
                debug!("Removed {} expired admin sessions", removed);
            }
        }
    })
}

/// Compare without short-circuiting on the first differing byte
pub fn password_matches(expected: &str, submitted: &str) -> bool {
    let (a, b) = (expected.as_bytes(), submitted.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extract session token from cookies
pub fn get_session_token(headers: &HeaderMap) -> Option<String> {
    let prefix = format!("{}=", SESSION_COOKIE);
    headers
        .get(axum::http::header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix(prefix.as_str()))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

pub fn create_session_cookie(token: &str, secure: bool) -> String {
    format!(
        "{}={}; Path=/admin; HttpOnly; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE,
        token,
        SESSION_TTL_HOURS * 3600,
        if secure { "; Secure" } else { "" }
    )
}

/// Clears the session cookie
pub fn create_logout_cookie() -> String {
    format!(
        "{}=; Path=/admin; HttpOnly; SameSite=Lax; Max-Age=0",
        SESSION_COOKIE
    )
}
