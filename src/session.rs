//! Authenticated sessions.
//!
//! Sessions live in process memory, keyed by a random identifier carried in
//! the `session` cookie. They expire a fixed lifetime after login.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::http::{HeaderMap, header};
use chrono::{DateTime, TimeDelta, Utc};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

use crate::clock::Clock;

pub const COOKIE_NAME: &str = "session";
const SESSION_ID_LENGTH: usize = 48;

/// Per-request session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub login: Option<String>,
    pub login_time: Option<DateTime<Utc>>,
}

impl Session {
    /// Mark `login` as authenticated since `at`.
    pub fn establish(&mut self, login: &str, at: DateTime<Utc>) {
        self.login = Some(login.to_owned());
        self.login_time = Some(at);
    }

    pub fn is_authenticated(&self) -> bool {
        self.login.is_some()
    }
}

/// Session resolved from the request cookie.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession {
    pub id: Option<String>,
    pub session: Option<Session>,
}

/// In-process session storage.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    lifetime: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// Create a new [`SessionStore`] whose sessions last `lifetime`.
    pub fn new(lifetime: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Arc::default(),
            lifetime: TimeDelta::from_std(lifetime).unwrap_or(TimeDelta::MAX),
            clock,
        }
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session
            .login_time
            .is_none_or(|at| now - at >= self.lifetime)
    }

    /// Store `session` under a fresh identifier, dropping expired ones.
    pub fn save(&self, session: Session) -> String {
        let now = self.clock.now();
        let id = Alphanumeric.sample_string(&mut OsRng, SESSION_ID_LENGTH);

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, stored| !self.is_expired(stored, now));
        if sessions.len() < before {
            tracing::debug!(purged = before - sessions.len(), "expired sessions dropped");
        }
        sessions.insert(id.clone(), session);

        id
    }

    /// Live session stored under `id`.
    pub fn get(&self, id: &str) -> Option<Session> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()?;

        if self.is_expired(&session, self.clock.now()) {
            self.remove(id);
            return None;
        }
        Some(session)
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session identifier from the `Cookie` header.
pub fn cookie_value(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value carrying `id`.
pub fn session_cookie(id: &str) -> String {
    format!("{COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax")
}

/// `Set-Cookie` value dropping the session cookie.
pub fn expired_cookie() -> String {
    format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
