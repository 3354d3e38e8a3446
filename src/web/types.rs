use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use serde::Serialize;

use crate::auth::{self, CurrentUser, Role};
use crate::notify::PushSender;

pub type FlashStore = Arc<Mutex<HashMap<String, Vec<Flash>>>>;

#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    pub flashes: FlashStore,
    pub push: Arc<dyn PushSender>,
    pub session_ttl_hours: i64,
}

impl AppState {
    pub fn new(conn: Connection, push: Arc<dyn PushSender>, session_ttl_hours: i64) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            flashes: Arc::new(Mutex::new(HashMap::new())),
            push,
            session_ttl_hours,
        }
    }

    /// Exclusive access to the store for the duration of one request's work.
    /// A panic in another handler does not invalidate the connection, so a
    /// poisoned lock is taken over.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops queued flash messages for a session that no longer exists.
    pub fn forget_flashes(&self, session_key: &str) {
        let mut store = self.flashes.lock().unwrap_or_else(|p| p.into_inner());
        store.remove(session_key);
    }

    /// Deletes expired login sessions together with their flash messages.
    /// Returns how many sessions went away.
    pub fn purge_expired_sessions(&self) -> rusqlite::Result<usize> {
        let keys = auth::purge_expired_sessions(&self.conn())?;
        let mut store = self.flashes.lock().unwrap_or_else(|p| p.into_inner());
        for key in &keys {
            store.remove(key);
        }
        Ok(keys.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

/// Everything a handler knows about the caller. Built by the gate for every
/// authenticated request.
#[derive(Clone)]
pub struct RequestContext {
    pub user: CurrentUser,
    pub session_key: String,
    flashes: FlashStore,
}

impl RequestContext {
    pub fn new(user: CurrentUser, session_key: String, flashes: FlashStore) -> Self {
        Self {
            user,
            session_key,
            flashes,
        }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push_flash(FlashLevel::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push_flash(FlashLevel::Error, message.into());
    }

    fn push_flash(&self, level: FlashLevel, message: String) {
        let mut store = self.flashes.lock().unwrap_or_else(|p| p.into_inner());
        store
            .entry(self.session_key.clone())
            .or_default()
            .push(Flash { level, message });
    }

    /// Drains the messages queued for this session.
    pub fn take_messages(&self) -> Vec<Flash> {
        let mut store = self.flashes.lock().unwrap_or_else(|p| p.into_inner());
        store.remove(&self.session_key).unwrap_or_default()
    }
}

/// The two non-admin populations that own leave reports, feedback and
/// notifications. Each has its own tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Staff,
    Student,
}

impl Audience {
    pub fn profile_table(self) -> &'static str {
        match self {
            Audience::Staff => "staff",
            Audience::Student => "students",
        }
    }

    pub fn leave_table(self) -> &'static str {
        match self {
            Audience::Staff => "leave_reports_staff",
            Audience::Student => "leave_reports_student",
        }
    }

    pub fn feedback_table(self) -> &'static str {
        match self {
            Audience::Staff => "feedback_staff",
            Audience::Student => "feedback_student",
        }
    }

    pub fn notification_table(self) -> &'static str {
        match self {
            Audience::Staff => "notifications_staff",
            Audience::Student => "notifications_student",
        }
    }

    pub fn role(self) -> Role {
        match self {
            Audience::Staff => Role::Staff,
            Audience::Student => Role::Student,
        }
    }
}
