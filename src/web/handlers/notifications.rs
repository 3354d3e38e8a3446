use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Form};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::web::error::{Ajax, HandlerErr};
use crate::web::forms::parse_id;
use crate::web::helpers::{page, profile_id};
use crate::web::types::{AppState, Audience, RequestContext};

const PUSH_TITLE: &str = "Student Management System";

#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub course: Option<String>,
    pub has_token: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEntry {
    pub id: i64,
    pub message: String,
    pub created_at: String,
}

/// Users that can be notified, keyed by user id.
pub fn recipients(conn: &Connection, audience: Audience) -> Result<Vec<Recipient>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT u.id, u.first_name, u.last_name, u.email, c.name, u.fcm_token
             FROM {} p
             JOIN users u ON u.id = p.user_id
             LEFT JOIN courses c ON c.id = p.course_id
             ORDER BY u.last_name, u.first_name, u.id",
            audience.profile_table()
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        let token: String = r.get(5)?;
        Ok(Recipient {
            id: r.get(0)?,
            name: format!("{} {}", first, last).trim().to_string(),
            email: r.get(3)?,
            course: r.get(4)?,
            has_token: !token.is_empty(),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// The profile id that owns notifications for `user_id`, and the user's push
/// token (empty when none is on file).
pub fn push_target(
    conn: &Connection,
    audience: Audience,
    user_id: i64,
) -> Result<(i64, String), HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT p.id, u.fcm_token FROM {} p JOIN users u ON u.id = p.user_id
             WHERE p.user_id = ?",
            audience.profile_table()
        ),
        [user_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| {
        HandlerErr::not_found(format!("no {:?} profile for user {}", audience, user_id))
    })
}

pub fn store_notification(
    conn: &Connection,
    audience: Audience,
    owner_id: i64,
    message: &str,
) -> Result<i64, HandlerErr> {
    let table = audience.notification_table();
    conn.execute(
        &format!(
            "INSERT INTO {}(owner_id, message, created_at) VALUES(?, ?, ?)",
            table
        ),
        (owner_id, message, db::now_ts()),
    )
    .map_err(|e| HandlerErr::insert(e, table))?;
    let id = conn.last_insert_rowid();
    tracing::info!(table, owner_id, notification_id = id, "notification stored");
    Ok(id)
}

/// Forwards `message` to the user's device when a token is on file, then
/// stores it. A failed push stores nothing. The store lock is not held while
/// the push is in flight; delivery runs on the blocking pool.
pub async fn send_notification(
    state: &AppState,
    audience: Audience,
    user_id: i64,
    message: &str,
) -> Result<i64, HandlerErr> {
    let (owner_id, token) = {
        let conn = state.conn();
        push_target(&conn, audience, user_id)?
    };

    if token.is_empty() {
        tracing::debug!(user_id, "no push token; storing notification only");
    } else {
        let push = Arc::clone(&state.push);
        let body = message.to_string();
        tokio::task::spawn_blocking(move || push.send(&token, PUSH_TITLE, &body))
            .await
            .map_err(|e| HandlerErr::push_failed(format!("push task failed: {}", e)))?
            .map_err(|e| HandlerErr::push_failed(format!("push delivery failed: {:#}", e)))?;
    }

    let conn = state.conn();
    store_notification(&conn, audience, owner_id, message)
}

pub fn own_notifications(
    conn: &Connection,
    audience: Audience,
    owner_id: i64,
) -> Result<Vec<NotificationEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, message, created_at FROM {}
             WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
            audience.notification_table()
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([owner_id], |r| {
        Ok(NotificationEntry {
            id: r.get(0)?,
            message: r.get(1)?,
            created_at: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn set_push_token(conn: &Connection, user_id: i64, token: &str) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE users SET fcm_token = ?, updated_at = ? WHERE id = ?",
        (token, db::now_ts(), user_id),
    )
    .map_err(|e| HandlerErr::update(e, "users"))?;
    Ok(())
}

pub async fn admin_staff_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let staff = recipients(&conn, Audience::Staff)?;
    Ok(page(&ctx, "admin_notify_staff", json!({ "allStaff": staff })))
}

pub async fn admin_student_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let students = recipients(&conn, Audience::Student)?;
    Ok(page(&ctx, "admin_notify_student", json!({ "students": students })))
}

#[derive(Debug, Deserialize)]
pub struct SendRaw {
    pub id: Option<String>,
    pub message: Option<String>,
}

async fn send(state: &AppState, audience: Audience, raw: SendRaw) -> Ajax {
    let Some(user_id) = parse_id(raw.id.as_deref()) else {
        return Ajax::False;
    };
    let message = raw.message.unwrap_or_default();
    let message = message.trim();
    if message.is_empty() {
        return Ajax::False;
    }
    match send_notification(state, audience, user_id, message).await {
        Ok(_) => Ajax::True,
        Err(e) => {
            tracing::warn!(error = %e, user_id, "notification not sent");
            Ajax::False
        }
    }
}

pub async fn admin_send_staff(State(state): State<AppState>, Form(raw): Form<SendRaw>) -> Ajax {
    send(&state, Audience::Staff, raw).await
}

pub async fn admin_send_student(State(state): State<AppState>, Form(raw): Form<SendRaw>) -> Ajax {
    send(&state, Audience::Student, raw).await
}

#[derive(Debug, Deserialize)]
pub struct TokenRaw {
    pub token: Option<String>,
}

pub async fn fcmtoken(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<TokenRaw>,
) -> Ajax {
    let token = raw.token.unwrap_or_default();
    let conn = state.conn();
    match set_push_token(&conn, ctx.user.id, token.trim()) {
        Ok(()) => Ajax::True,
        Err(e) => {
            tracing::warn!(error = %e, user_id = ctx.user.id, "push token not stored");
            Ajax::False
        }
    }
}

fn own_page(state: &AppState, ctx: &RequestContext, audience: Audience) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let owner_id = profile_id(&conn, audience, ctx.user.id)?;
    let notifications = own_notifications(&conn, audience, owner_id)?;
    let name = match audience {
        Audience::Staff => "staff_view_notification",
        Audience::Student => "student_view_notification",
    };
    Ok(page(ctx, name, json!({ "notifications": notifications })))
}

pub async fn staff_view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    own_page(&state, &ctx, Audience::Staff)
}

pub async fn student_view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    own_page(&state, &ctx, Audience::Student)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::notify::PushSender;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl PushSender for Recording {
        fn send(&self, token: &str, _title: &str, body: &str) -> anyhow::Result<()> {
            anyhow::ensure!(!self.fail, "push service unavailable");
            self.sent
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push((token.to_string(), body.to_string()));
            Ok(())
        }
    }

    /// Pushes while another thread needs the store: the push only completes
    /// once the store lock has been taken elsewhere.
    struct NeedsStore {
        state: Mutex<Option<AppState>>,
    }

    impl PushSender for NeedsStore {
        fn send(&self, _token: &str, _title: &str, _body: &str) -> anyhow::Result<()> {
            let state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no state"))?;
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let conn = state.conn();
                let ok = conn
                    .query_row("SELECT COUNT(*) FROM users", [], |r| r.get::<_, i64>(0))
                    .is_ok();
                let _ = tx.send(ok);
            });
            let checked = rx
                .recv_timeout(std::time::Duration::from_secs(5))
                .map_err(|_| anyhow::anyhow!("store stayed locked during push"))?;
            anyhow::ensure!(checked, "store unavailable during push");
            Ok(())
        }
    }

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{}-{}", prefix, nanos));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn state_with(prefix: &str, push: Arc<dyn PushSender>) -> AppState {
        let conn = crate::db::open_db(&temp_dir(prefix)).expect("db");
        AppState::new(conn, push, 1)
    }

    fn staff_user(state: &AppState, token: &str) -> i64 {
        let conn = state.conn();
        let user_id = crate::auth::insert_user(
            &conn,
            &crate::auth::NewUser {
                email: "t@example.com",
                password: "pw",
                role: crate::auth::Role::Staff,
                first_name: "T",
                last_name: "Eacher",
                gender: "F",
                address: "a",
                profile_pic: "",
            },
        )
        .expect("user");
        conn.execute("INSERT INTO staff(user_id) VALUES(?)", [user_id])
            .expect("staff");
        set_push_token(&conn, user_id, token).expect("token");
        user_id
    }

    fn stored(state: &AppState, user_id: i64) -> usize {
        let conn = state.conn();
        let owner = profile_id(&conn, Audience::Staff, user_id).expect("profile");
        own_notifications(&conn, Audience::Staff, owner)
            .expect("list")
            .len()
    }

    #[tokio::test]
    async fn push_happens_before_storing() {
        let push = Arc::new(Recording::default());
        let state = state_with("studentd-notify-ok", push.clone());
        let user_id = staff_user(&state, "device-1");
        send_notification(&state, Audience::Staff, user_id, "Meeting at 3")
            .await
            .expect("send");
        let sent = push.sent.lock().expect("lock").clone();
        assert_eq!(sent, vec![("device-1".to_string(), "Meeting at 3".to_string())]);
        assert_eq!(stored(&state, user_id), 1);
    }

    #[tokio::test]
    async fn failed_push_stores_nothing() {
        let push = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let state = state_with("studentd-notify-fail", push);
        let user_id = staff_user(&state, "device-1");
        let err = send_notification(&state, Audience::Staff, user_id, "hi")
            .await
            .unwrap_err();
        assert_eq!(err.code, "push_failed");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(stored(&state, user_id), 0);
    }

    #[tokio::test]
    async fn missing_token_skips_push_but_stores() {
        let push = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let state = state_with("studentd-notify-notoken", push);
        let user_id = staff_user(&state, "");
        send_notification(&state, Audience::Staff, user_id, "hi")
            .await
            .expect("stored");
        assert_eq!(stored(&state, user_id), 1);
        assert_eq!(
            send_notification(&state, Audience::Student, user_id, "hi")
                .await
                .unwrap_err()
                .code,
            "not_found"
        );
    }

    #[tokio::test]
    async fn store_is_unlocked_while_pushing() {
        let push = Arc::new(NeedsStore {
            state: Mutex::new(None),
        });
        let state = state_with("studentd-notify-unlocked", push.clone());
        *push.state.lock().expect("lock") = Some(state.clone());
        let user_id = staff_user(&state, "device-1");
        send_notification(&state, Audience::Staff, user_id, "hi")
            .await
            .expect("push saw an unlocked store");
        assert_eq!(stored(&state, user_id), 1);
    }
}
