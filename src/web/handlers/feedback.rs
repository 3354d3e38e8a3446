use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Form};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::web::error::{Ajax, HandlerErr};
use crate::web::forms::{parse_id, FeedbackRaw, FormErrors, Validate};
use crate::web::helpers::{found, form_page, page, profile_id};
use crate::web::types::{AppState, Audience, RequestContext};

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackEntry {
    pub id: i64,
    pub feedback: String,
    pub reply: String,
    pub replied_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackWithOwner {
    pub id: i64,
    pub owner: String,
    pub email: String,
    pub feedback: String,
    pub reply: String,
    pub replied_at: Option<String>,
    pub created_at: String,
}

pub fn submit_feedback(
    conn: &Connection,
    audience: Audience,
    owner_id: i64,
    feedback: &str,
) -> Result<i64, HandlerErr> {
    let table = audience.feedback_table();
    conn.execute(
        &format!(
            "INSERT INTO {}(owner_id, feedback, reply, created_at) VALUES(?, ?, '', ?)",
            table
        ),
        (owner_id, feedback, db::now_ts()),
    )
    .map_err(|e| HandlerErr::insert(e, table))?;
    let id = conn.last_insert_rowid();
    tracing::info!(table, owner_id, feedback_id = id, "feedback submitted");
    Ok(id)
}

pub fn own_feedback(
    conn: &Connection,
    audience: Audience,
    owner_id: i64,
) -> Result<Vec<FeedbackEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, feedback, reply, replied_at, created_at FROM {}
             WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
            audience.feedback_table()
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([owner_id], |r| {
        Ok(FeedbackEntry {
            id: r.get(0)?,
            feedback: r.get(1)?,
            reply: r.get(2)?,
            replied_at: r.get(3)?,
            created_at: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn all_feedback(
    conn: &Connection,
    audience: Audience,
) -> Result<Vec<FeedbackWithOwner>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT f.id, u.first_name, u.last_name, u.email, f.feedback, f.reply,
                    f.replied_at, f.created_at
             FROM {} f
             JOIN {} p ON p.id = f.owner_id
             JOIN users u ON u.id = p.user_id
             ORDER BY f.created_at DESC, f.id DESC",
            audience.feedback_table(),
            audience.profile_table()
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        Ok(FeedbackWithOwner {
            id: r.get(0)?,
            owner: format!("{} {}", first, last).trim().to_string(),
            email: r.get(3)?,
            feedback: r.get(4)?,
            reply: r.get(5)?,
            replied_at: r.get(6)?,
            created_at: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// Stores the admin's reply. Replying again overwrites the previous reply.
pub fn reply_feedback(
    conn: &Connection,
    audience: Audience,
    feedback_id: i64,
    reply: &str,
) -> Result<(), HandlerErr> {
    let table = audience.feedback_table();
    let changed = conn
        .execute(
            &format!("UPDATE {} SET reply = ?, replied_at = ? WHERE id = ?", table),
            (reply, db::now_ts(), feedback_id),
        )
        .map_err(|e| HandlerErr::update(e, table))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!(
            "feedback {} not found",
            feedback_id
        )));
    }
    tracing::info!(table, feedback_id, "feedback replied");
    Ok(())
}

fn own_page(
    conn: &Connection,
    ctx: &RequestContext,
    audience: Audience,
    errors: Option<&FormErrors>,
) -> Result<Response, HandlerErr> {
    let owner_id = profile_id(conn, audience, ctx.user.id)?;
    let name = match audience {
        Audience::Staff => "staff_feedback",
        Audience::Student => "student_feedback",
    };
    let data = json!({ "feedbacks": own_feedback(conn, audience, owner_id)? });
    Ok(match errors {
        Some(errors) => form_page(ctx, name, data, errors),
        None => page(ctx, name, data),
    })
}

fn submit(
    state: &AppState,
    ctx: &RequestContext,
    audience: Audience,
    raw: FeedbackRaw,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let feedback = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Form has errors!");
            return own_page(&conn, ctx, audience, Some(&errors));
        }
    };
    let owner_id = profile_id(&conn, audience, ctx.user.id)?;
    match submit_feedback(&conn, audience, owner_id, &feedback) {
        Ok(_) => {
            ctx.success("Feedback submitted for review");
            Ok(found(match audience {
                Audience::Staff => "/staff/feedback",
                Audience::Student => "/student/feedback",
            }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "feedback not stored");
            ctx.error("Could not Submit!");
            own_page(&conn, ctx, audience, Some(&FormErrors::default()))
        }
    }
}

pub async fn staff_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    own_page(&conn, &ctx, Audience::Staff, None)
}

pub async fn staff_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<FeedbackRaw>,
) -> Result<Response, HandlerErr> {
    submit(&state, &ctx, Audience::Staff, raw)
}

pub async fn student_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    own_page(&conn, &ctx, Audience::Student, None)
}

pub async fn student_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<FeedbackRaw>,
) -> Result<Response, HandlerErr> {
    submit(&state, &ctx, Audience::Student, raw)
}

#[derive(Debug, Deserialize)]
pub struct ReplyRaw {
    pub id: Option<String>,
    pub reply: Option<String>,
}

fn reply(state: &AppState, audience: Audience, raw: ReplyRaw) -> Ajax {
    let Some(feedback_id) = parse_id(raw.id.as_deref()) else {
        return Ajax::False;
    };
    let text = raw.reply.unwrap_or_default();
    let conn = state.conn();
    match reply_feedback(&conn, audience, feedback_id, text.trim()) {
        Ok(()) => Ajax::True,
        Err(e) => {
            tracing::warn!(error = %e, feedback_id, "feedback reply failed");
            Ajax::False
        }
    }
}

pub async fn admin_staff_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let feedbacks = all_feedback(&conn, Audience::Staff)?;
    Ok(page(&ctx, "staff_feedback_template", json!({ "feedbacks": feedbacks })))
}

pub async fn admin_staff_reply(State(state): State<AppState>, Form(raw): Form<ReplyRaw>) -> Ajax {
    reply(&state, Audience::Staff, raw)
}

pub async fn admin_student_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let feedbacks = all_feedback(&conn, Audience::Student)?;
    Ok(page(&ctx, "student_feedback_template", json!({ "feedbacks": feedbacks })))
}

pub async fn admin_student_reply(
    State(state): State<AppState>,
    Form(raw): Form<ReplyRaw>,
) -> Ajax {
    reply(&state, Audience::Student, raw)
}
