/*!
Leave applications.

A leave report starts pending and can be decided exactly once, either
approved or rejected. Both audiences share this logic against their own
tables.
*/
use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Form};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::web::error::{Ajax, HandlerErr};
use crate::web::forms::{parse_id, FormErrors, LeaveForm, LeaveRaw, Validate};
use crate::web::helpers::{found, form_page, page, profile_id, require};
use crate::web::types::{AppState, Audience, RequestContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

impl LeaveStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            LeaveStatus::Pending => 0,
            LeaveStatus::Approved => 1,
            LeaveStatus::Rejected => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(LeaveStatus::Pending),
            1 => Some(LeaveStatus::Approved),
            2 => Some(LeaveStatus::Rejected),
            _ => None,
        }
    }

    /// Reads the decision posted by the admin page. `-1` is the legacy
    /// spelling of "reject".
    pub fn parse_decision(s: &str) -> Option<Self> {
        match s.trim() {
            "1" => Some(LeaveStatus::Approved),
            "2" | "-1" => Some(LeaveStatus::Rejected),
            _ => None,
        }
    }

    /// Pending may move to approved or rejected. Decided reports are final.
    pub fn can_transition_to(self, next: LeaveStatus) -> bool {
        matches!(
            (self, next),
            (LeaveStatus::Pending, LeaveStatus::Approved)
                | (LeaveStatus::Pending, LeaveStatus::Rejected)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveEntry {
    pub id: i64,
    pub date: String,
    pub message: String,
    pub status: LeaveStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaveWithOwner {
    pub id: i64,
    pub owner: String,
    pub email: String,
    pub date: String,
    pub message: String,
    pub status: LeaveStatus,
    pub created_at: String,
}

fn status_from_column(idx: usize, v: i64) -> rusqlite::Result<LeaveStatus> {
    LeaveStatus::from_i64(v).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("unknown leave status {}", v).into(),
        )
    })
}

pub fn apply_leave(
    conn: &Connection,
    audience: Audience,
    owner_id: i64,
    form: &LeaveForm,
) -> Result<i64, HandlerErr> {
    let table = audience.leave_table();
    let now = db::now_ts();
    conn.execute(
        &format!(
            "INSERT INTO {}(owner_id, date, message, status, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            table
        ),
        (
            owner_id,
            form.date.format("%Y-%m-%d").to_string(),
            &form.message,
            LeaveStatus::Pending.as_i64(),
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::insert(e, table))?;
    let id = conn.last_insert_rowid();
    tracing::info!(table, owner_id, leave_id = id, "leave applied");
    Ok(id)
}

pub fn own_leaves(
    conn: &Connection,
    audience: Audience,
    owner_id: i64,
) -> Result<Vec<LeaveEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, date, message, status, created_at FROM {}
             WHERE owner_id = ? ORDER BY created_at DESC, id DESC",
            audience.leave_table()
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([owner_id], |r| {
        Ok(LeaveEntry {
            id: r.get(0)?,
            date: r.get(1)?,
            message: r.get(2)?,
            status: status_from_column(3, r.get(3)?)?,
            created_at: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn all_leaves(conn: &Connection, audience: Audience) -> Result<Vec<LeaveWithOwner>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT l.id, u.first_name, u.last_name, u.email, l.date, l.message, l.status,
                    l.created_at
             FROM {} l
             JOIN {} p ON p.id = l.owner_id
             JOIN users u ON u.id = p.user_id
             ORDER BY l.created_at DESC, l.id DESC",
            audience.leave_table(),
            audience.profile_table()
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        Ok(LeaveWithOwner {
            id: r.get(0)?,
            owner: format!("{} {}", first, last).trim().to_string(),
            email: r.get(3)?,
            date: r.get(4)?,
            message: r.get(5)?,
            status: status_from_column(6, r.get(6)?)?,
            created_at: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// Decides a pending leave report.
pub fn set_leave_status(
    conn: &Connection,
    audience: Audience,
    leave_id: i64,
    next: LeaveStatus,
) -> Result<(), HandlerErr> {
    let table = audience.leave_table();
    require(conn, table, leave_id, "leave report")?;
    if !LeaveStatus::Pending.can_transition_to(next) {
        return Err(HandlerErr::invalid_transition(format!(
            "leave reports cannot be moved to {:?}",
            next
        )));
    }
    let changed = conn
        .execute(
            &format!(
                "UPDATE {} SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
                table
            ),
            (
                next.as_i64(),
                db::now_ts(),
                leave_id,
                LeaveStatus::Pending.as_i64(),
            ),
        )
        .map_err(|e| HandlerErr::update(e, table))?;
    if changed == 0 {
        tracing::warn!(table, leave_id, ?next, "leave report already decided");
        return Err(HandlerErr::invalid_transition(format!(
            "leave report {} is no longer pending",
            leave_id
        )));
    }
    tracing::info!(table, leave_id, ?next, "leave status changed");
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
        Audience::Staff => "staff_apply_leave",
        Audience::Student => "student_apply_leave",
    };
    let data = json!({ "leave_history": own_leaves(conn, audience, owner_id)? });
    Ok(match errors {
        Some(errors) => form_page(ctx, name, data, errors),
        None => page(ctx, name, data),
    })
}

fn submit(
    state: &AppState,
    ctx: &RequestContext,
    audience: Audience,
    raw: LeaveRaw,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Form has errors!");
            return own_page(&conn, ctx, audience, Some(&errors));
        }
    };
    let owner_id = profile_id(&conn, audience, ctx.user.id)?;
    match apply_leave(&conn, audience, owner_id, &form) {
        Ok(_) => {
            ctx.success("Application for leave has been submitted for review");
            Ok(found(match audience {
                Audience::Staff => "/staff/leave",
                Audience::Student => "/student/leave",
            }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "leave not applied");
            ctx.error("Could not submit");
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
    Form(raw): Form<LeaveRaw>,
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
    Form(raw): Form<LeaveRaw>,
) -> Result<Response, HandlerErr> {
    submit(&state, &ctx, Audience::Student, raw)
}

fn admin_page(state: &AppState, ctx: &RequestContext, audience: Audience) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let name = match audience {
        Audience::Staff => "staff_leave_view",
        Audience::Student => "student_leave_view",
    };
    Ok(page(ctx, name, json!({ "allLeave": all_leaves(&conn, audience)? })))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRaw {
    pub id: Option<String>,
    pub status: Option<String>,
}

fn decide(state: &AppState, audience: Audience, raw: DecisionRaw) -> Ajax {
    let (Some(leave_id), Some(next)) = (
        parse_id(raw.id.as_deref()),
        raw.status.as_deref().and_then(LeaveStatus::parse_decision),
    ) else {
        return Ajax::False;
    };
    let conn = state.conn();
    match set_leave_status(&conn, audience, leave_id, next) {
        Ok(()) => Ajax::True,
        Err(e) => {
            tracing::warn!(error = %e, leave_id, "leave decision refused");
            Ajax::False
        }
    }
}

pub async fn admin_staff_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    admin_page(&state, &ctx, Audience::Staff)
}

pub async fn admin_staff_decide(
    State(state): State<AppState>,
    Form(raw): Form<DecisionRaw>,
) -> Ajax {
    decide(&state, Audience::Staff, raw)
}

pub async fn admin_student_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    admin_page(&state, &ctx, Audience::Student)
}

pub async fn admin_student_decide(
    State(state): State<AppState>,
    Form(raw): Form<DecisionRaw>,
) -> Ajax {
    decide(&state, Audience::Student, raw)
}
