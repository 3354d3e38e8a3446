use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::web::error::HandlerErr;
use crate::web::helpers::{page, session_choices, staff_profile, subjects_taught, StaffProfile};
use crate::web::types::{AppState, RequestContext};

#[derive(Debug, Clone, Serialize)]
pub struct StaffSummary {
    pub total_students: i64,
    pub total_attendance: i64,
    pub total_leave: i64,
    pub total_subject: i64,
    pub subject_list: Vec<String>,
    pub attendance_list: Vec<i64>,
}

pub fn summary(conn: &Connection, staff: StaffProfile) -> Result<StaffSummary, HandlerErr> {
    let total_students: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE course_id = ?",
            [staff.course_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    let total_leave: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM leave_reports_staff WHERE owner_id = ?",
            [staff.id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.name, COUNT(a.id) FROM subjects s
             LEFT JOIN attendance a ON a.subject_id = s.id
             WHERE s.staff_id = ?
             GROUP BY s.id ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;
    let per_subject = stmt
        .query_map([staff.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let (subject_list, attendance_list): (Vec<String>, Vec<i64>) = per_subject.into_iter().unzip();
    Ok(StaffSummary {
        total_students,
        total_attendance: attendance_list.iter().sum(),
        total_leave,
        total_subject: subject_list.len() as i64,
        subject_list,
        attendance_list,
    })
}

pub async fn home(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let staff = staff_profile(&conn, ctx.user.id)?;
    let data = summary(&conn, staff)?;
    Ok(page(&ctx, "staff_home", json!(data)))
}

fn pickers(state: &AppState, ctx: &RequestContext, name: &str) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let staff = staff_profile(&conn, ctx.user.id)?;
    let data = json!({
        "subjects": subjects_taught(&conn, staff.id)?,
        "sessions": session_choices(&conn)?,
    });
    Ok(page(ctx, name, data))
}

pub async fn take_attendance(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    pickers(&state, &ctx, "staff_take_attendance")
}

pub async fn update_attendance(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    pickers(&state, &ctx, "staff_update_attendance")
}
