use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

use crate::web::error::HandlerErr;
use crate::web::helpers::{course_subjects, page, student_profile};
use crate::web::types::{AppState, RequestContext};

#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub total_attendance: i64,
    pub percent_present: f64,
    pub percent_absent: f64,
    pub total_subject: i64,
    pub subject_name: Vec<String>,
    pub data_present: Vec<i64>,
    pub data_absent: Vec<i64>,
}

/// Attendance totals across every subject of the student's course.
pub fn summary(conn: &Connection, student_id: i64, course_id: Option<i64>) -> Result<StudentSummary, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.name,
                    (SELECT COUNT(*) FROM attendance_reports r
                       JOIN attendance a ON a.id = r.attendance_id
                      WHERE a.subject_id = s.id AND r.student_id = ? AND r.status = 1),
                    (SELECT COUNT(*) FROM attendance_reports r
                       JOIN attendance a ON a.id = r.attendance_id
                      WHERE a.subject_id = s.id AND r.student_id = ? AND r.status = 0)
             FROM subjects s
             WHERE s.course_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((student_id, student_id, course_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut out = StudentSummary {
        total_attendance: 0,
        percent_present: 0.0,
        percent_absent: 0.0,
        total_subject: rows.len() as i64,
        subject_name: Vec::with_capacity(rows.len()),
        data_present: Vec::with_capacity(rows.len()),
        data_absent: Vec::with_capacity(rows.len()),
    };
    let mut present_total = 0;
    for (name, present, absent) in rows {
        present_total += present;
        out.total_attendance += present + absent;
        out.subject_name.push(name);
        out.data_present.push(present);
        out.data_absent.push(absent);
    }
    if out.total_attendance > 0 {
        let total = out.total_attendance as f64;
        let pct = |n: i64| ((n as f64 / total) * 10_000.0).round() / 100.0;
        out.percent_present = pct(present_total);
        out.percent_absent = pct(out.total_attendance - present_total);
    }
    Ok(out)
}

pub async fn home(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let student = student_profile(&conn, ctx.user.id)?;
    let data = summary(&conn, student.id, student.course_id)?;
    Ok(page(&ctx, "student_home", json!(data)))
}

pub async fn attendance_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let student = student_profile(&conn, ctx.user.id)?;
    let subjects = course_subjects(&conn, student.course_id)?;
    Ok(page(&ctx, "student_view_attendance", json!({ "subjects": subjects })))
}
