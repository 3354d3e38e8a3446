/*!
Attendance taking and review.

An attendance event is keyed by (subject, session, date); each student in it
has one report row keyed by (attendance, student). Both keys are unique in the
schema and every write goes through an upsert inside one transaction, so
repeated or concurrent submissions for the same key converge on the same rows.
*/
use axum::extract::State;
use axum::{Extension, Form, Json};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::web::error::{Ajax, HandlerErr};
use crate::web::forms::{parse_date, parse_id};
use crate::web::helpers::{require, roster_name, student_profile};
use crate::web::types::{AppState, RequestContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StudentStatus {
    pub student_id: i64,
    pub present: bool,
}

#[derive(Debug, Clone)]
pub struct SaveAttendance {
    pub subject_id: i64,
    pub session_id: i64,
    pub date: NaiveDate,
    pub entries: Vec<StudentStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceDate {
    pub id: i64,
    pub attendance_date: String,
    pub session: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub id: i64,
    pub name: String,
    pub status: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatedStatus {
    pub date: String,
    pub status: bool,
}

fn parse_flag(v: &serde_json::Value) -> Option<bool> {
    match v {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_json_id(v: &serde_json::Value) -> Option<i64> {
    let id = match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    id.filter(|n| *n > 0)
}

/// Parses the `student_ids` field: a JSON array of `{"id": .., "status": ..}`.
pub fn parse_student_statuses(raw: &str) -> Result<Vec<StudentStatus>, HandlerErr> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| HandlerErr::bad_params(format!("student_ids is not valid JSON: {}", e)))?;
    let Some(items) = value.as_array() else {
        return Err(HandlerErr::bad_params("student_ids must be a JSON array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let student_id = item.get("id").and_then(parse_json_id).ok_or_else(|| {
            HandlerErr::bad_params(format!("student_ids[{}].id must be a positive integer", i))
        })?;
        let present = item.get("status").and_then(parse_flag).ok_or_else(|| {
            HandlerErr::bad_params(format!("student_ids[{}].status must be 0 or 1", i))
        })?;
        out.push(StudentStatus {
            student_id,
            present,
        });
    }
    Ok(out)
}

/// Records one roll call. Creates the event on first use of its key and
/// upserts one report per listed student. All-or-nothing: an unknown student
/// rolls back the whole submission. Returns the attendance id.
pub fn save_attendance(conn: &Connection, input: &SaveAttendance) -> Result<i64, HandlerErr> {
    require(conn, "subjects", input.subject_id, "subject")?;
    require(conn, "academic_sessions", input.session_id, "session")?;

    let now = db::now_ts();
    let date = input.date.format("%Y-%m-%d").to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let attendance_id: i64 = tx
        .query_row(
            "INSERT INTO attendance(subject_id, session_id, date, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(subject_id, session_id, date) DO UPDATE SET
               updated_at = excluded.updated_at
             RETURNING id",
            (input.subject_id, input.session_id, &date, &now, &now),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::insert(e, "attendance"))?;

    for entry in &input.entries {
        let student_exists = tx
            .query_row(
                "SELECT 1 FROM students WHERE id = ?",
                [entry.student_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::query)?
            .is_some();
        if !student_exists {
            return Err(HandlerErr::not_found(format!(
                "student {} not found",
                entry.student_id
            )));
        }
        tx.execute(
            "INSERT INTO attendance_reports(attendance_id, student_id, status, updated_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(attendance_id, student_id) DO UPDATE SET
               status = excluded.status,
               updated_at = excluded.updated_at",
            (attendance_id, entry.student_id, entry.present, &now),
        )
        .map_err(|e| HandlerErr::insert(e, "attendance_reports"))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(
        attendance_id,
        subject_id = input.subject_id,
        session_id = input.session_id,
        %date,
        students = input.entries.len(),
        "attendance saved"
    );
    Ok(attendance_id)
}

/// Overwrites statuses inside an existing attendance event. Never creates an
/// event or a report; a student without a report in this event aborts the
/// whole update.
pub fn update_attendance(
    conn: &Connection,
    attendance_id: i64,
    entries: &[StudentStatus],
) -> Result<(), HandlerErr> {
    require(conn, "attendance", attendance_id, "attendance")?;

    let now = db::now_ts();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for entry in entries {
        let changed = tx
            .execute(
                "UPDATE attendance_reports SET status = ?, updated_at = ?
                 WHERE attendance_id = ? AND student_id = ?",
                (entry.present, &now, attendance_id, entry.student_id),
            )
            .map_err(|e| HandlerErr::update(e, "attendance_reports"))?;
        if changed == 0 {
            return Err(HandlerErr::not_found(format!(
                "no attendance report for student {} in attendance {}",
                entry.student_id, attendance_id
            )));
        }
    }
    tx.execute(
        "UPDATE attendance SET updated_at = ? WHERE id = ?",
        (&now, attendance_id),
    )
    .map_err(|e| HandlerErr::update(e, "attendance"))?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(attendance_id, students = entries.len(), "attendance updated");
    Ok(())
}

/// Students enrolled in the subject's course for the given session.
pub fn students_for_subject(
    conn: &Connection,
    subject_id: i64,
    session_id: i64,
) -> Result<Vec<RosterEntry>, HandlerErr> {
    let course_id: i64 = conn
        .query_row(
            "SELECT course_id FROM subjects WHERE id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found(format!("subject {} not found", subject_id)))?;
    require(conn, "academic_sessions", session_id, "session")?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, u.first_name, u.last_name
             FROM students s JOIN users u ON u.id = s.user_id
             WHERE s.course_id = ? AND s.session_id = ?
             ORDER BY u.last_name, u.first_name, s.id",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((course_id, session_id), |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        Ok(RosterEntry {
            id: r.get(0)?,
            name: roster_name(&first, &last),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn attendance_dates(
    conn: &Connection,
    subject_id: i64,
    session_id: i64,
) -> Result<Vec<AttendanceDate>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, date, session_id FROM attendance
             WHERE subject_id = ? AND session_id = ?
             ORDER BY date",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((subject_id, session_id), |r| {
        Ok(AttendanceDate {
            id: r.get(0)?,
            attendance_date: r.get(1)?,
            session: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn attendance_reports(
    conn: &Connection,
    attendance_id: i64,
) -> Result<Vec<ReportEntry>, HandlerErr> {
    require(conn, "attendance", attendance_id, "attendance")?;
    let mut stmt = conn
        .prepare(
            "SELECT s.id, u.first_name, u.last_name, r.status
             FROM attendance_reports r
             JOIN students s ON s.id = r.student_id
             JOIN users u ON u.id = s.user_id
             WHERE r.attendance_id = ?
             ORDER BY u.last_name, u.first_name, s.id",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([attendance_id], |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        Ok(ReportEntry {
            id: r.get(0)?,
            name: roster_name(&first, &last),
            status: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// One student's statuses for a subject between two dates, inclusive.
pub fn student_attendance_between(
    conn: &Connection,
    student_id: i64,
    subject_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DatedStatus>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT a.date, r.status
             FROM attendance a
             JOIN attendance_reports r ON r.attendance_id = a.id
             WHERE a.subject_id = ? AND r.student_id = ? AND a.date BETWEEN ? AND ?
             ORDER BY a.date",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map(
        (
            subject_id,
            student_id,
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
        ),
        |r| {
            Ok(DatedStatus {
                date: r.get(0)?,
                status: r.get(1)?,
            })
        },
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn required_id(v: Option<&str>, key: &str) -> Result<i64, HandlerErr> {
    parse_id(v).ok_or_else(|| HandlerErr::bad_params(format!("missing or invalid {}", key)))
}

fn required_date(v: Option<&str>, key: &str) -> Result<NaiveDate, HandlerErr> {
    v.and_then(parse_date)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing or invalid {}", key)))
}

#[derive(Debug, Deserialize)]
pub struct SaveRaw {
    pub subject: Option<String>,
    pub session: Option<String>,
    pub date: Option<String>,
    pub student_ids: Option<String>,
}

pub async fn save(
    State(state): State<AppState>,
    Form(raw): Form<SaveRaw>,
) -> Result<Ajax, HandlerErr> {
    let input = SaveAttendance {
        subject_id: required_id(raw.subject.as_deref(), "subject")?,
        session_id: required_id(raw.session.as_deref(), "session")?,
        date: required_date(raw.date.as_deref(), "date")?,
        entries: parse_student_statuses(raw.student_ids.as_deref().unwrap_or("[]"))?,
    };
    let conn = state.conn();
    save_attendance(&conn, &input)?;
    Ok(Ajax::Ok)
}

#[derive(Debug, Deserialize)]
pub struct UpdateRaw {
    pub attendance_date_id: Option<String>,
    pub student_ids: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Form(raw): Form<UpdateRaw>,
) -> Result<Ajax, HandlerErr> {
    let attendance_id = required_id(raw.attendance_date_id.as_deref(), "attendance_date_id")?;
    let entries = parse_student_statuses(raw.student_ids.as_deref().unwrap_or("[]"))?;
    let conn = state.conn();
    update_attendance(&conn, attendance_id, &entries)?;
    Ok(Ajax::Ok)
}

#[derive(Debug, Deserialize)]
pub struct SubjectSessionRaw {
    pub subject: Option<String>,
    pub session: Option<String>,
}

pub async fn get_students(
    State(state): State<AppState>,
    Form(raw): Form<SubjectSessionRaw>,
) -> Result<Json<Vec<RosterEntry>>, HandlerErr> {
    let subject_id = required_id(raw.subject.as_deref(), "subject")?;
    let session_id = required_id(raw.session.as_deref(), "session")?;
    let conn = state.conn();
    Ok(Json(students_for_subject(&conn, subject_id, session_id)?))
}

pub async fn get_dates(
    State(state): State<AppState>,
    Form(raw): Form<SubjectSessionRaw>,
) -> Result<Json<Vec<AttendanceDate>>, HandlerErr> {
    let subject_id = required_id(raw.subject.as_deref(), "subject")?;
    let session_id = required_id(raw.session.as_deref(), "session")?;
    let conn = state.conn();
    Ok(Json(attendance_dates(&conn, subject_id, session_id)?))
}

#[derive(Debug, Deserialize)]
pub struct AttendanceIdRaw {
    pub attendance_date_id: Option<String>,
}

pub async fn get_reports(
    State(state): State<AppState>,
    Form(raw): Form<AttendanceIdRaw>,
) -> Result<Json<Vec<ReportEntry>>, HandlerErr> {
    let attendance_id = required_id(raw.attendance_date_id.as_deref(), "attendance_date_id")?;
    let conn = state.conn();
    Ok(Json(attendance_reports(&conn, attendance_id)?))
}

#[derive(Debug, Deserialize)]
pub struct AdminAttendanceRaw {
    pub subject: Option<String>,
    pub session: Option<String>,
    pub attendance_date_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NamedStatus {
    pub status: bool,
    pub name: String,
}

/// The admin view of one attendance event; the event must belong to the
/// given subject and session.
pub async fn admin_get(
    State(state): State<AppState>,
    Form(raw): Form<AdminAttendanceRaw>,
) -> Result<Json<Vec<NamedStatus>>, HandlerErr> {
    let subject_id = required_id(raw.subject.as_deref(), "subject")?;
    let session_id = required_id(raw.session.as_deref(), "session")?;
    let attendance_id = required_id(raw.attendance_date_id.as_deref(), "attendance_date_id")?;
    let conn = state.conn();
    let matches = conn
        .query_row(
            "SELECT 1 FROM attendance WHERE id = ? AND subject_id = ? AND session_id = ?",
            (attendance_id, subject_id, session_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !matches {
        return Err(HandlerErr::not_found(format!(
            "attendance {} not found for subject {} and session {}",
            attendance_id, subject_id, session_id
        )));
    }
    let reports = attendance_reports(&conn, attendance_id)?;
    Ok(Json(
        reports
            .into_iter()
            .map(|r| NamedStatus {
                status: r.status,
                name: r.name,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct StudentRangeRaw {
    pub subject: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub async fn student_range(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<StudentRangeRaw>,
) -> Result<Json<Vec<DatedStatus>>, HandlerErr> {
    let subject_id = required_id(raw.subject.as_deref(), "subject")?;
    let start = required_date(raw.start_date.as_deref(), "start_date")?;
    let end = required_date(raw.end_date.as_deref(), "end_date")?;
    if end < start {
        return Err(HandlerErr::bad_params("end_date is before start_date"));
    }
    let conn = state.conn();
    let student = student_profile(&conn, ctx.user.id)?;
    Ok(Json(student_attendance_between(
        &conn, student.id, subject_id, start, end,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_accept_numbers_bools_and_strings() {
        let parsed = parse_student_statuses(
            r#"[{"id":1,"status":1},{"id":"2","status":false},{"id":3,"status":"0"}]"#,
        )
        .expect("parse");
        assert_eq!(
            parsed,
            vec![
                StudentStatus { student_id: 1, present: true },
                StudentStatus { student_id: 2, present: false },
                StudentStatus { student_id: 3, present: false },
            ]
        );
    }

    #[test]
    fn statuses_reject_bad_shapes() {
        assert_eq!(parse_student_statuses("{}").unwrap_err().code, "bad_params");
        assert_eq!(
            parse_student_statuses(r#"[{"id":0,"status":1}]"#).unwrap_err().code,
            "bad_params"
        );
        assert_eq!(
            parse_student_statuses(r#"[{"id":1,"status":2}]"#).unwrap_err().code,
            "bad_params"
        );
        assert!(parse_student_statuses("[]").expect("empty").is_empty());
    }
}
