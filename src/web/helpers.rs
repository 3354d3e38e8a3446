use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::web::error::HandlerErr;
use crate::web::forms::FormErrors;
use crate::web::types::{Audience, RequestContext};

/// A rendered page model: page name, caller, pending flash messages and the
/// page's own data merged at the top level.
pub fn page(ctx: &RequestContext, name: &str, data: serde_json::Value) -> Response {
    let mut body = json!({
        "page": name,
        "user": ctx.user,
        "messages": ctx.take_messages(),
    });
    if let (Some(obj), serde_json::Value::Object(extra)) = (body.as_object_mut(), data) {
        obj.extend(extra);
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// Re-renders a form page with its field errors attached.
pub fn form_page(
    ctx: &RequestContext,
    name: &str,
    mut data: serde_json::Value,
    errors: &FormErrors,
) -> Response {
    if let Some(obj) = data.as_object_mut() {
        obj.insert("errors".to_string(), json!(errors));
    } else {
        data = json!({ "errors": errors });
    }
    page(ctx, name, data)
}

/// 302 to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub fn exists(conn: &Connection, table: &str, id: i64) -> Result<bool, HandlerErr> {
    conn.query_row(
        &format!("SELECT 1 FROM {} WHERE id = ?", table),
        [id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

pub fn require(conn: &Connection, table: &str, id: i64, what: &str) -> Result<(), HandlerErr> {
    if exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{} {} not found", what, id)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StaffProfile {
    pub id: i64,
    pub course_id: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct StudentProfile {
    pub id: i64,
    pub course_id: Option<i64>,
}

pub fn staff_profile(conn: &Connection, user_id: i64) -> Result<StaffProfile, HandlerErr> {
    conn.query_row(
        "SELECT id, course_id FROM staff WHERE user_id = ?",
        [user_id],
        |r| {
            Ok(StaffProfile {
                id: r.get(0)?,
                course_id: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("staff profile not found"))
}

pub fn student_profile(conn: &Connection, user_id: i64) -> Result<StudentProfile, HandlerErr> {
    conn.query_row(
        "SELECT id, course_id FROM students WHERE user_id = ?",
        [user_id],
        |r| {
            Ok(StudentProfile {
                id: r.get(0)?,
                course_id: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("student profile not found"))
}

/// The staff or student profile id owned by `user_id`.
pub fn profile_id(conn: &Connection, audience: Audience, user_id: i64) -> Result<i64, HandlerErr> {
    match audience {
        Audience::Staff => staff_profile(conn, user_id).map(|p| p.id),
        Audience::Student => student_profile(conn, user_id).map(|p| p.id),
    }
}

/// `"<last> <first>"`, the way rosters list people.
pub fn roster_name(first: &str, last: &str) -> String {
    format!("{} {}", last, first).trim().to_string()
}

/// `(id, name)` pairs for a select box.
pub fn choices(conn: &Connection, sql: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "name": r.get::<_, String>(1)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn session_choices(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    choices(
        conn,
        "SELECT id, start_year || ' to ' || end_year FROM academic_sessions ORDER BY start_year",
    )
}

pub fn course_choices(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    choices(conn, "SELECT id, name FROM courses ORDER BY name")
}

pub fn staff_choices(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    choices(
        conn,
        "SELECT s.id, u.first_name || ' ' || u.last_name
         FROM staff s JOIN users u ON u.id = s.user_id
         ORDER BY u.last_name, u.first_name",
    )
}

pub fn subjects_taught(conn: &Connection, staff_id: i64) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects WHERE staff_id = ? ORDER BY name")
        .map_err(HandlerErr::query)?;
    stmt.query_map([staff_id], |r| {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "name": r.get::<_, String>(1)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

pub fn course_subjects(conn: &Connection, course_id: Option<i64>) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects WHERE course_id = ? ORDER BY name")
        .map_err(HandlerErr::query)?;
    stmt.query_map([course_id], |r| {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "name": r.get::<_, String>(1)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_name_is_last_then_first() {
        assert_eq!(roster_name("John", "Doe"), "Doe John");
        assert_eq!(roster_name("Admin", ""), "Admin");
    }
}
