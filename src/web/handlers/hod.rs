/*!
The HOD (admin) portal: the dashboard, CRUD for courses, sessions, subjects,
staff and students, and the admin side of attendance.

Every write has a plain function over `&Connection` and a thin handler that
turns its outcome into a flash plus redirect, or a re-rendered form.
*/
use axum::extract::{Path, State};
use axum::response::Response;
use axum::{Extension, Form};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{self, NewUser, Role};
use crate::db;
use crate::web::error::{Ajax, HandlerErr};
use crate::web::forms::{
    CourseForm, CourseRaw, FormErrors, PersonForm, PersonKind, PersonRaw, SessionForm,
    SessionRaw, SubjectForm, SubjectRaw, Validate,
};
use crate::web::helpers::{
    choices, course_choices, found, form_page, page, require, session_choices, staff_choices,
};
use crate::web::types::{AppState, RequestContext};

// ---------------------------------------------------------------------------
// Dashboard

#[derive(Debug, Clone, Serialize)]
pub struct StudentTally {
    pub name: String,
    pub present: i64,
    pub absent: i64,
    pub leave: i64,
}

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(HandlerErr::query)
}

fn named_counts(conn: &Connection, sql: &str) -> Result<Vec<(String, i64)>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

pub fn dashboard(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let subject_attendance = named_counts(
        conn,
        "SELECT s.name, COUNT(a.id) FROM subjects s
         LEFT JOIN attendance a ON a.subject_id = s.id
         GROUP BY s.id ORDER BY s.name",
    )?;
    let course_students = named_counts(
        conn,
        "SELECT c.name, COUNT(st.id) FROM courses c
         LEFT JOIN students st ON st.course_id = c.id
         GROUP BY c.id ORDER BY c.name",
    )?;

    let mut stmt = conn
        .prepare(
            "SELECT u.first_name, u.last_name,
                    (SELECT COUNT(*) FROM attendance_reports r
                      WHERE r.student_id = st.id AND r.status = 1),
                    (SELECT COUNT(*) FROM attendance_reports r
                      WHERE r.student_id = st.id AND r.status = 0),
                    (SELECT COUNT(*) FROM leave_reports_student l
                      WHERE l.owner_id = st.id AND l.status = 1)
             FROM students st JOIN users u ON u.id = st.user_id
             ORDER BY u.first_name, u.last_name",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([], |r| {
            let first: String = r.get(0)?;
            let last: String = r.get(1)?;
            Ok(StudentTally {
                name: format!("{} {}", first, last).trim().to_string(),
                present: r.get(2)?,
                absent: r.get(3)?,
                leave: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "total_staff": count(conn, "SELECT COUNT(*) FROM staff")?,
        "total_students": count(conn, "SELECT COUNT(*) FROM students")?,
        "total_subject": count(conn, "SELECT COUNT(*) FROM subjects")?,
        "total_course": count(conn, "SELECT COUNT(*) FROM courses")?,
        "subject_list": subject_attendance.iter().map(|(n, _)| n).collect::<Vec<_>>(),
        "attendance_list": subject_attendance.iter().map(|(_, c)| c).collect::<Vec<_>>(),
        "course_name_list": course_students.iter().map(|(n, _)| n).collect::<Vec<_>>(),
        "student_count_list_in_course": course_students.iter().map(|(_, c)| c).collect::<Vec<_>>(),
        "students": students,
    }))
}

pub async fn home(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let data = dashboard(&conn)?;
    Ok(page(&ctx, "admin_home", data))
}

// ---------------------------------------------------------------------------
// Courses

pub fn insert_course(conn: &Connection, form: &CourseForm) -> Result<i64, HandlerErr> {
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO courses(name, created_at, updated_at) VALUES(?, ?, ?)",
        (&form.name, &now, &now),
    )
    .map_err(|e| HandlerErr::insert(e, "courses"))?;
    let id = conn.last_insert_rowid();
    tracing::info!(course_id = id, name = %form.name, "course added");
    Ok(id)
}

pub fn update_course(conn: &Connection, course_id: i64, form: &CourseForm) -> Result<(), HandlerErr> {
    let changed = conn
        .execute(
            "UPDATE courses SET name = ?, updated_at = ? WHERE id = ?",
            (&form.name, db::now_ts(), course_id),
        )
        .map_err(|e| HandlerErr::update(e, "courses"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!("course {} not found", course_id)));
    }
    Ok(())
}

fn delete_row(conn: &Connection, table: &str, id: i64, what: &str) -> Result<(), HandlerErr> {
    let changed = conn
        .execute(&format!("DELETE FROM {} WHERE id = ?", table), [id])
        .map_err(|e| HandlerErr::update(e, table))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!("{} {} not found", what, id)));
    }
    tracing::info!(table, id, "deleted");
    Ok(())
}

pub fn delete_course(conn: &Connection, course_id: i64) -> Result<(), HandlerErr> {
    delete_row(conn, "courses", course_id, "course")
}

fn course_row(conn: &Connection, course_id: i64) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, created_at, updated_at FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "created_at": r.get::<_, String>(2)?,
                "updated_at": r.get::<_, String>(3)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found(format!("course {} not found", course_id)))
}

pub async fn add_course_page(
    Extension(ctx): Extension<RequestContext>,
) -> Response {
    page(&ctx, "add_course", json!({}))
}

pub async fn add_course_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<CourseRaw>,
) -> Response {
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => return form_page(&ctx, "add_course", json!({}), &errors),
    };
    let conn = state.conn();
    match insert_course(&conn, &form) {
        Ok(_) => {
            ctx.success("Successfully Added");
            found("/admin/course/add")
        }
        Err(e) => {
            ctx.error(format!("Could Not Add {}", e.message));
            form_page(&ctx, "add_course", json!({}), &FormErrors::default())
        }
    }
}

pub async fn manage_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let courses = choices(&conn, "SELECT id, name FROM courses ORDER BY name")?;
    Ok(page(&ctx, "manage_course", json!({ "courses": courses })))
}

pub async fn edit_course_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(course_id): Path<i64>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let course = course_row(&conn, course_id)?;
    Ok(page(&ctx, "edit_course", json!({ "course": course })))
}

pub async fn edit_course_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(course_id): Path<i64>,
    Form(raw): Form<CourseRaw>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let course = course_row(&conn, course_id)?;
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            return Ok(form_page(&ctx, "edit_course", json!({ "course": course }), &errors))
        }
    };
    match update_course(&conn, course_id, &form) {
        Ok(()) => {
            ctx.success("Successfully Updated");
            Ok(found(&format!("/admin/course/edit/{}", course_id)))
        }
        Err(e) => {
            ctx.error(format!("Could Not Update {}", e.message));
            Ok(form_page(
                &ctx,
                "edit_course",
                json!({ "course": course }),
                &FormErrors::default(),
            ))
        }
    }
}

pub async fn delete_course_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(course_id): Path<i64>,
) -> Response {
    let conn = state.conn();
    match delete_course(&conn, course_id) {
        Ok(()) => ctx.success("Course deleted successfully!"),
        Err(e) => ctx.error(format!("Could not delete course: {}", e.message)),
    }
    found("/admin/course/manage")
}

// ---------------------------------------------------------------------------
// Sessions

pub fn insert_session(conn: &Connection, form: &SessionForm) -> Result<i64, HandlerErr> {
    conn.execute(
        "INSERT INTO academic_sessions(start_year, end_year) VALUES(?, ?)",
        (
            form.start_year.format("%Y-%m-%d").to_string(),
            form.end_year.format("%Y-%m-%d").to_string(),
        ),
    )
    .map_err(|e| HandlerErr::insert(e, "academic_sessions"))?;
    let id = conn.last_insert_rowid();
    tracing::info!(session_id = id, "session added");
    Ok(id)
}

pub fn update_session(conn: &Connection, session_id: i64, form: &SessionForm) -> Result<(), HandlerErr> {
    let changed = conn
        .execute(
            "UPDATE academic_sessions SET start_year = ?, end_year = ? WHERE id = ?",
            (
                form.start_year.format("%Y-%m-%d").to_string(),
                form.end_year.format("%Y-%m-%d").to_string(),
                session_id,
            ),
        )
        .map_err(|e| HandlerErr::update(e, "academic_sessions"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!("session {} not found", session_id)));
    }
    Ok(())
}

pub fn delete_session(conn: &Connection, session_id: i64) -> Result<(), HandlerErr> {
    delete_row(conn, "academic_sessions", session_id, "session")
}

fn session_row(conn: &Connection, session_id: i64) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, start_year, end_year FROM academic_sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "start_year": r.get::<_, String>(1)?,
                "end_year": r.get::<_, String>(2)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found(format!("session {} not found", session_id)))
}

pub async fn add_session_page(Extension(ctx): Extension<RequestContext>) -> Response {
    page(&ctx, "add_session", json!({}))
}

pub async fn add_session_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<SessionRaw>,
) -> Response {
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Fill Form Properly");
            return form_page(&ctx, "add_session", json!({}), &errors);
        }
    };
    let conn = state.conn();
    match insert_session(&conn, &form) {
        Ok(_) => {
            ctx.success("Session Created");
            found("/admin/session/add")
        }
        Err(e) => {
            ctx.error(format!("Could Not Add {}", e.message));
            form_page(&ctx, "add_session", json!({}), &FormErrors::default())
        }
    }
}

pub async fn manage_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let sessions = session_choices(&conn)?;
    Ok(page(&ctx, "manage_session", json!({ "sessions": sessions })))
}

pub async fn edit_session_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<i64>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let session = session_row(&conn, session_id)?;
    Ok(page(&ctx, "edit_session", json!({ "session": session })))
}

pub async fn edit_session_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<i64>,
    Form(raw): Form<SessionRaw>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let session = session_row(&conn, session_id)?;
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Invalid Form Submitted");
            return Ok(form_page(&ctx, "edit_session", json!({ "session": session }), &errors));
        }
    };
    match update_session(&conn, session_id, &form) {
        Ok(()) => {
            ctx.success("Session Updated");
            Ok(found(&format!("/admin/session/edit/{}", session_id)))
        }
        Err(e) => {
            ctx.error(format!("Session Could Not Be Updated {}", e.message));
            Ok(form_page(
                &ctx,
                "edit_session",
                json!({ "session": session }),
                &FormErrors::default(),
            ))
        }
    }
}

pub async fn delete_session_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(session_id): Path<i64>,
) -> Response {
    let conn = state.conn();
    match delete_session(&conn, session_id) {
        Ok(()) => ctx.success("Session deleted successfully!"),
        Err(e) => ctx.error(format!("Could not delete session: {}", e.message)),
    }
    found("/admin/session/manage")
}

// ---------------------------------------------------------------------------
// Subjects

fn check_subject_refs(conn: &Connection, form: &SubjectForm) -> Result<(), HandlerErr> {
    require(conn, "courses", form.course_id, "course")?;
    require(conn, "staff", form.staff_id, "staff")
}

pub fn insert_subject(conn: &Connection, form: &SubjectForm) -> Result<i64, HandlerErr> {
    check_subject_refs(conn, form)?;
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO subjects(name, staff_id, course_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)",
        (&form.name, form.staff_id, form.course_id, &now, &now),
    )
    .map_err(|e| HandlerErr::insert(e, "subjects"))?;
    let id = conn.last_insert_rowid();
    tracing::info!(subject_id = id, name = %form.name, "subject added");
    Ok(id)
}

pub fn update_subject(conn: &Connection, subject_id: i64, form: &SubjectForm) -> Result<(), HandlerErr> {
    check_subject_refs(conn, form)?;
    let changed = conn
        .execute(
            "UPDATE subjects SET name = ?, staff_id = ?, course_id = ?, updated_at = ?
             WHERE id = ?",
            (&form.name, form.staff_id, form.course_id, db::now_ts(), subject_id),
        )
        .map_err(|e| HandlerErr::update(e, "subjects"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!("subject {} not found", subject_id)));
    }
    Ok(())
}

pub fn delete_subject(conn: &Connection, subject_id: i64) -> Result<(), HandlerErr> {
    delete_row(conn, "subjects", subject_id, "subject")
}

fn subject_pickers(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "courses": course_choices(conn)?,
        "staff": staff_choices(conn)?,
    }))
}

fn list_subjects(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, c.name, u.first_name || ' ' || u.last_name, s.updated_at
             FROM subjects s
             JOIN courses c ON c.id = s.course_id
             JOIN staff st ON st.id = s.staff_id
             JOIN users u ON u.id = st.user_id
             ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "name": r.get::<_, String>(1)?,
            "course": r.get::<_, String>(2)?,
            "staff": r.get::<_, String>(3)?,
            "updated_at": r.get::<_, String>(4)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn subject_row(conn: &Connection, subject_id: i64) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, course_id, staff_id FROM subjects WHERE id = ?",
        [subject_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "course": r.get::<_, i64>(2)?,
                "staff": r.get::<_, i64>(3)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found(format!("subject {} not found", subject_id)))
}

pub async fn add_subject_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let data = subject_pickers(&conn)?;
    Ok(page(&ctx, "add_subject", data))
}

pub async fn add_subject_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<SubjectRaw>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Fill Form Properly");
            let data = subject_pickers(&conn)?;
            return Ok(form_page(&ctx, "add_subject", data, &errors));
        }
    };
    match insert_subject(&conn, &form) {
        Ok(_) => {
            ctx.success("Successfully Added");
            Ok(found("/admin/subject/add"))
        }
        Err(e) => {
            ctx.error(format!("Could Not Add {}", e.message));
            let data = subject_pickers(&conn)?;
            Ok(form_page(&ctx, "add_subject", data, &FormErrors::default()))
        }
    }
}

pub async fn manage_subject(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let subjects = list_subjects(&conn)?;
    Ok(page(&ctx, "manage_subject", json!({ "subjects": subjects })))
}

pub async fn edit_subject_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(subject_id): Path<i64>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let mut data = subject_pickers(&conn)?;
    data["subject"] = subject_row(&conn, subject_id)?;
    Ok(page(&ctx, "edit_subject", data))
}

pub async fn edit_subject_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(subject_id): Path<i64>,
    Form(raw): Form<SubjectRaw>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let mut data = subject_pickers(&conn)?;
    data["subject"] = subject_row(&conn, subject_id)?;
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => return Ok(form_page(&ctx, "edit_subject", data, &errors)),
    };
    match update_subject(&conn, subject_id, &form) {
        Ok(()) => {
            ctx.success("Subject Updated");
            Ok(found(&format!("/admin/subject/edit/{}", subject_id)))
        }
        Err(e) => {
            ctx.error(format!("Could Not Update {}", e.message));
            Ok(form_page(&ctx, "edit_subject", data, &FormErrors::default()))
        }
    }
}

pub async fn delete_subject_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(subject_id): Path<i64>,
) -> Response {
    let conn = state.conn();
    match delete_subject(&conn, subject_id) {
        Ok(()) => ctx.success("Subject deleted successfully!"),
        Err(e) => ctx.error(format!("Could not delete subject: {}", e.message)),
    }
    found("/admin/subject/manage")
}

// ---------------------------------------------------------------------------
// Staff and students

/// Staff and student accounts differ only in the profile table and the
/// session reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Person {
    Staff,
    Student,
}

impl Person {
    fn table(self) -> &'static str {
        match self {
            Person::Staff => "staff",
            Person::Student => "students",
        }
    }

    fn role(self) -> Role {
        match self {
            Person::Staff => Role::Staff,
            Person::Student => Role::Student,
        }
    }

    fn kind(self, editing: bool) -> PersonKind {
        match (self, editing) {
            (Person::Staff, false) => PersonKind::NewStaff,
            (Person::Staff, true) => PersonKind::EditStaff,
            (Person::Student, false) => PersonKind::NewStudent,
            (Person::Student, true) => PersonKind::EditStudent,
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Person::Staff => "staff",
            Person::Student => "student",
        }
    }
}

fn check_person_refs(conn: &Connection, form: &PersonForm) -> Result<(), HandlerErr> {
    require(conn, "courses", form.course_id, "course")?;
    if let Some(session_id) = form.session_id {
        require(conn, "academic_sessions", session_id, "session")?;
    }
    Ok(())
}

/// Creates the user account and its profile together. Returns the profile id.
pub fn create_person(conn: &Connection, who: Person, form: &PersonForm) -> Result<i64, HandlerErr> {
    check_person_refs(conn, form)?;
    if auth::email_exists(conn, &form.email).map_err(HandlerErr::query)? {
        return Err(HandlerErr::duplicate(format!(
            "email {} is already registered",
            form.email
        )));
    }
    let password = form.password.as_deref().unwrap_or_default();

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let user_id = auth::insert_user(
        &tx,
        &NewUser {
            email: &form.email,
            password,
            role: who.role(),
            first_name: &form.first_name,
            last_name: &form.last_name,
            gender: &form.gender,
            address: &form.address,
            profile_pic: &form.profile_pic,
        },
    )
    .map_err(|e| HandlerErr::insert(e, "users"))?;
    let inserted = match who {
        Person::Staff => tx.execute(
            "INSERT INTO staff(user_id, course_id) VALUES(?, ?)",
            (user_id, form.course_id),
        ),
        Person::Student => tx.execute(
            "INSERT INTO students(user_id, course_id, session_id) VALUES(?, ?, ?)",
            (user_id, form.course_id, form.session_id),
        ),
    };
    inserted.map_err(|e| HandlerErr::insert(e, who.table()))?;
    let profile_id = tx.last_insert_rowid();
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(user_id, profile_id, role = ?who.role(), "account created");
    Ok(profile_id)
}

fn user_of(conn: &Connection, who: Person, profile_id: i64) -> Result<i64, HandlerErr> {
    conn.query_row(
        &format!("SELECT user_id FROM {} WHERE id = ?", who.table()),
        [profile_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found(format!("{} {} not found", who.noun(), profile_id)))
}

/// Updates account and profile. A `None` password keeps the current one;
/// an empty `profile_pic` keeps the current picture.
pub fn update_person(
    conn: &Connection,
    who: Person,
    profile_id: i64,
    form: &PersonForm,
) -> Result<(), HandlerErr> {
    let user_id = user_of(conn, who, profile_id)?;
    check_person_refs(conn, form)?;
    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE lower(email) = lower(?) AND id <> ?",
            (&form.email, user_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if taken.is_some() {
        return Err(HandlerErr::duplicate(format!(
            "email {} is already registered",
            form.email
        )));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE users SET first_name = ?, last_name = ?, email = ?, gender = ?, address = ?,
                profile_pic = CASE WHEN ? = '' THEN profile_pic ELSE ? END,
                updated_at = ?
         WHERE id = ?",
        (
            &form.first_name,
            &form.last_name,
            &form.email,
            &form.gender,
            &form.address,
            &form.profile_pic,
            &form.profile_pic,
            db::now_ts(),
            user_id,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "users"))?;
    if let Some(password) = &form.password {
        auth::set_password(&tx, user_id, password).map_err(|e| HandlerErr::update(e, "users"))?;
    }
    let updated = match who {
        Person::Staff => tx.execute(
            "UPDATE staff SET course_id = ? WHERE id = ?",
            (form.course_id, profile_id),
        ),
        Person::Student => tx.execute(
            "UPDATE students SET course_id = ?, session_id = ? WHERE id = ?",
            (form.course_id, form.session_id, profile_id),
        ),
    };
    updated.map_err(|e| HandlerErr::update(e, who.table()))?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(user_id, profile_id, "account updated");
    Ok(())
}

/// Deletes the user account; the profile and everything it owns cascade.
pub fn delete_person(conn: &Connection, who: Person, profile_id: i64) -> Result<(), HandlerErr> {
    let user_id = user_of(conn, who, profile_id)?;
    delete_row(conn, "users", user_id, "user")
}

fn list_people(conn: &Connection, who: Person) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let session_col = match who {
        Person::Staff => "NULL",
        Person::Student => "(SELECT start_year || ' to ' || end_year FROM academic_sessions
                             WHERE id = p.session_id)",
    };
    let mut stmt = conn
        .prepare(&format!(
            "SELECT p.id, u.id, u.first_name, u.last_name, u.email, u.gender, u.address,
                    u.profile_pic, c.name, {}
             FROM {} p
             JOIN users u ON u.id = p.user_id
             LEFT JOIN courses c ON c.id = p.course_id
             ORDER BY u.last_name, u.first_name, p.id",
            session_col,
            who.table()
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([], |r| {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "user_id": r.get::<_, i64>(1)?,
            "first_name": r.get::<_, String>(2)?,
            "last_name": r.get::<_, String>(3)?,
            "email": r.get::<_, String>(4)?,
            "gender": r.get::<_, String>(5)?,
            "address": r.get::<_, String>(6)?,
            "profile_pic": r.get::<_, String>(7)?,
            "course": r.get::<_, Option<String>>(8)?,
            "session": r.get::<_, Option<String>>(9)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn person_row(conn: &Connection, who: Person, profile_id: i64) -> Result<serde_json::Value, HandlerErr> {
    let session_col = match who {
        Person::Staff => "NULL",
        Person::Student => "p.session_id",
    };
    conn.query_row(
        &format!(
            "SELECT p.id, u.first_name, u.last_name, u.email, u.gender, u.address,
                    u.profile_pic, p.course_id, {}
             FROM {} p JOIN users u ON u.id = p.user_id
             WHERE p.id = ?",
            session_col,
            who.table()
        ),
        [profile_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "first_name": r.get::<_, String>(1)?,
                "last_name": r.get::<_, String>(2)?,
                "email": r.get::<_, String>(3)?,
                "gender": r.get::<_, String>(4)?,
                "address": r.get::<_, String>(5)?,
                "profile_pic": r.get::<_, String>(6)?,
                "course": r.get::<_, Option<i64>>(7)?,
                "session": r.get::<_, Option<i64>>(8)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found(format!("{} {} not found", who.noun(), profile_id)))
}

fn person_pickers(conn: &Connection, who: Person) -> Result<serde_json::Value, HandlerErr> {
    let mut data = json!({ "courses": course_choices(conn)? });
    if who == Person::Student {
        data["sessions"] = json!(session_choices(conn)?);
    }
    Ok(data)
}

fn add_person_page(state: &AppState, ctx: &RequestContext, who: Person) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let data = person_pickers(&conn, who)?;
    Ok(page(ctx, &format!("add_{}", who.noun()), data))
}

fn add_person_submit(
    state: &AppState,
    ctx: &RequestContext,
    who: Person,
    raw: PersonRaw,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let name = format!("add_{}", who.noun());
    let form = match raw.validate_as(who.kind(false)) {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Please fulfil all requirements");
            let data = person_pickers(&conn, who)?;
            return Ok(form_page(ctx, &name, data, &errors));
        }
    };
    match create_person(&conn, who, &form) {
        Ok(_) => {
            ctx.success("Successfully Added");
            Ok(found(&format!("/admin/{}/add", who.noun())))
        }
        Err(e) => {
            ctx.error(format!("Could Not Add: {}", e.message));
            let data = person_pickers(&conn, who)?;
            Ok(form_page(ctx, &name, data, &FormErrors::default()))
        }
    }
}

fn manage_people(state: &AppState, ctx: &RequestContext, who: Person) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let people = list_people(&conn, who)?;
    let (name, key) = match who {
        Person::Staff => ("manage_staff", "allStaff"),
        Person::Student => ("manage_student", "students"),
    };
    Ok(page(ctx, name, json!({ key: people })))
}

fn edit_person_page(
    state: &AppState,
    ctx: &RequestContext,
    who: Person,
    profile_id: i64,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let mut data = person_pickers(&conn, who)?;
    data[who.noun()] = person_row(&conn, who, profile_id)?;
    Ok(page(ctx, &format!("edit_{}", who.noun()), data))
}

fn edit_person_submit(
    state: &AppState,
    ctx: &RequestContext,
    who: Person,
    profile_id: i64,
    raw: PersonRaw,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let name = format!("edit_{}", who.noun());
    let mut data = person_pickers(&conn, who)?;
    data[who.noun()] = person_row(&conn, who, profile_id)?;
    let form = match raw.validate_as(who.kind(true)) {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Please fill form properly");
            return Ok(form_page(ctx, &name, data, &errors));
        }
    };
    match update_person(&conn, who, profile_id, &form) {
        Ok(()) => {
            ctx.success("Successfully Updated");
            Ok(found(&format!("/admin/{}/edit/{}", who.noun(), profile_id)))
        }
        Err(e) => {
            ctx.error(format!("Could Not Update {}", e.message));
            Ok(form_page(ctx, &name, data, &FormErrors::default()))
        }
    }
}

fn delete_person_redirect(state: &AppState, ctx: &RequestContext, who: Person, profile_id: i64) -> Response {
    let conn = state.conn();
    match delete_person(&conn, who, profile_id) {
        Ok(()) => ctx.success(format!("{} deleted successfully!", capitalized(who.noun()))),
        Err(e) => ctx.error(format!("Could not delete {}: {}", who.noun(), e.message)),
    }
    found(&format!("/admin/{}/manage", who.noun()))
}

fn capitalized(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub async fn add_staff_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    add_person_page(&state, &ctx, Person::Staff)
}

pub async fn add_staff_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<PersonRaw>,
) -> Result<Response, HandlerErr> {
    add_person_submit(&state, &ctx, Person::Staff, raw)
}

pub async fn manage_staff(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    manage_people(&state, &ctx, Person::Staff)
}

pub async fn edit_staff_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(staff_id): Path<i64>,
) -> Result<Response, HandlerErr> {
    edit_person_page(&state, &ctx, Person::Staff, staff_id)
}

pub async fn edit_staff_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(staff_id): Path<i64>,
    Form(raw): Form<PersonRaw>,
) -> Result<Response, HandlerErr> {
    edit_person_submit(&state, &ctx, Person::Staff, staff_id, raw)
}

pub async fn delete_staff_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(staff_id): Path<i64>,
) -> Response {
    delete_person_redirect(&state, &ctx, Person::Staff, staff_id)
}

pub async fn add_student_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    add_person_page(&state, &ctx, Person::Student)
}

pub async fn add_student_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<PersonRaw>,
) -> Result<Response, HandlerErr> {
    add_person_submit(&state, &ctx, Person::Student, raw)
}

pub async fn manage_student(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    manage_people(&state, &ctx, Person::Student)
}

pub async fn edit_student_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(student_id): Path<i64>,
) -> Result<Response, HandlerErr> {
    edit_person_page(&state, &ctx, Person::Student, student_id)
}

pub async fn edit_student_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(student_id): Path<i64>,
    Form(raw): Form<PersonRaw>,
) -> Result<Response, HandlerErr> {
    edit_person_submit(&state, &ctx, Person::Student, student_id, raw)
}

pub async fn delete_student_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(student_id): Path<i64>,
) -> Response {
    delete_person_redirect(&state, &ctx, Person::Student, student_id)
}

#[derive(Debug, Deserialize)]
pub struct EmailRaw {
    pub email: Option<String>,
}

/// `True` when the address is already registered.
pub async fn check_email_availability(
    State(state): State<AppState>,
    Form(raw): Form<EmailRaw>,
) -> Ajax {
    let email = raw.email.unwrap_or_default();
    let email = email.trim();
    if email.is_empty() {
        return Ajax::False;
    }
    let conn = state.conn();
    match auth::email_exists(&conn, email) {
        Ok(taken) => Ajax::from_bool(taken),
        Err(e) => {
            tracing::error!(error = %e, "email lookup failed");
            Ajax::False
        }
    }
}

// ---------------------------------------------------------------------------
// Attendance

pub async fn view_attendance(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let subjects = choices(&conn, "SELECT id, name FROM subjects ORDER BY name")?;
    let sessions = session_choices(&conn)?;
    Ok(page(
        &ctx,
        "admin_view_attendance",
        json!({ "subjects": subjects, "sessions": sessions }),
    ))
}
