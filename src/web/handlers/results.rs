use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Form, Json};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::web::error::{Ajax, HandlerErr};
use crate::web::forms::{parse_id, FormErrors, ResultForm, ResultRaw, Validate};
use crate::web::helpers::{
    found, form_page, page, require, session_choices, staff_profile, student_profile,
    subjects_taught,
};
use crate::web::types::{AppState, RequestContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scores {
    pub test: f64,
    pub exam: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectResult {
    pub subject: String,
    pub test: f64,
    pub exam: f64,
    pub total: f64,
}

/// Get-or-create on (student, subject), then overwrite both scores.
pub fn upsert_result(conn: &Connection, form: &ResultForm) -> Result<Upserted, HandlerErr> {
    require(conn, "students", form.student_id, "student")?;
    require(conn, "subjects", form.subject_id, "subject")?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let existed = tx
        .query_row(
            "SELECT 1 FROM student_results WHERE student_id = ? AND subject_id = ?",
            (form.student_id, form.subject_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    tx.execute(
        "INSERT INTO student_results(student_id, subject_id, test, exam, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id) DO UPDATE SET
           test = excluded.test,
           exam = excluded.exam,
           updated_at = excluded.updated_at",
        (
            form.student_id,
            form.subject_id,
            form.test,
            form.exam,
            db::now_ts(),
        ),
    )
    .map_err(|e| HandlerErr::insert(e, "student_results"))?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(
        student_id = form.student_id,
        subject_id = form.subject_id,
        created = !existed,
        "result saved"
    );
    Ok(if existed {
        Upserted::Updated
    } else {
        Upserted::Created
    })
}

pub fn fetch_result(
    conn: &Connection,
    student_id: i64,
    subject_id: i64,
) -> Result<Option<Scores>, HandlerErr> {
    conn.query_row(
        "SELECT test, exam FROM student_results WHERE student_id = ? AND subject_id = ?",
        (student_id, subject_id),
        |r| {
            Ok(Scores {
                test: r.get(0)?,
                exam: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::query)
}

/// Overwrites an existing result; never creates one.
pub fn edit_result(conn: &Connection, form: &ResultForm) -> Result<(), HandlerErr> {
    let changed = conn
        .execute(
            "UPDATE student_results SET test = ?, exam = ?, updated_at = ?
             WHERE student_id = ? AND subject_id = ?",
            (
                form.test,
                form.exam,
                db::now_ts(),
                form.student_id,
                form.subject_id,
            ),
        )
        .map_err(|e| HandlerErr::update(e, "student_results"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!(
            "no result for student {} in subject {}",
            form.student_id, form.subject_id
        )));
    }
    tracing::info!(
        student_id = form.student_id,
        subject_id = form.subject_id,
        "result edited"
    );
    Ok(())
}

pub fn results_for_student(
    conn: &Connection,
    student_id: i64,
) -> Result<Vec<SubjectResult>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.name, r.test, r.exam
             FROM student_results r JOIN subjects s ON s.id = r.subject_id
             WHERE r.student_id = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([student_id], |r| {
        let test: f64 = r.get(1)?;
        let exam: f64 = r.get(2)?;
        Ok(SubjectResult {
            subject: r.get(0)?,
            test,
            exam,
            total: test + exam,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn pickers(conn: &Connection, ctx: &RequestContext) -> Result<serde_json::Value, HandlerErr> {
    let staff = staff_profile(conn, ctx.user.id)?;
    Ok(json!({
        "subjects": subjects_taught(conn, staff.id)?,
        "sessions": session_choices(conn)?,
    }))
}

pub async fn add_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let data = pickers(&conn, &ctx)?;
    Ok(page(&ctx, "staff_add_result", data))
}

pub async fn add_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<ResultRaw>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            let data = pickers(&conn, &ctx)?;
            return Ok(form_page(&ctx, "staff_add_result", data, &errors));
        }
    };
    match upsert_result(&conn, &form) {
        Ok(Upserted::Created) => ctx.success("Scores Saved"),
        Ok(Upserted::Updated) => ctx.success("Scores Updated"),
        Err(e) => {
            tracing::warn!(error = %e, "result not saved");
            ctx.error("Error Occured While Processing Form");
            let data = pickers(&conn, &ctx)?;
            return Ok(form_page(&ctx, "staff_add_result", data, &FormErrors::default()));
        }
    }
    Ok(found("/staff/result/add"))
}

#[derive(Debug, Deserialize)]
pub struct FetchRaw {
    pub subject: Option<String>,
    pub student: Option<String>,
}

/// `{"exam", "test"}` for an existing result, `False` otherwise.
pub async fn fetch(
    State(state): State<AppState>,
    Form(raw): Form<FetchRaw>,
) -> Result<Response, HandlerErr> {
    let (Some(subject_id), Some(student_id)) = (
        parse_id(raw.subject.as_deref()),
        parse_id(raw.student.as_deref()),
    ) else {
        return Ok(Ajax::False.into_response());
    };
    let conn = state.conn();
    Ok(match fetch_result(&conn, student_id, subject_id)? {
        Some(scores) => Json(json!({ "exam": scores.exam, "test": scores.test })).into_response(),
        None => Ajax::False.into_response(),
    })
}

pub async fn edit_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let data = pickers(&conn, &ctx)?;
    Ok(page(&ctx, "edit_student_result", data))
}

pub async fn edit_submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<ResultRaw>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let form = match raw.validate() {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Form has errors!");
            let data = pickers(&conn, &ctx)?;
            return Ok(form_page(&ctx, "edit_student_result", data, &errors));
        }
    };
    match edit_result(&conn, &form) {
        Ok(()) => {
            ctx.success("Result Updated");
            Ok(found("/staff/result/edit"))
        }
        Err(e) => {
            tracing::warn!(error = %e, "result not edited");
            ctx.error("Result Could Not Be Updated");
            let data = pickers(&conn, &ctx)?;
            Ok(form_page(&ctx, "edit_student_result", data, &FormErrors::default()))
        }
    }
}

pub async fn student_view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let student = student_profile(&conn, ctx.user.id)?;
    let results = results_for_student(&conn, student.id)?;
    Ok(page(&ctx, "student_view_result", json!({ "results": results })))
}
