use axum::extract::State;
use axum::response::Response;
use axum::{Extension, Form};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::auth::{self, Role};
use crate::db;
use crate::web::error::HandlerErr;
use crate::web::forms::{FormErrors, ProfileForm, ProfileRaw};
use crate::web::helpers::{found, form_page, page};
use crate::web::types::{AppState, RequestContext};

pub fn profile_row(conn: &Connection, user_id: i64) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT first_name, last_name, email, gender, address, profile_pic
         FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(json!({
                "first_name": r.get::<_, String>(0)?,
                "last_name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "gender": r.get::<_, String>(3)?,
                "address": r.get::<_, String>(4)?,
                "profile_pic": r.get::<_, String>(5)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found(format!("user {} not found", user_id)))
}

/// Fields left out of the form (`None`) keep their stored values.
pub fn update_profile(conn: &Connection, user_id: i64, form: &ProfileForm) -> Result<(), HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let changed = tx
        .execute(
            "UPDATE users SET first_name = ?, last_name = ?,
                    address = COALESCE(?, address),
                    gender = COALESCE(?, gender),
                    profile_pic = COALESCE(?, profile_pic),
                    updated_at = ?
             WHERE id = ?",
            (
                &form.first_name,
                &form.last_name,
                &form.address,
                &form.gender,
                &form.profile_pic,
                db::now_ts(),
                user_id,
            ),
        )
        .map_err(|e| HandlerErr::update(e, "users"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found(format!("user {} not found", user_id)));
    }
    if let Some(password) = &form.password {
        auth::set_password(&tx, user_id, password).map_err(|e| HandlerErr::update(e, "users"))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    tracing::info!(user_id, password_changed = form.password.is_some(), "profile updated");
    Ok(())
}

fn names(role: Role) -> (&'static str, &'static str) {
    match role {
        Role::Hod => ("admin_view_profile", "/admin/profile"),
        Role::Staff => ("staff_view_profile", "/staff/profile"),
        Role::Student => ("student_view_profile", "/student/profile"),
    }
}

pub async fn view(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let (name, _) = names(ctx.user.role);
    let profile = profile_row(&conn, ctx.user.id)?;
    Ok(page(&ctx, name, json!({ "profile": profile })))
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Form(raw): Form<ProfileRaw>,
) -> Result<Response, HandlerErr> {
    let conn = state.conn();
    let (name, path) = names(ctx.user.role);
    let with_contact = ctx.user.role != Role::Hod;
    let form = match raw.validate_profile(with_contact) {
        Ok(f) => f,
        Err(errors) => {
            ctx.error("Invalid Data Provided");
            let profile = profile_row(&conn, ctx.user.id)?;
            return Ok(form_page(&ctx, name, json!({ "profile": profile }), &errors));
        }
    };
    match update_profile(&conn, ctx.user.id, &form) {
        Ok(()) => {
            ctx.success("Profile Updated!");
            Ok(found(path))
        }
        Err(e) => {
            ctx.error(format!("Error Occured While Updating Profile {}", e.message));
            let profile = profile_row(&conn, ctx.user.id)?;
            Ok(form_page(
                &ctx,
                name,
                json!({ "profile": profile }),
                &FormErrors::default(),
            ))
        }
    }
}
