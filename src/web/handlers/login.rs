use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::web::error::HandlerErr;
use crate::web::helpers::found;
use crate::web::types::{AppState, Flash, FlashLevel};
use crate::web::SESSION_COOKIE;

const LOGIN_ERROR_COOKIE: &str = "login_error";

fn expired(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

/// The login page. A failed login leaves its message in a one-shot cookie.
pub async fn login_page(jar: CookieJar) -> (CookieJar, Response) {
    let messages: Vec<Flash> = jar
        .get(LOGIN_ERROR_COOKIE)
        .map(|c| Flash {
            level: FlashLevel::Error,
            message: c.value().to_string(),
        })
        .into_iter()
        .collect();
    let jar = if messages.is_empty() {
        jar
    } else {
        jar.remove(expired(LOGIN_ERROR_COOKIE))
    };
    let body = json!({ "page": "login", "user": null, "messages": messages });
    (jar, Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LoginRaw {
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn do_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(raw): Form<LoginRaw>,
) -> Result<(CookieJar, Response), HandlerErr> {
    let email = raw.email.unwrap_or_default();
    let email = email.trim();
    let password = raw.password.unwrap_or_default();

    let conn = state.conn();
    let user = if email.is_empty() || password.is_empty() {
        None
    } else {
        auth::authenticate(&conn, email, &password).map_err(HandlerErr::query)?
    };
    let Some(user) = user else {
        tracing::warn!(email, "login rejected");
        let jar = jar.add(
            Cookie::build((LOGIN_ERROR_COOKIE, "Invalid details"))
                .path("/")
                .http_only(true),
        );
        return Ok((jar, found("/")));
    };

    let key = auth::create_session(&conn, user.id, state.session_ttl_hours)
        .map_err(|e| HandlerErr::insert(e, "login_sessions"))?;
    tracing::info!(user_id = user.id, role = ?user.role, "logged in");
    let jar = jar.add(
        Cookie::build((SESSION_COOKIE, key))
            .path("/")
            .http_only(true),
    );
    Ok((jar, found(user.role.home_path())))
}

pub async fn do_login_get() -> Response {
    (StatusCode::OK, "<h4>Denied</h4>").into_response()
}

pub async fn logout_user(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Response) {
    if let Some(key) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        let conn = state.conn();
        if let Err(e) = auth::delete_session(&conn, &key) {
            tracing::error!(error = %e, "failed to delete login session");
        }
        drop(conn);
        state.forget_flashes(&key);
    }
    (jar.remove(expired(SESSION_COOKIE)), found("/"))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, HandlerErr> {
    let conn = state.conn();
    conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
        .map_err(HandlerErr::query)?;
    Ok(Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") })))
}
