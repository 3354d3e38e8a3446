/*!
Login check and role gate.

Every request passes through `login_check`: the session cookie is resolved to
a user, the role/path table below decides whether the request proceeds, and
an authenticated request carries its `RequestContext` into the handler.
*/
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::{self, CurrentUser, Role};
use crate::web::error::HandlerErr;
use crate::web::helpers::found;
use crate::web::types::{AppState, RequestContext};
use crate::web::SESSION_COOKIE;

const PUBLIC_PATHS: [&str; 3] = ["/", "/doLogin", "/health"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allow,
    Redirect(&'static str),
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Decides where a request for `path` goes given the caller's role, or
/// `None` for an anonymous caller.
pub fn gate_decision(role: Option<Role>, path: &str) -> Gate {
    let Some(role) = role else {
        return if PUBLIC_PATHS.contains(&path) {
            Gate::Allow
        } else {
            Gate::Redirect("/")
        };
    };
    if path == "/" {
        return Gate::Redirect(role.home_path());
    }
    let forbidden = match role {
        Role::Hod => under(path, "/student"),
        Role::Staff => under(path, "/admin") || under(path, "/student"),
        Role::Student => under(path, "/admin") || under(path, "/staff"),
    };
    if forbidden {
        Gate::Redirect(role.home_path())
    } else {
        Gate::Allow
    }
}

fn resolve(state: &AppState, key: &str) -> Result<Option<CurrentUser>, HandlerErr> {
    let conn = state.conn();
    auth::session_user(&conn, key).map_err(HandlerErr::query)
}

pub async fn login_check(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let key = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let user = match key.as_deref() {
        Some(k) => match resolve(&state, k) {
            Ok(Some(u)) => Some(u),
            Ok(None) => {
                // Expired or logged out elsewhere.
                state.forget_flashes(k);
                None
            }
            Err(e) => return e.into_response(),
        },
        None => None,
    };

    let path = req.uri().path().to_string();
    if let Gate::Redirect(to) = gate_decision(user.as_ref().map(|u| u.role), &path) {
        tracing::debug!(%path, to, "gate redirect");
        return found(to);
    }

    if let (Some(user), Some(key)) = (user, key) {
        req.extensions_mut()
            .insert(RequestContext::new(user, key, state.flashes.clone()));
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_callers_only_reach_public_paths() {
        assert_eq!(gate_decision(None, "/"), Gate::Allow);
        assert_eq!(gate_decision(None, "/doLogin"), Gate::Allow);
        assert_eq!(gate_decision(None, "/health"), Gate::Allow);
        assert_eq!(gate_decision(None, "/admin/home"), Gate::Redirect("/"));
        assert_eq!(gate_decision(None, "/attendance/fetch"), Gate::Redirect("/"));
        assert_eq!(gate_decision(None, "/logout_user"), Gate::Redirect("/"));
    }

    #[test]
    fn roles_are_sent_home_from_foreign_portals() {
        assert_eq!(
            gate_decision(Some(Role::Hod), "/student/home"),
            Gate::Redirect("/admin/home")
        );
        assert_eq!(gate_decision(Some(Role::Hod), "/staff/home"), Gate::Allow);
        assert_eq!(
            gate_decision(Some(Role::Staff), "/admin/course/add"),
            Gate::Redirect("/staff/home")
        );
        assert_eq!(
            gate_decision(Some(Role::Staff), "/student/home"),
            Gate::Redirect("/staff/home")
        );
        assert_eq!(
            gate_decision(Some(Role::Student), "/staff/attendance/save"),
            Gate::Redirect("/student/home")
        );
        assert_eq!(
            gate_decision(Some(Role::Student), "/attendance/fetch"),
            Gate::Allow
        );
    }

    #[test]
    fn root_redirects_to_home_and_prefixes_match_whole_segments() {
        assert_eq!(gate_decision(Some(Role::Staff), "/"), Gate::Redirect("/staff/home"));
        assert_eq!(gate_decision(Some(Role::Student), "/staffroom"), Gate::Allow);
        assert_eq!(gate_decision(Some(Role::Student), "/staff"), Gate::Redirect("/student/home"));
    }
}
