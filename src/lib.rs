pub mod auth;
pub mod config;
pub mod db;
pub mod notify;
pub mod web;

use std::sync::Arc;

use crate::config::Cfg;
use crate::notify::PushSender;
use crate::web::AppState;

/// Opens the workspace database and prepares it for serving: schema,
/// default HOD account, expired-session cleanup.
pub fn bootstrap(cfg: &Cfg, push: Arc<dyn PushSender>) -> anyhow::Result<AppState> {
    let conn = db::open_db(&cfg.workspace)?;
    auth::ensure_default_admin(&conn, &cfg.admin_email, &cfg.admin_password)?;
    let purged = auth::purge_expired_sessions(&conn)?.len();
    if purged > 0 {
        tracing::info!(purged, "removed expired login sessions");
    }
    Ok(AppState::new(conn, push, cfg.session_ttl_hours))
}
