use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use studentd::config::Cfg;
use studentd::notify::LogPushSender;
use studentd::web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Cfg::load(std::env::args_os().nth(1).map(PathBuf::from))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log))
        .with_context(|| format!("invalid log filter {:?}", cfg.log))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        workspace = %cfg.workspace.display(),
        addr = %cfg.addr,
        admin = %cfg.admin_email,
        "starting studentd"
    );

    let state = studentd::bootstrap(&cfg, Arc::new(LogPushSender))?;
    tokio::spawn(sweep_sessions(
        state.clone(),
        Duration::from_secs(cfg.session_sweep_minutes * 60),
    ));
    let app = web::build_router(state);

    let listener = tokio::net::TcpListener::bind(cfg.addr)
        .await
        .with_context(|| format!("unable to bind {}", cfg.addr))?;
    tracing::info!(addr = %cfg.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    tracing::info!("shut down");
    Ok(())
}

async fn sweep_sessions(state: web::AppState, every: Duration) {
    let mut tick = tokio::time::interval(every);
    // The first tick fires immediately; bootstrap has just purged.
    tick.tick().await;
    loop {
        tick.tick().await;
        match state.purge_expired_sessions() {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "removed expired login sessions"),
            Err(e) => tracing::error!(error = %e, "session sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "unable to listen for shutdown signal");
    }
}
