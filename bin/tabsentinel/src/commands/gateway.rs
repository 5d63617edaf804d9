use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabsentinel_core::{Command, SettingsStore, TabHost};
use tabsentinel_scheduler::SuspensionScheduler;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use super::dispatch::CommandHandler;
use super::support::{connect_browser, load_config, settings_store};

#[derive(Clone)]
pub struct GatewayState {
    pub handler: Arc<CommandHandler>,
    pub api_token: Option<String>,
    pub started: Instant,
}

impl GatewayState {
    pub fn new(handler: Arc<CommandHandler>, api_token: Option<String>) -> Self {
        Self {
            handler,
            api_token,
            started: Instant::now(),
        }
    }
}

/// Constant-time string comparison for the bearer token.
fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn auth_middleware(
    State(state): State<GatewayState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = match &state.api_token {
        Some(t) if !t.is_empty() => t,
        _ => return next.run(req).await,
    };

    if req.uri().path() == "/v1/health" {
        return next.run(req).await;
    }

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| secure_eq(t, token))
        .unwrap_or(false);

    if authorized {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized: invalid or missing Bearer token").into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    timer_running: bool,
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        timer_running: state.handler.scheduler().is_running(),
    })
}

async fn handle_status(State(state): State<GatewayState>) -> Response {
    match state.handler.scheduler().status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn handle_command(State(state): State<GatewayState>, Json(body): Json<Value>) -> Response {
    let command: Command = match serde_json::from_value(body) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "Rejected command body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!("Unknown or malformed action: {}", e),
                    "actions": Command::all_actions(),
                })),
            )
                .into_response();
        }
    };

    let response = state.handler.handle(command).await;
    let status = if response.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(response)).into_response()
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/health", get(handle_health))
        .route("/v1/status", get(handle_status))
        .route("/v1/command", post(handle_command))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(
    host_override: Option<String>,
    port_override: Option<u16>,
    launch: bool,
) -> anyhow::Result<()> {
    let (paths, mut config) = load_config()?;
    if launch {
        config.browser.launch = true;
    }
    paths.ensure_dirs()?;

    let settings: Arc<dyn SettingsStore> = settings_store(&paths);
    let mut session = connect_browser(&config, &paths).await?;

    let cdp_host = Arc::new(session.tab_host());
    let mut closed = cdp_host.closed_tabs().await?;
    let host: Arc<dyn TabHost> = cdp_host;

    let scheduler = Arc::new(
        SuspensionScheduler::new(host.clone(), settings.clone())
            .with_interval(Duration::from_secs(config.suspender.sweep_interval_secs))
            .with_icon_url(config.suspender.icon_url.clone())
            .with_sleep_logs(config.logging.sleep_logs),
    );

    let watcher = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            while let Some(id) = closed.recv().await {
                scheduler.on_tab_closed(&id).await;
            }
            debug!("Closed-tab watcher finished");
        })
    };

    let policy = scheduler.current_policy().await?;
    if policy.enabled {
        scheduler.start();
    } else {
        info!("Suspension disabled in settings; timer not started");
    }

    let handler = Arc::new(CommandHandler::new(scheduler.clone(), host, settings));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let scrubber = tokio::spawn(handler.popups().clone().run_auto(
        Duration::from_secs(config.suspender.popup_scrub_interval_secs),
        shutdown_tx.subscribe(),
    ));
    let state = GatewayState::new(handler, config.gateway.api_token().map(str::to_string));
    if state.api_token.is_none() {
        warn!("No gateway.apiToken configured; the command API is unauthenticated");
    }
    let app = build_router(state);

    let bind_host = host_override.unwrap_or_else(|| config.gateway.host.clone());
    let bind_port = port_override.unwrap_or(config.gateway.port);
    let bind_addr = format!("{}:{}", bind_host, bind_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(
        addr = %bind_addr,
        interval_secs = scheduler.interval().as_secs(),
        suspend_after_ms = policy.suspend_after_ms,
        "TabSentinel daemon listening"
    );

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
        {
            error!(error = %e, "HTTP server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    let _ = shutdown_tx.send(());

    scheduler.stop();
    let _ = server.await;
    let _ = scrubber.await;
    watcher.abort();
    session.close().await;

    info!("TabSentinel stopped");
    Ok(())
}
