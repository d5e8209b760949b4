use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{State, WebSocketUpgrade, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    chrono::Utc,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    courier_config::CourierConfig,
    courier_protocol::{
        ApiResponse, ApiStatus, ConnectReport, Phase, SERVICE_NAME, SendBody, SentData,
        StatusReport,
    },
};

use crate::{
    send::{RejectReason, SendRequest, SendResult},
    session::{SessionState, SessionStatus},
    state::{BackendInfo, GatewayOptions, GatewayState},
    ws::handle_subscriber,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/connect", get(connect_handler).post(connect_handler))
        .route("/disconnect", post(disconnect_handler))
        .route("/send", post(send_handler))
        .route("/api/setup", get(setup_handler).post(setup_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP + WebSocket server and run until ctrl-c.
pub async fn start_gateway(config: CourierConfig) -> anyhow::Result<()> {
    let backend = courier_whatsapp::backend_from_config(&config.whatsapp);
    let info = BackendInfo::new(backend.as_ref(), &config.whatsapp);
    let state = GatewayState::new(backend, info, GatewayOptions::from(&config));

    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let lines = [
        format!("courier gateway v{}", state.version),
        format!("listening on {addr}"),
        format!("backend: {}", state.backend.name),
        format!(
            "pairing window: {}s",
            config.session.pairing_window().as_secs()
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    if config.session.auto_connect {
        let session = Arc::clone(&state.session);
        tokio::spawn(async move {
            session.connect().await;
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, disconnecting session");
    state.session.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Credential setup instructions for the Cloud API backend.
async fn setup_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "success",
        "message": "Webhook setup instructions",
        "configured": state.backend.configured,
        "steps": [
            "1. Go to the Facebook Developer Portal",
            "2. Create a WhatsApp Business App",
            "3. Get an Access Token and Phone Number ID",
            "4. Set WHATSAPP_TOKEN and WHATSAPP_PHONE_ID for the gateway",
            "5. Restart the gateway and test with the /send endpoint",
        ],
        "environment_variables": {
            "WHATSAPP_TOKEN": "Your WhatsApp Business API Access Token",
            "WHATSAPP_PHONE_ID": "Your Phone Number ID from Facebook",
        },
    }))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": state.version,
        "backend": state.backend.name,
        "subscribers": state.subscriber_count(),
        "timestamp": Utc::now(),
    }))
}

async fn status_handler(State(state): State<Arc<GatewayState>>) -> Json<StatusReport> {
    let snapshot = state.session.snapshot();
    Json(status_report(&state, &snapshot))
}

fn status_report(state: &GatewayState, snapshot: &SessionState) -> StatusReport {
    StatusReport {
        connected: snapshot.is_connected(),
        status: snapshot.phase(),
        timestamp: snapshot.last_transition_at(),
        service: SERVICE_NAME.to_string(),
        backend: state.backend.name.clone(),
        configured: state.backend.configured,
        has_token: state.backend.has_token,
        has_phone_id: state.backend.has_phone_id,
        pairing_code: snapshot.pairing_artifact().map(str::to_owned),
        error: snapshot.error_detail().map(str::to_owned),
    }
}

async fn connect_handler(State(state): State<Arc<GatewayState>>) -> Response {
    let mut snapshot = state.session.connect().await;
    if snapshot.phase() == Phase::Pairing && snapshot.pairing_artifact().is_none() {
        snapshot = state
            .session
            .wait_for(state.connect_wait, |s| {
                s.phase() != Phase::Pairing || s.pairing_artifact().is_some()
            })
            .await;
    }

    let pairing_code = snapshot.pairing_artifact().map(str::to_owned);
    let (code, status, message) = match snapshot.status() {
        SessionStatus::Connected => (
            StatusCode::OK,
            ApiStatus::Success,
            "WhatsApp is connected".to_string(),
        ),
        SessionStatus::Pairing {
            artifact: Some(code),
        } => (
            StatusCode::OK,
            ApiStatus::Success,
            format!("Enter pairing code {code} in WhatsApp to link this gateway"),
        ),
        SessionStatus::Pairing { artifact: None } => (
            StatusCode::OK,
            ApiStatus::Success,
            "Pairing started, waiting for a pairing code".to_string(),
        ),
        SessionStatus::Disconnected => (
            StatusCode::OK,
            ApiStatus::Success,
            "Pairing window expired".to_string(),
        ),
        SessionStatus::Errored { detail } => (
            StatusCode::BAD_GATEWAY,
            ApiStatus::Error,
            format!("Connection failed: {detail}"),
        ),
    };

    let report = ConnectReport {
        status,
        connected: snapshot.is_connected(),
        phase: snapshot.phase(),
        pairing_code,
        message,
    };
    (code, Json(report)).into_response()
}

async fn disconnect_handler(State(state): State<Arc<GatewayState>>) -> Response {
    let snapshot = state.session.disconnect().await;
    match snapshot.error_detail() {
        Some(detail) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::<serde_json::Value>::error(format!(
                "WhatsApp session errored: {detail}"
            ))),
        )
            .into_response(),
        None => Json(ApiResponse::success(
            "Disconnected from WhatsApp",
            Some(status_report(&state, &snapshot)),
        ))
        .into_response(),
    }
}

async fn send_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON: {}", rejection.body_text()),
            );
        },
    };

    let request = SendRequest::new(body.to, body.message);
    match state.sender.send(&request).await {
        SendResult::Sent {
            provider_message_id,
        } => {
            let data = SentData {
                to: request.to,
                message: request.body,
                timestamp: Utc::now(),
                message_id: Some(provider_message_id.0),
            };
            Json(ApiResponse::success("Message sent successfully", Some(data))).into_response()
        },
        SendResult::Rejected {
            reason: RejectReason::InvalidRequest,
        } => error_response(
            StatusCode::BAD_REQUEST,
            "Missing required fields: to, message",
        ),
        SendResult::Rejected {
            reason: RejectReason::NotConnected,
        } => error_response(StatusCode::SERVICE_UNAVAILABLE, "WhatsApp is not connected"),
        SendResult::BackendError { detail } => error_response(
            StatusCode::BAD_GATEWAY,
            format!("Failed to send via WhatsApp: {detail}"),
        ),
    }
}

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(ApiResponse::<serde_json::Value>::error(message))).into_response()
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state))
}
