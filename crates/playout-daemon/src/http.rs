use crate::core::DaemonEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use playout_proto::config::DisplayConfig;
use playout_proto::protocol::{Channel, Command, EngineSnapshot, Gesture, MessageMode, Transport};
use playout_proto::state::StateManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Deserialize)]
struct ZoneControlRequest {
    control_id: String,
    cmd: String,
}

#[derive(Deserialize)]
struct MessageRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    option: String,
}

#[derive(Deserialize)]
struct LiveControlRequest {
    control: String,
    value: String,
}

#[derive(Serialize)]
struct ApiError {
    error: String,
}

fn bad_request(error: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: error.into(),
        }),
    )
        .into_response()
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/channels", get(get_channels))
        .route("/api/zone_control", post(zone_control))
        .route("/api/message", post(set_message))
        .route("/api/livecontrol", post(live_control))
        .route("/api/gesture/:name", post(gesture))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, cmd: Command) -> Response {
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to forward command to the core");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    StatusCode::OK.into_response()
}

async fn get_state(State(state): State<HttpState>) -> Json<EngineSnapshot> {
    Json(state.state_manager.get_state().await)
}

async fn get_channels(State(state): State<HttpState>) -> Json<Vec<Channel>> {
    Json(state.state_manager.get_state().await.channels)
}

async fn zone_control(
    State(state): State<HttpState>,
    Json(req): Json<ZoneControlRequest>,
) -> Response {
    let action = match req.cmd.parse::<Transport>() {
        Ok(action) => action,
        Err(e) => return bad_request(e),
    };
    info!("HTTP API: {:?} on '{}'", action, req.control_id);
    send(
        &state,
        Command::ZoneControl {
            control_id: req.control_id,
            action,
        },
    )
    .await
}

async fn set_message(State(state): State<HttpState>, Json(req): Json<MessageRequest>) -> Response {
    let option = match req.option.parse::<MessageMode>() {
        Ok(option) => option,
        Err(e) => return bad_request(e),
    };
    info!("HTTP API: message ({:?}) {:?}", option, req.message);
    send(
        &state,
        Command::SetMessage {
            message: req.message,
            option,
        },
    )
    .await
}

async fn live_control(
    State(state): State<HttpState>,
    Json(req): Json<LiveControlRequest>,
) -> Response {
    // Syntax only; the core applies the value to the live config.
    if let Err(e) = DisplayConfig::default().apply_live_control(&req.control, &req.value) {
        return bad_request(e.to_string());
    }
    send(
        &state,
        Command::LiveControl {
            control: req.control,
            value: req.value,
        },
    )
    .await
}

async fn gesture(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    let gesture = match name.parse::<Gesture>() {
        Ok(gesture) => gesture,
        Err(e) => return bad_request(e),
    };
    info!("HTTP API: gesture {:?}", gesture);
    send(&state, Command::Gesture { gesture }).await
}
