//! HTTP endpoint handlers

use std::sync::Arc;
use axum::{extract::State, http::StatusCode, response::Json};
use tracing::{info, warn};

use crate::{
    engine::{CommandError, TimerStatus},
    state::{AppState, LiveSessionEvent, TimerState},
};
use super::responses::{
    ApiResponse, CategoryRequest, HealthResponse, ReconcileResponse, StatusResponse,
};

type CommandResult = Result<Json<ApiResponse>, (StatusCode, Json<ApiResponse>)>;

/// Turn a command result into a response; rejected commands map to 409
fn command_response(
    state: &AppState,
    action: &str,
    message: &str,
    result: Result<TimerState, CommandError>,
) -> CommandResult {
    match result {
        Ok(_) => {
            state.record_action(action);
            info!("{} endpoint called", action);
            Ok(Json(ApiResponse::from_timer(
                message.to_string(),
                state.engine.status(),
            )))
        }
        Err(e) => {
            warn!("Rejected {} command: {}", action, e);
            Err((
                StatusCode::CONFLICT,
                Json(ApiResponse::error(e.to_string(), state.engine.status())),
            ))
        }
    }
}

/// Handle POST /timer/start
pub async fn start_handler(State(state): State<Arc<AppState>>) -> CommandResult {
    let result = state.engine.start();
    command_response(&state, "start", "Timer started", result)
}

/// Handle POST /timer/pause
pub async fn pause_handler(State(state): State<Arc<AppState>>) -> CommandResult {
    let result = state.engine.pause();
    command_response(&state, "pause", "Timer paused", result)
}

/// Handle POST /timer/toggle
pub async fn toggle_handler(State(state): State<Arc<AppState>>) -> CommandResult {
    let result = state.engine.toggle();
    command_response(&state, "toggle", "Timer toggled", result)
}

/// Handle POST /timer/reset
pub async fn reset_handler(State(state): State<Arc<AppState>>) -> Json<ApiResponse> {
    state.engine.reset();
    state.record_action("reset");
    info!("reset endpoint called");
    Json(ApiResponse::from_timer(
        "Timer reset".to_string(),
        state.engine.status(),
    ))
}

/// Handle POST /timer/category
pub async fn category_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CategoryRequest>,
) -> CommandResult {
    let result = state
        .engine
        .set_category(&request.category_id, request.duration_seconds);
    command_response(&state, "category", "Category changed", result)
}

/// Handle POST /timer/focus - re-run reconciliation
pub async fn focus_handler(State(state): State<Arc<AppState>>) -> Json<ReconcileResponse> {
    let outcome = state.engine.on_focus().await;
    state.record_action("focus");
    Json(ReconcileResponse {
        outcome,
        timer: state.engine.status(),
    })
}

/// Handle GET /timer
pub async fn timer_handler(State(state): State<Arc<AppState>>) -> Json<TimerStatus> {
    Json(state.engine.status())
}

/// Handle GET /timer/session - the session as seen on the sync bus
pub async fn session_handler(State(state): State<Arc<AppState>>) -> Json<Option<LiveSessionEvent>> {
    Json(state.engine.active_session())
}

/// Handle GET /status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let (last_action, last_action_time) = state.get_last_action();
    Json(StatusResponse {
        timer: state.engine.status(),
        active_session: state.engine.active_session(),
        origin: state.engine.bus().origin().to_string(),
        uptime: state.get_uptime(),
        port: state.port,
        host: state.host.clone(),
        last_action,
        last_action_time,
    })
}

/// Handle GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
