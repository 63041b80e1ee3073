//! HTTP control surface.

use crate::session::{CameraSession, ScanLimits, SessionError, StartOutcome, StatusReport};
use attendify_core::{StudentId, StudentRecord};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NO_STUDENTS: &str = "No students data provided";
const NO_VALID_FACES: &str = "No valid student faces detected";
const CAMERA_UNAVAILABLE: &str = "Could not open camera";
const ALREADY_RUNNING: &str = "Camera already running";

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<CameraSession>,
    pub scan_limits: ScanLimits,
}

#[derive(Debug, Deserialize)]
pub struct StudentsRequest {
    #[serde(default)]
    pub students: Vec<StudentRecord>,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: &'static str,
    pub message: String,
    pub detected_student_ids: Vec<StudentId>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub matched_ids: Vec<StudentId>,
}

/// Which JSON shape an error is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorShape {
    /// `{"status": "error", "message": ...}`
    StatusMessage,
    /// `{"error": ...}`
    Bare,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    shape: ErrorShape,
}

impl ApiError {
    fn session(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            shape: ErrorShape::StatusMessage,
        }
    }

    fn bare(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            shape: ErrorShape::Bare,
        }
    }

    fn from_start(err: SessionError) -> Self {
        match err {
            SessionError::InvalidInput(_) => Self::session(StatusCode::BAD_REQUEST, NO_STUDENTS),
            SessionError::NoValidFaces => Self::session(StatusCode::BAD_REQUEST, NO_VALID_FACES),
            SessionError::DeviceUnavailable(_) => Self::session(StatusCode::SERVICE_UNAVAILABLE, CAMERA_UNAVAILABLE),
            SessionError::Busy => Self::session(StatusCode::CONFLICT, ALREADY_RUNNING),
            SessionError::Spawn(e) => Self::session(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    fn from_scan(err: SessionError) -> Self {
        match err {
            SessionError::InvalidInput(_) => Self::bare(StatusCode::BAD_REQUEST, NO_STUDENTS),
            SessionError::NoValidFaces => Self::bare(StatusCode::BAD_REQUEST, NO_VALID_FACES),
            SessionError::DeviceUnavailable(_) => Self::bare(StatusCode::INTERNAL_SERVER_ERROR, CAMERA_UNAVAILABLE),
            SessionError::Busy => Self::bare(StatusCode::CONFLICT, ALREADY_RUNNING),
            SessionError::Spawn(e) => Self::bare(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.shape {
            ErrorShape::StatusMessage => serde_json::json!({ "status": "error", "message": self.message }),
            ErrorShape::Bare => serde_json::json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start-camera", post(start_camera))
        .route("/stop-camera", get(stop_camera))
        .route("/match-faces", post(match_faces))
        .route("/status", get(status))
        .with_state(state)
}

async fn start_camera(
    State(state): State<AppState>,
    body: Result<Json<StudentsRequest>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let Json(request) = body.map_err(|r| {
        tracing::warn!(error = %r.body_text(), "rejected start-camera body");
        ApiError::session(StatusCode::BAD_REQUEST, r.body_text())
    })?;
    tracing::info!(students = request.students.len(), "start-camera requested");

    let session = Arc::clone(&state.session);
    let outcome = tokio::task::spawn_blocking(move || session.start(&request.students))
        .await
        .map_err(|e| ApiError::session(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from_start)?;

    let reply = match outcome {
        StartOutcome::Started(_) => StatusMessage {
            status: "success",
            message: "Camera started with student data".to_string(),
        },
        StartOutcome::AlreadyRunning => StatusMessage {
            status: "info",
            message: ALREADY_RUNNING.to_string(),
        },
    };
    Ok(Json(reply))
}

async fn stop_camera(State(state): State<AppState>) -> Json<StopResponse> {
    let outcome = state.session.stop();
    Json(StopResponse {
        status: "success",
        message: "Stopping camera".to_string(),
        detected_student_ids: outcome.detected,
    })
}

async fn match_faces(
    State(state): State<AppState>,
    body: Result<Json<StudentsRequest>, JsonRejection>,
) -> Result<Json<MatchResponse>, ApiError> {
    let Json(request) = body.map_err(|r| ApiError::bare(StatusCode::BAD_REQUEST, r.body_text()))?;
    tracing::info!(students = request.students.len(), "match-faces requested");

    let session = Arc::clone(&state.session);
    let limits = state.scan_limits;
    let matched_ids = tokio::task::spawn_blocking(move || session.scan_once(&request.students, limits))
        .await
        .map_err(|e| ApiError::bare(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from_scan)?;

    Ok(Json(MatchResponse { matched_ids }))
}

async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.session.status())
}
