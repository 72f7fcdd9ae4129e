//! Defines the Axum API routes and handlers.

use crate::web::models::{GcodeCommandRequest, AuthRequest, AuthResponse, TokenCheckResponse};
use crate::web::printer_channel::PrinterRequest;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use axum::response::IntoResponse;
use serde_json::json;
use tokio::sync::mpsc::Sender;

use jsonwebtoken::{encode, decode, DecodingKey, EncodingKey, Header, Validation, Algorithm};
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// For demo: simple in-memory user store and secret key
static SECRET_KEY: &[u8] = b"super_secret_key_change_me";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

type UserStore = Arc<Mutex<HashMap<String, String>>>;

pub struct AppStateInner {
    pub printer_tx: Sender<PrinterRequest>,
    pub users: UserStore,
}
pub type AppState = Arc<AppStateInner>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(printer_tx: Sender<PrinterRequest>) -> Router {
    let users = Arc::new(Mutex::new(HashMap::from([
        ("admin".to_string(), "password".to_string()),
    ])));
    let state = Arc::new(AppStateInner { printer_tx, users });
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/gcode", post(execute_gcode))
        .route("/api/v1/pause", post(pause_handler))
        .route("/api/v1/resume", post(resume_handler))
        .route("/api/v1/cancel", post(cancel_handler))
        // Webhook aliases named in the external interface table: each runs
        // the same underlying g-code (PAUSE/RESUME/CANCEL_PRINT) as the
        // /api/v1 routes above.
        .route("/pause_resume/pause", post(pause_handler))
        .route("/pause_resume/resume", post(resume_handler))
        .route("/pause_resume/cancel", post(cancel_handler))
        .route("/api/v1/auth/login", post(auth_login))
        .route("/api/v1/auth/check", get(auth_check))
        .with_state(state)
}

/// Handler to get the current status of the printer.
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    if state.printer_tx.send(PrinterRequest::GetStatus { respond_to: resp_tx }).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Failed to send status request" }))).into_response();
    }
    match resp_rx.await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Status response error" }))).into_response(),
    }
}

/// Handler to execute a single G-code command.
async fn execute_gcode(
    State(state): State<AppState>,
    Json(payload): Json<GcodeCommandRequest>,
) -> Result<StatusCode, StatusCode> {
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    if state.printer_tx
        .send(PrinterRequest::ExecuteGcode {
            command: payload.command,
            respond_to: resp_tx,
        })
        .await
        .is_err()
    {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    match resp_rx.await {
        Ok(Ok(_)) => Ok(StatusCode::OK),
        Ok(Err(_)) | Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Pause the current print job.
async fn pause_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    if state.printer_tx.send(PrinterRequest::PauseJob { respond_to: resp_tx }).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Failed to send pause request" }))).into_response();
    }
    match resp_rx.await {
        Ok(Ok(_)) => (StatusCode::OK, Json(json!({ "result": "ok" }))).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Pause response error" }))).into_response(),
    }
}

/// Resume a paused print job.
async fn resume_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    if state.printer_tx.send(PrinterRequest::ResumeJob { respond_to: resp_tx }).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Failed to send resume request" }))).into_response();
    }
    match resp_rx.await {
        Ok(Ok(_)) => (StatusCode::OK, Json(json!({ "result": "ok" }))).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Resume response error" }))).into_response(),
    }
}

/// Cancel the current print job.
async fn cancel_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    if state.printer_tx.send(PrinterRequest::CancelJob { respond_to: resp_tx }).await.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Failed to send cancel request" }))).into_response();
    }
    match resp_rx.await {
        Ok(Ok(_)) => (StatusCode::OK, Json(json!({ "result": "ok" }))).into_response(),
        Ok(Err(e)) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "Cancel response error" }))).into_response(),
    }
}

/// POST /api/v1/auth/login
async fn auth_login(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> impl IntoResponse {
    let users = state.users.lock().unwrap();
    if let Some(stored_pw) = users.get(&payload.username) {
        if stored_pw == &payload.password {
            // Create JWT
            let expiration = chrono::Utc::now().timestamp() as usize + 3600; // 1 hour
            let claims = Claims { sub: payload.username.clone(), exp: expiration };
            let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET_KEY)).unwrap();
            return (StatusCode::OK, Json(AuthResponse { token })).into_response();
        }
    }
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid username or password" }))).into_response()
}

/// GET /api/v1/auth/check
async fn auth_check(
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> impl IntoResponse {
    let token = auth.token();
    let validation = Validation::new(Algorithm::HS256);
    let result = decode::<Claims>(token, &DecodingKey::from_secret(SECRET_KEY), &validation);
    let valid = result.is_ok();
    (StatusCode::OK, Json(TokenCheckResponse { valid })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_router::PrinterStatus;
    use crate::print_stats::PrintStatsStatus;
    use crate::virtual_sd::ExecutorStatus;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn fake_status() -> PrinterStatus {
        PrinterStatus {
            executor: ExecutorStatus::default(),
            print_stats: PrintStatsStatus {
                state: crate::print_stats::PrintState::Standby,
                filename: None,
                print_duration: 0.0,
                total_duration: 0.0,
                filament_used: 0.0,
                message: None,
            },
            is_paused: false,
        }
    }

    /// Spawns a task that answers every request on `printer_tx` with
    /// canned responses, standing in for the real `Printer` behind the
    /// channel so the router can be exercised without booting hardware.
    fn spawn_stub_printer() -> Sender<PrinterRequest> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<PrinterRequest>(8);
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                match req {
                    PrinterRequest::GetStatus { respond_to } => {
                        let _ = respond_to.send(fake_status());
                    }
                    PrinterRequest::ExecuteGcode { respond_to, .. }
                    | PrinterRequest::PauseJob { respond_to }
                    | PrinterRequest::ResumeJob { respond_to }
                    | PrinterRequest::CancelJob { respond_to } => {
                        let _ = respond_to.send(Ok(()));
                    }
                }
            }
        });
        tx
    }

    #[tokio::test]
    async fn status_route_returns_composed_status() {
        let router = create_router(spawn_stub_printer());
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/status")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["is_paused"], false);
    }

    #[tokio::test]
    async fn pause_resume_webhook_aliases_reach_the_printer_task() {
        let router = create_router(spawn_stub_printer());
        for path in ["/pause_resume/pause", "/pause_resume/resume", "/pause_resume/cancel"] {
            let response = router
                .clone()
                .oneshot(
                    axum::http::Request::builder()
                        .method("POST")
                        .uri(path)
                        .body(axum::body::Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path} did not return 200");
        }
    }

    #[tokio::test]
    async fn auth_check_rejects_a_garbage_bearer_token() {
        let router = create_router(spawn_stub_printer());
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/auth/check")
                    .header("authorization", "Bearer not-a-real-token")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let check: TokenCheckResponse = serde_json::from_slice(&body).unwrap();
        assert!(!check.valid);
    }
}