//! HTTP request handlers

use super::AppState;
use crate::login::LoginState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::Serialize;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/login", get(login_page))
        .route("/api/status", get(status))
        .route("/api/qr.png", get(qr_png))
        .route("/api/rearm", post(rearm))
        .route("/api/persist", post(persist))
        .with_state(state)
}

async fn health() -> &'static str {
    "chatghost is running"
}

// ============================================================
// Status
// ============================================================

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

fn status_label(state: LoginState) -> &'static str {
    match state {
        LoginState::LoggedIn => "logged_in",
        LoginState::Uninitialized | LoginState::AwaitingQr => "not_logged_in",
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let login_state = state.login.probe_status().await;
    Json(StatusResponse {
        status: status_label(login_state),
    })
}

// ============================================================
// QR retrieval
// ============================================================

async fn qr_png(State(state): State<AppState>) -> Result<Response, AppError> {
    if state.login.probe_status().await == LoginState::LoggedIn {
        return Err(AppError::Conflict("already logged in".to_string()));
    }

    let png = state
        .login
        .capture_qr_image()
        .await
        .map_err(|e| AppError::Unavailable(format!("login code not available: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Self-polling login page: shows the QR, then confirms once the status
/// endpoint reports a login.
async fn login_page(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    if state.login.probe_status().await == LoginState::LoggedIn {
        return Ok(Html(
            "<html><body><h2>Logged in</h2><p>The session is active.</p></body></html>"
                .to_string(),
        ));
    }

    let png = state
        .login
        .capture_qr_image()
        .await
        .map_err(|e| AppError::Unavailable(format!("login code not available: {e}")))?;
    let qr_base64 = base64::engine::general_purpose::STANDARD.encode(png);

    Ok(Html(format!(
        r#"<html>
  <body>
    <div id="content">
      <h2>Scan this code with the chat app</h2>
      <img id="qr" src="data:image/png;base64,{qr_base64}" />
      <div id="status">Waiting for login...</div>
    </div>
    <script>
      const interval = setInterval(async () => {{
        const resp = await fetch('/api/status');
        const data = await resp.json();
        if (data.status === 'logged_in') {{
          clearInterval(interval);
          document.getElementById('content').innerHTML = '<h2>Logged in</h2>';
        }}
      }}, 3000);
    </script>
  </body>
</html>"#
    )))
}

// ============================================================
// Re-arm
// ============================================================

#[derive(Debug, Serialize)]
struct RearmResponse {
    status: &'static str,
}

async fn rearm(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state
        .login
        .rearm()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RearmResponse { status: "rearming" }),
    ))
}

// ============================================================
// On-demand session persist
// ============================================================

#[derive(Debug, Serialize)]
struct PersistResponse {
    persisted_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn persist(State(state): State<AppState>) -> Result<Json<PersistResponse>, AppError> {
    state
        .login
        .persist_now()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(PersistResponse {
        persisted_at: state.login.last_persisted_at().await,
    }))
}

// ============================================================
// Errors
// ============================================================

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

enum AppError {
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
