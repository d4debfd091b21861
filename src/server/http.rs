//! HTTP server handlers with JWT authentication

use axum::{
    extract::{State, Json},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;

use crate::server::ServerState;
use crate::server::auth::{
    LoginRequest, LoginResponse, RefreshRequest, LogoutRequest,
    TokenType
};

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub auth_enabled: bool,
}

/// JWT Login handler
pub async fn login_handler(
    State(state): State<ServerState>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let permissions = vec!["read".to_string(), "write".to_string()];

    let access_token = match state.auth_state.generate_access_token(&req.username, &permissions) {
        Ok(token) => token,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to generate access token",
                    "details": e.to_string()
                }))
            ).into_response();
        }
    };

    let refresh_token = match state.auth_state.generate_refresh_token(&req.username) {
        Ok(token) => token,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to generate refresh token",
                    "details": e.to_string()
                }))
            ).into_response();
        }
    };

    let response = LoginResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.auth.access_token_expiry_minutes * 60,
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// JWT Refresh handler
pub async fn refresh_handler(
    State(state): State<ServerState>,
    Json(req): Json<RefreshRequest>,
) -> impl IntoResponse {
    let claims = match state.auth_state.validate_token(&req.refresh_token) {
        Ok(claims) => claims,
        Err(e) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "Invalid refresh token",
                    "details": e.to_string()
                }))
            ).into_response();
        }
    };

    if claims.token_type != TokenType::Refresh {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid token type" }))
        ).into_response();
    }

    let _ = state.auth_state.revoke_token(&claims.jti);

    let permissions = vec!["read".to_string(), "write".to_string()];

    let access_token = match state.auth_state.generate_access_token(&claims.sub, &permissions) {
        Ok(token) => token,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to generate access token",
                    "details": e.to_string()
                }))
            ).into_response();
        }
    };

    let refresh_token = match state.auth_state.generate_refresh_token(&claims.sub) {
        Ok(token) => token,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to generate refresh token",
                    "details": e.to_string()
                }))
            ).into_response();
        }
    };

    let response = LoginResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.auth.access_token_expiry_minutes * 60,
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// JWT Logout handler
pub async fn logout_handler(
    State(state): State<ServerState>,
    Json(req): Json<LogoutRequest>,
) -> impl IntoResponse {
    match state.auth_state.extract_jti(&req.token) {
        Ok(jti) => {
            let _ = state.auth_state.revoke_token(&jti);
            (StatusCode::OK, Json(json!({ "message": "Logged out successfully" }))).into_response()
        }
        Err(e) => {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid token",
                    "details": e.to_string()
                }))
            ).into_response()
        }
    }
}

/// Status handler
pub async fn status_handler(
    State(_state): State<ServerState>,
) -> impl IntoResponse {
    let response = StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        auth_enabled: true,
    };

    (StatusCode::OK, Json(response)).into_response()
}
