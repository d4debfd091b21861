//! Web server module with JWT authentication and the real-time voice
//! conversation endpoints.

pub mod http;
pub mod auth;
pub mod conversation_ws;
pub mod tts_http;

use anyhow::{Result, Context};
use axum::{extract::State, response::Html, routing::{get, post}, Router};
use axum::middleware;
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::server::auth::{AuthState, AuthConfig};
use crate::voice_core::session::SessionTable;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub http_client: Client,
    pub auth_state: Arc<AuthState>,
    pub voice_sessions: Arc<SessionTable>,
    db_session_ids: Arc<AtomicU64>,
}

impl ServerState {
    /// Mint the next process-wide `db_session_id` (§3: "monotonic per
    /// process"). Minted once at handshake and again on each reconnect bind.
    pub fn next_db_session_id(&self) -> u64 {
        self.db_session_ids.fetch_add(1, Ordering::Relaxed)
    }
}

/// Start the web server
pub async fn start(
    host: &str,
    port: u16,
    https: bool,
    cert: Option<String>,
    key: Option<String>,
) -> Result<()> {
    let config = Config::load()?;

    let auth_config = AuthConfig {
        jwt_secret: config.auth.jwt_secret.clone().unwrap_or_else(|| auth::generate_jwt_secret()),
        access_token_expiry_minutes: config.auth.access_token_expiry_minutes,
        refresh_token_expiry_days: config.auth.refresh_token_expiry_days,
        max_login_attempts: config.auth.max_login_attempts,
        lockout_duration_minutes: config.auth.lockout_duration_minutes,
        require_https: config.security.require_https,
    };
    let auth_state = AuthState::new(auth_config);

    let state = ServerState {
        config: Arc::new(config),
        http_client: Client::new(),
        auth_state,
        voice_sessions: SessionTable::new(),
        db_session_ids: Arc::new(AtomicU64::new(1)),
    };

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Protected routes (require JWT auth)
    let protected = Router::new()
        .route("/tts/stream", post(tts_http::tts_stream_handler))
        .layer(middleware::from_fn_with_state(
            state.auth_state.clone(),
            auth::auth_middleware,
        ));

    // Public routes. The WebSocket upgrade can't carry an Authorization
    // header, so `/conversation/stream` validates its token from the query
    // string instead (see conversation_ws::conversation_ws_handler).
    let public = Router::new()
        .route("/", get(index_page))
        .route("/api/auth/login", post(http::login_handler))
        .route("/api/auth/refresh", post(http::refresh_handler))
        .route("/api/auth/logout", post(http::logout_handler))
        .route("/api/status", get(http::status_handler))
        .route("/healthz", get(healthz))
        .route("/conversation/stream", get(conversation_ws::conversation_ws_handler));

    let app = Router::new()
        .merge(protected)
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("     Voice Conversation Server Starting");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("✓ Server binding to: {}", addr);

    if https {
        println!("✓ HTTPS enabled");
    } else {
        println!("⚠ HTTPS disabled");
    }

    println!("✓ JWT authentication enabled");
    println!();
    println!("🚀 Listening on http{}://{}", if https { "s" } else { "" }, addr);
    println!();

    if https {
        if let (Some(cert_path), Some(key_path)) = (cert, key) {
            let cert_data = tokio::fs::read(&cert_path).await
                .context("Failed to read certificate file")?;
            let key_data = tokio::fs::read(&key_path).await
                .context("Failed to read key file")?;

            let config = axum_server::tls_rustls::RustlsConfig::from_pem(cert_data, key_data).await?;
            axum_server::bind_rustls(addr, config).serve(app.into_make_service()).await?;
            return Ok(());
        }
    }

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}

/// Liveness probe: reports whether the process is up and how many voice
/// sessions it currently holds.
async fn healthz(State(state): State<ServerState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "voice_sessions": state.voice_sessions.len().await,
    }))
}

/// Handler for the index page
async fn index_page() -> Html<&'static str> {
    Html(r#"<!DOCTYPE html>
<html>
<head>
    <title>Voice Conversation Server</title>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            max-width: 800px;
            margin: 0 auto;
            padding: 20px;
            background: #1a1a1a;
            color: #e0e0e0;
        }
        h1 { color: #4CAF50; }
        .status {
            background: #2a2a2a;
            padding: 15px;
            border-radius: 8px;
            margin: 20px 0;
        }
        .endpoint {
            background: #333;
            padding: 10px;
            margin: 10px 0;
            border-radius: 4px;
            font-family: monospace;
        }
    </style>
</head>
<body>
    <h1>✅ Voice Conversation Server Running</h1>
    <div class="status">
        <p>Server is active and ready to accept connections.</p>
        <p>JWT Authentication is enabled. Use /api/auth/login to get a token.</p>
    </div>
    <h2>API Endpoints:</h2>
    <div class="endpoint">POST /api/auth/login - Authenticate and get JWT token</div>
    <div class="endpoint">POST /api/auth/refresh - Refresh access token</div>
    <div class="endpoint">POST /api/auth/logout - Revoke current token</div>
    <div class="endpoint">GET /conversation/stream - Real-time voice conversation WebSocket</div>
    <div class="endpoint">POST /tts/stream - Stream synthesized speech for text</div>
    <div class="endpoint">GET /api/status - Server status</div>
    <div class="endpoint">GET /healthz - Liveness probe</div>
</body>
</html>"#)
}
