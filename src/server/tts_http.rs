//! `POST /tts/stream`: synthesize text and stream the resulting audio back
//! as the HTTP response body, chunk by chunk, instead of buffering it.
//!
//! Alternative path to the duplex WebSocket's TTS egress (§6); form-encoded
//! to match the browser client's `fetch` + `FormData` call shape.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use futures_util::stream;
use serde::Deserialize;

use crate::server::ServerState;
use crate::voice_core::config::ProviderKind;
use crate::voice_core::error::retry_transient;
use crate::voice_core::providers::TtsClient;

#[derive(Debug, Deserialize)]
pub struct TtsStreamRequest {
    pub text: String,
    pub language: String,
    pub provider: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub consultation_id: Option<String>,
    #[serde(default)]
    pub session_db_id: Option<u64>,
}

pub async fn tts_stream_handler(State(state): State<ServerState>, Form(req): Form<TtsStreamRequest>) -> Response {
    if req.text.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "text must not be empty").into_response();
    }

    let provider_kind = ProviderKind::from_str_loose(&req.provider);
    let provider_config = match provider_kind {
        ProviderKind::A => state.config.voice_core.provider_a.clone(),
        ProviderKind::B => state.config.voice_core.provider_b.clone(),
    };
    let content_type = match provider_kind {
        ProviderKind::A => "audio/wav",
        ProviderKind::B => "audio/mpeg",
    };

    let tts = TtsClient::new(state.http_client.clone());
    let text = req.text;
    let language = req.language;
    let rx = match retry_transient(|| tts.synthesize(&provider_config, text.clone(), None, Some(language.clone()))).await {
        Ok(rx) => rx,
        Err(e) => {
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    let byte_stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Some(Ok(chunk)) if chunk.bytes.is_empty() && chunk.is_final => return None,
                Some(Ok(chunk)) => return Some((Ok::<Bytes, std::io::Error>(Bytes::from(chunk.bytes)), rx)),
                Some(Err(e)) => {
                    return Some((Err(std::io::Error::other(e.to_string())), rx));
                }
                None => return None,
            }
        }
    });

    let body = Body::from_stream(byte_stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response())
}
