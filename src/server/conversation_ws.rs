//! `/conversation/stream` WebSocket endpoint: the real-time voice
//! conversation handshake, in the same split-socket + session-table shape
//! the rest of this server uses for its stateful connections. The token
//! travels in the query string because WebSocket upgrades can't carry an
//! `Authorization` header.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::agent::llm::OpenRouterClient;
use crate::server::auth::TokenType;
use crate::server::ServerState;
use crate::voice_core::config::ProviderKind;
use crate::voice_core::orchestrator::ConversationOrchestrator;
use crate::voice_core::providers::TtsClient;
use crate::voice_core::session::{ClientEvent, EgressEvent, SessionHandle};

#[derive(Debug, Deserialize)]
pub struct ConversationConnectParams {
    pub token: String,
}

/// Inbound control messages (JSON text frames). Audio is base64-wrapped
/// inside `audio_chunk`/`final_audio` rather than sent as raw binary (§4.1).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientControlMessage {
    Init {
        session_id: String,
        language: String,
        provider: String,
        #[serde(default)]
        consultation_id: Option<String>,
    },
    AudioChunk {
        #[serde(default)]
        encoding: Option<String>,
        #[serde(default)]
        sample_rate: Option<u32>,
        audio: String,
        #[serde(default)]
        first_chunk: Option<bool>,
        #[serde(default)]
        is_streaming: bool,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        provider: Option<String>,
    },
    FinalAudio {
        audio: String,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        provider: Option<String>,
    },
    Flush,
    Text {
        text: String,
        #[serde(default)]
        use_rag: Option<bool>,
    },
    Ping,
    Stop,
}

/// Outbound control messages (JSON text frames). Audio travels as binary frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerControlMessage {
    ConnectionEstablished {
        db_session_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        consultation_id: Option<String>,
        message: String,
    },
    VadSignal {
        signal_type: &'static str,
    },
    StreamingTranscript {
        transcript: String,
    },
    FinalTranscript {
        transcript: String,
    },
    AiResponseChunk {
        text: String,
        is_final: bool,
    },
    Response {
        final_response: String,
    },
    ProcessingState {
        is_processing: bool,
    },
    Error {
        code: &'static str,
        message: String,
    },
    Pong,
}

pub async fn conversation_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Query(params): Query<ConversationConnectParams>,
) -> Response {
    match state.auth_state.validate_token(&params.token) {
        Ok(claims) if claims.token_type == TokenType::Access => {}
        _ => {
            return axum::response::IntoResponse::into_response((
                axum::http::StatusCode::UNAUTHORIZED,
                "Invalid or expired token",
            ));
        }
    }

    ws.on_upgrade(move |socket| handle_conversation_socket(socket, state))
}

async fn handle_conversation_socket(socket: WebSocket, state: ServerState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Wait for the `init` control message before doing anything else (§4.7).
    let init = match ws_rx.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientControlMessage>(&text) {
            Ok(ClientControlMessage::Init { session_id, language, provider, consultation_id }) => {
                (session_id, language, ProviderKind::from_str_loose(&provider), consultation_id)
            }
            _ => {
                let _ = send_protocol_violation(&mut ws_tx, "expected init message").await;
                return;
            }
        },
        _ => return,
    };
    let (session_id, language, provider_kind, consultation_id) = init;

    let db_session_id = state.next_db_session_id();

    // Resume takes priority: reattach to a live session within its grace window.
    if let Some(handle) = state.voice_sessions.get(&session_id).await {
        let attempt = handle.record_reconnect_attempt().await;
        if attempt > state.config.voice_core.session.max_reconnect_attempts {
            let _ = ws_tx
                .send(control_message(&ServerControlMessage::Error {
                    code: "reconnect_exhausted",
                    message: "too many reconnect attempts".to_string(),
                }))
                .await;
            let _ = close_with_code(&mut ws_tx, 4001, "reconnect attempts exhausted").await;
            return;
        }

        handle.rebind_db_session_id(db_session_id).await;
        let (egress_tx, egress_rx) = mpsc::channel(state.config.voice_core.session.egress_queue_depth);
        handle.reattach(egress_tx).await;
        let _ = ws_tx
            .send(control_message(&ServerControlMessage::ConnectionEstablished {
                db_session_id,
                consultation_id: handle.consultation_id.clone(),
                message: "reconnected".to_string(),
            }))
            .await;

        // The orchestrator spawned on the original connection still owns
        // this session's ingress channel; just resume feeding it.
        run_socket_loops(ws_tx, ws_rx, egress_rx, handle.clone()).await;
        handle.detach().await;
        return;
    }

    let (egress_tx, egress_rx) = mpsc::channel(state.config.voice_core.session.egress_queue_depth);
    let (session, ingress_rx) = SessionHandle::new(
        session_id.clone(),
        provider_kind,
        consultation_id.clone(),
        language.clone(),
        db_session_id,
        egress_tx,
        state.config.voice_core.session.egress_queue_depth,
    );
    state.voice_sessions.insert(session.clone()).await;

    let _ = ws_tx
        .send(control_message(&ServerControlMessage::ConnectionEstablished {
            db_session_id,
            consultation_id,
            message: "connected".to_string(),
        }))
        .await;

    let provider_config = match provider_kind {
        ProviderKind::A => state.config.voice_core.provider_a.clone(),
        ProviderKind::B => state.config.voice_core.provider_b.clone(),
    };

    let llm = match OpenRouterClient::from_keyring() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("no LLM credentials available for voice session {session_id}: {e}");
            let _ = ws_tx
                .send(control_message(&ServerControlMessage::Error {
                    code: "internal_bug",
                    message: "llm credentials unavailable".to_string(),
                }))
                .await;
            let _ = close_with_code(&mut ws_tx, 1011, "llm credentials unavailable").await;
            state.voice_sessions.remove(&session_id).await;
            return;
        }
    };
    let tts = Arc::new(TtsClient::new(state.http_client.clone()));
    let model = default_model();

    let orchestrator = match ConversationOrchestrator::new(
        session.clone(),
        state.config.voice_core.session.clone(),
        state.config.voice_core.vad,
        state.config.voice_core.assembler,
        provider_config,
        language,
        llm,
        tts,
        model,
    )
    .await
    {
        Ok(o) => o,
        Err(e) => {
            let class = e.classify();
            let _ = ws_tx
                .send(control_message(&ServerControlMessage::Error { code: class.client_code, message: e.to_string() }))
                .await;
            if let Some(code) = class.close_code {
                let _ = close_with_code(&mut ws_tx, code, e.to_string()).await;
            }
            state.voice_sessions.remove(&session_id).await;
            return;
        }
    };

    let orchestrator_task = tokio::spawn(orchestrator.run(ingress_rx));

    run_socket_loops(ws_tx, ws_rx, egress_rx, session.clone()).await;

    orchestrator_task.abort();
    state.voice_sessions.remove(&session_id).await;
    info!("voice session {session_id} ended");
}

/// Drive the ingress/egress halves of one WebSocket connection until either
/// side closes. Ingress is always forwarded through the session's own
/// channel: the orchestrator task (spawned once, at session creation) keeps
/// driving that channel across any number of reconnects.
async fn run_socket_loops(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    mut egress_rx: mpsc::Receiver<EgressEvent>,
    session: Arc<SessionHandle>,
) {
    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientControlMessage>(&text) {
                            Ok(ClientControlMessage::AudioChunk { audio, .. }) => {
                                match base64::engine::general_purpose::STANDARD.decode(audio) {
                                    Ok(bytes) => {
                                        let rms = estimate_rms(&bytes);
                                        if !session.send_client_event(ClientEvent::Audio { bytes, rms }).await {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!("bad base64 in audio_chunk: {e}"),
                                }
                            }
                            Ok(ClientControlMessage::FinalAudio { audio, .. }) => {
                                match base64::engine::general_purpose::STANDARD.decode(audio) {
                                    Ok(bytes) => {
                                        let rms = estimate_rms(&bytes);
                                        let _ = session.send_client_event(ClientEvent::Audio { bytes, rms }).await;
                                        let _ = session.send_client_event(ClientEvent::Flush).await;
                                    }
                                    Err(e) => warn!("bad base64 in final_audio: {e}"),
                                }
                            }
                            Ok(ClientControlMessage::Flush) => {
                                let _ = session.send_client_event(ClientEvent::Flush).await;
                            }
                            Ok(ClientControlMessage::Text { text, .. }) => {
                                let _ = session.send_client_event(ClientEvent::Text(text)).await;
                            }
                            Ok(ClientControlMessage::Ping) => {
                                let _ = ws_tx.send(control_message(&ServerControlMessage::Pong)).await;
                            }
                            Ok(ClientControlMessage::Stop) => {
                                let _ = session.send_client_event(ClientEvent::Stop).await;
                            }
                            Ok(ClientControlMessage::Init { .. }) => {}
                            Err(e) => {
                                warn!("unrecognized conversation control message: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("conversation websocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            event = egress_rx.recv() => {
                match event {
                    Some(EgressEvent::VadSignal { signal }) => {
                        let _ = ws_tx.send(control_message(&ServerControlMessage::VadSignal { signal_type: signal })).await;
                    }
                    Some(EgressEvent::StreamingTranscript { transcript }) => {
                        let _ = ws_tx.send(control_message(&ServerControlMessage::StreamingTranscript { transcript })).await;
                    }
                    Some(EgressEvent::FinalTranscript { transcript }) => {
                        let _ = ws_tx.send(control_message(&ServerControlMessage::FinalTranscript { transcript })).await;
                    }
                    Some(EgressEvent::AiResponseChunk { text, is_final }) => {
                        let _ = ws_tx.send(control_message(&ServerControlMessage::AiResponseChunk { text, is_final })).await;
                    }
                    Some(EgressEvent::Response { final_response }) => {
                        let _ = ws_tx.send(control_message(&ServerControlMessage::Response { final_response })).await;
                    }
                    Some(EgressEvent::ProcessingState { is_processing }) => {
                        let _ = ws_tx.send(control_message(&ServerControlMessage::ProcessingState { is_processing })).await;
                    }
                    Some(EgressEvent::AudioBytes(bytes)) => {
                        let _ = ws_tx.send(Message::Binary(bytes.into())).await;
                    }
                    Some(EgressEvent::Error { code, message }) => {
                        let fatal = matches!(code, "auth" | "protocol_violation" | "idle" | "internal_bug");
                        let _ = ws_tx.send(control_message(&ServerControlMessage::Error { code, message: message.clone() })).await;
                        if fatal {
                            let close_code = match code {
                                "auth" => 1008,
                                "protocol_violation" => 4000,
                                "idle" => 4002,
                                _ => 1011,
                            };
                            let _ = close_with_code(&mut ws_tx, close_code, message).await;
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

fn control_message(msg: &ServerControlMessage) -> Message {
    Message::Text(serde_json::to_string(msg).unwrap_or_default().into())
}

async fn send_protocol_violation(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: &str,
) -> Result<(), axum::Error> {
    ws_tx
        .send(control_message(&ServerControlMessage::Error {
            code: "protocol_violation",
            message: message.to_string(),
        }))
        .await?;
    close_with_code(ws_tx, 4000, message).await
}

/// Close the transport with an actual close frame, not just an `error`
/// control message, so the client's WebSocket `onclose` sees the real code.
async fn close_with_code(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: impl Into<String>,
) -> Result<(), axum::Error> {
    ws_tx
        .send(Message::Close(Some(CloseFrame { code, reason: reason.into().into() })))
        .await
}

fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

/// RMS energy of a little-endian 16-bit PCM buffer, scaled to the 0-255
/// range the turn controller's thresholds are tuned against.
fn estimate_rms(samples: &[u8]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let pcm: Vec<i16> = samples
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = pcm.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / pcm.len() as f64).sqrt();
    (rms / i16::MAX as f64 * 255.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_zero_rms() {
        let silence = vec![0u8; 320];
        assert_eq!(estimate_rms(&silence), 0.0);
    }

    #[test]
    fn full_scale_tone_is_near_max_rms() {
        let mut samples = Vec::new();
        for _ in 0..160 {
            samples.extend_from_slice(&i16::MAX.to_le_bytes());
        }
        let rms = estimate_rms(&samples);
        assert!(rms > 250.0, "expected near-max rms, got {rms}");
    }

    #[test]
    fn odd_length_buffer_does_not_panic() {
        assert_eq!(estimate_rms(&[1]), 0.0);
    }

    #[test]
    fn parses_init_message() {
        let raw = r#"{"type":"init","session_id":"s1","language":"en","provider":"a","consultation_id":"42"}"#;
        let msg: ClientControlMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientControlMessage::Init { session_id, .. } if session_id == "s1"));
    }

    #[test]
    fn parses_audio_chunk_message() {
        let raw = r#"{"type":"audio_chunk","encoding":"pcm","sample_rate":16000,"audio":"AAA=","is_streaming":true,"language":"en","provider":"a"}"#;
        let msg: ClientControlMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientControlMessage::AudioChunk { .. }));
    }

    #[test]
    fn parses_final_audio_message() {
        let raw = r#"{"type":"final_audio","audio":"AAA=","language":"en","provider":"b","is_streaming":false}"#;
        let msg: ClientControlMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientControlMessage::FinalAudio { audio, .. } if audio == "AAA="));
    }

    #[test]
    fn parses_flush_text_and_stop_messages() {
        assert!(matches!(
            serde_json::from_str::<ClientControlMessage>(r#"{"type":"flush"}"#).unwrap(),
            ClientControlMessage::Flush
        ));
        assert!(matches!(
            serde_json::from_str::<ClientControlMessage>(r#"{"type":"text","text":"hello"}"#).unwrap(),
            ClientControlMessage::Text { text, .. } if text == "hello"
        ));
        assert!(matches!(
            serde_json::from_str::<ClientControlMessage>(r#"{"type":"stop"}"#).unwrap(),
            ClientControlMessage::Stop
        ));
    }

    #[test]
    fn connection_established_serializes_without_consultation_id_when_absent() {
        let msg = ServerControlMessage::ConnectionEstablished {
            db_session_id: 1,
            consultation_id: None,
            message: "connected".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "connection_established");
        assert_eq!(json["db_session_id"], 1);
        assert!(json.get("consultation_id").is_none());
    }

    #[test]
    fn connection_established_serializes_consultation_id_when_present() {
        let msg = ServerControlMessage::ConnectionEstablished {
            db_session_id: 2,
            consultation_id: Some("c1".to_string()),
            message: "reconnected".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["consultation_id"], "c1");
        assert_eq!(json["message"], "reconnected");
    }

    #[test]
    fn error_message_serializes_with_code_and_message_fields() {
        let msg = ServerControlMessage::Error { code: "idle", message: "session idle".to_string() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "idle");
        assert_eq!(json["message"], "session idle");
    }

    #[test]
    fn vad_signal_serializes_signal_type_field() {
        let msg = ServerControlMessage::VadSignal { signal_type: "START_SPEECH" };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "vad_signal");
        assert_eq!(json["signal_type"], "START_SPEECH");
    }
}
