//! TTS provider adapter: turns response text into a stream of audio chunks.
//!
//! Provider A answers over a WebSocket with `"WAVC"`-framed payloads (see
//! [`super::super::framing`]); provider B answers a plain HTTP POST with a
//! raw MP3 byte stream, read the same way [`crate::agent::llm`] reads SSE
//! chunks off `reqwest`'s `bytes_stream`.

use crate::voice_core::config::ProviderConfig;
use crate::voice_core::error::VoiceError;
use crate::voice_core::framing::WavcParser;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// One chunk of synthesized audio ready for playback framing (C6).
#[derive(Debug, Clone)]
pub struct TtsChunk {
    pub bytes: Vec<u8>,
    pub is_final: bool,
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: Option<&'a str>,
    language: &'a str,
}

pub struct TtsClient {
    http: Client,
}

impl TtsClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Synthesize `text` and stream chunks back on the returned channel.
    /// The task is spawned immediately; the receiver half is drained by the
    /// LLM->TTS bridge (C5).
    pub async fn synthesize(
        &self,
        config: &ProviderConfig,
        text: String,
        voice: Option<String>,
        language: Option<String>,
    ) -> Result<mpsc::Receiver<Result<TtsChunk, VoiceError>>, VoiceError> {
        let (tx, rx) = mpsc::channel(32);
        let language = language.unwrap_or_else(|| "en".to_string());

        if is_ws_provider(config) {
            self.spawn_ws_synthesis(config, text, voice, language, tx);
        } else {
            self.spawn_http_synthesis(config, text, voice, language, tx);
        }

        Ok(rx)
    }

    fn spawn_ws_synthesis(
        &self,
        config: &ProviderConfig,
        text: String,
        voice: Option<String>,
        language: String,
        tx: mpsc::Sender<Result<TtsChunk, VoiceError>>,
    ) {
        let url = format!("{}/v1/tts/stream", config.tts_base_url.trim_end_matches('/'));
        let max_frame_payload = config.max_frame_payload;

        tokio::spawn(async move {
            let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx
                        .send(Err(VoiceError::ProviderUnavailable(format!("tts connect: {e}"))))
                        .await;
                    return;
                }
            };

            use futures_util::SinkExt;
            let (mut write, mut read) = ws_stream.split();
            let request = TtsRequest { text: &text, voice: voice.as_deref(), language: &language };
            let Ok(payload) = serde_json::to_string(&request) else {
                let _ = tx
                    .send(Err(VoiceError::InternalBug("tts request serialize".into())))
                    .await;
                return;
            };
            if write.send(WsMessage::Text(payload.into())).await.is_err() {
                let _ = tx
                    .send(Err(VoiceError::ProviderUnavailable("tts send failed".into())))
                    .await;
                return;
            }

            let mut parser = WavcParser::new(max_frame_payload);
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Binary(bytes)) => match parser.push(&bytes) {
                        Ok(frames) => {
                            for frame in frames {
                                if tx
                                    .send(Ok(TtsChunk { bytes: frame.payload, is_final: false }))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            parser.discard_truncated_tail();
            let _ = tx.send(Ok(TtsChunk { bytes: Vec::new(), is_final: true })).await;
        });
    }

    fn spawn_http_synthesis(
        &self,
        config: &ProviderConfig,
        text: String,
        voice: Option<String>,
        language: String,
        tx: mpsc::Sender<Result<TtsChunk, VoiceError>>,
    ) {
        let client = self.http.clone();
        let url = format!("{}/v1/tts", config.tts_base_url.trim_end_matches('/'));
        let api_key = config.api_key.clone();

        tokio::spawn(async move {
            let request = TtsRequest { text: &text, voice: voice.as_deref(), language: &language };
            let mut builder = client.post(&url).json(&request);
            if let Some(key) = &api_key {
                builder = builder.header("Authorization", format!("Bearer {key}"));
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx
                        .send(Err(VoiceError::ProviderUnavailable(format!("tts http: {e}"))))
                        .await;
                    return;
                }
            };
            if !response.status().is_success() {
                let _ = tx
                    .send(Err(VoiceError::ProviderUnavailable(format!(
                        "tts http status {}",
                        response.status()
                    ))))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if tx
                            .send(Ok(TtsChunk { bytes: bytes.to_vec(), is_final: false }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(VoiceError::ProviderTransient(e.to_string()))).await;
                        return;
                    }
                }
            }
            let _ = tx.send(Ok(TtsChunk { bytes: Vec::new(), is_final: true })).await;
        });
    }
}

fn is_ws_provider(config: &ProviderConfig) -> bool {
    matches!(config.kind, crate::voice_core::config::ProviderKind::A)
}
