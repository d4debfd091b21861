//! STT provider adapter: streams outbound audio frames over a WebSocket and
//! yields partial/final transcript events, in the `connect_async` +
//! `tokio::select!` read/write-task shape used for the Socket Mode client.

use crate::voice_core::config::ProviderConfig;
use crate::voice_core::error::VoiceError;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// Close the provider stream if no audio arrives for this long (§5: "Provider
/// STT idle: 20s without audio -> close stream").
const STT_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// A transcript event emitted by the provider's STT stream.
#[derive(Debug, Clone)]
pub enum SttEvent {
    Partial(String),
    Final(String),
    /// The provider closed the stream or reported a transient fault.
    Disconnected(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SttWireEvent {
    Partial { text: String },
    Final { text: String },
    Error { message: String },
}

/// A live connection to the STT provider for one utterance-capable session.
pub struct SttClient {
    audio_tx: mpsc::Sender<Vec<u8>>,
    event_rx: mpsc::Receiver<SttEvent>,
}

impl SttClient {
    /// Open the duplex stream. Audio pushed via [`SttClient::send_audio`] is
    /// forwarded to the provider; events arrive via [`SttClient::recv`].
    pub async fn connect(config: &ProviderConfig) -> Result<Self, VoiceError> {
        let url = format!("{}/v1/stt/stream", config.stt_base_url.trim_end_matches('/'));
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| VoiceError::ProviderUnavailable(format!("stt connect: {e}")))?;

        let (mut write, mut read) = ws_stream.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (event_tx, event_rx) = mpsc::channel::<SttEvent>(64);

        tokio::spawn(async move {
            let mut idle_deadline = TokioInstant::now() + STT_IDLE_TIMEOUT;
            loop {
                tokio::select! {
                    audio = audio_rx.recv() => {
                        match audio {
                            Some(bytes) => {
                                idle_deadline = TokioInstant::now() + STT_IDLE_TIMEOUT;
                                if write.send(WsMessage::Binary(bytes.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.send(WsMessage::Close(None)).await;
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(idle_deadline) => {
                        debug!("stt stream idle for {}s, closing", STT_IDLE_TIMEOUT.as_secs());
                        let _ = write.send(WsMessage::Close(None)).await;
                        let _ = event_tx.send(SttEvent::Disconnected("idle timeout".into())).await;
                        break;
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                match serde_json::from_str::<SttWireEvent>(&text) {
                                    Ok(SttWireEvent::Partial { text }) => {
                                        let _ = event_tx.send(SttEvent::Partial(text)).await;
                                    }
                                    Ok(SttWireEvent::Final { text }) => {
                                        let _ = event_tx.send(SttEvent::Final(text)).await;
                                    }
                                    Ok(SttWireEvent::Error { message }) => {
                                        let _ = event_tx.send(SttEvent::Disconnected(message)).await;
                                        break;
                                    }
                                    Err(e) => {
                                        debug!("unrecognized stt event: {e}");
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                let _ = event_tx.send(SttEvent::Disconnected("stream closed".into())).await;
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("stt stream error: {e}");
                                let _ = event_tx.send(SttEvent::Disconnected(e.to_string())).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(Self { audio_tx, event_rx })
    }

    /// Forward one chunk of client audio to the provider.
    pub async fn send_audio(&self, bytes: Vec<u8>) -> Result<(), VoiceError> {
        self.audio_tx
            .send(bytes)
            .await
            .map_err(|_| VoiceError::ProviderTransient("stt audio channel closed".into()))
    }

    /// Await the next transcript event.
    pub async fn recv(&mut self) -> Option<SttEvent> {
        self.event_rx.recv().await
    }
}
