//! LLM -> TTS bridge (C5).
//!
//! Streams LLM tokens the same way [`crate::agent::llm::OpenRouterClient`]
//! streams chat completions, forwards each token to the client immediately,
//! and segments sentences off the accumulating buffer to kick off TTS
//! synthesis without waiting for the full response.

use crate::agent::llm::{ChatMessage, OpenRouterClient};
use crate::voice_core::config::ProviderConfig;
use crate::voice_core::error::{retry_transient, VoiceError};
use crate::voice_core::playback::PlaybackTracker;
use crate::voice_core::providers::TtsClient;
use crate::voice_core::session::{ConversationState, EgressEvent, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// No audio bytes for this long after the first chunk aborts the stream
/// with `TtsTimeout` (§5: "Provider TTS stream: 20s without bytes after
/// first chunk").
const TTS_CHUNK_TIMEOUT: Duration = Duration::from_secs(20);

pub struct LlmTtsBridge;

impl LlmTtsBridge {
    /// Run one response turn: stream the model's reply, relay tokens to the
    /// client as they arrive, and synthesize+relay audio sentence by
    /// sentence. Returns the full response text once the model finishes.
    pub async fn run(
        session: Arc<SessionHandle>,
        llm: Arc<OpenRouterClient>,
        tts: Arc<TtsClient>,
        provider_config: ProviderConfig,
        language: String,
        model: String,
        messages: Vec<ChatMessage>,
        response_id: String,
    ) -> Result<String, VoiceError> {
        let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();

        let relay_session = session.clone();
        let relay_response_id = response_id.clone();
        let relay_allow_final_audio = provider_config.allow_final_audio;
        let relay_framed = provider_config.kind == crate::voice_core::config::ProviderKind::A;
        let relay = tokio::spawn(async move {
            let mut sentence_buf = String::new();
            let mut tracker = PlaybackTracker::new(relay_response_id.clone(), relay_allow_final_audio, relay_framed);
            let mut first_chunk_delivered = false;
            while let Some(token) = token_rx.recv().await {
                if !first_chunk_delivered {
                    first_chunk_delivered = true;
                    relay_session.set_state(ConversationState::Speaking).await;
                    let _ = relay_session.emit(EgressEvent::ProcessingState { is_processing: false }).await;
                }
                let _ = relay_session
                    .emit(EgressEvent::AiResponseChunk { text: token.clone(), is_final: false })
                    .await;

                sentence_buf.push_str(&token);
                while let Some(boundary) = find_flush_boundary(&sentence_buf) {
                    let sentence: String = sentence_buf.drain(..=boundary).collect();
                    let sentence = sentence.trim().to_string();
                    if !sentence.is_empty() {
                        synth_and_relay(&tts, &provider_config, &language, &relay_session, &relay_response_id, sentence, &mut tracker).await;
                    }
                }
            }

            let tail = sentence_buf.trim().to_string();
            if !tail.is_empty() {
                synth_and_relay(&tts, &provider_config, &language, &relay_session, &relay_response_id, tail, &mut tracker).await;
            }

            let _ = relay_session.emit(EgressEvent::AiResponseChunk { text: String::new(), is_final: true }).await;
            if let crate::voice_core::playback::PlaybackControl::AudioEnded { truncated: true, .. } = tracker.finish() {
                tracing::warn!("tts stream for response {relay_response_id} ended truncated");
            }
        });

        let full_text = llm
            .stream_complete(&model, messages, None, move |chunk| {
                let _ = token_tx.send(chunk.to_string());
            })
            .await
            .map_err(|e| VoiceError::ProviderTransient(e.to_string()))?;

        let _ = relay.await;
        let _ = session.emit(EgressEvent::Response { final_response: full_text.clone() }).await;
        Ok(full_text)
    }
}

async fn synth_and_relay(
    tts: &TtsClient,
    provider_config: &ProviderConfig,
    language: &str,
    session: &SessionHandle,
    response_id: &str,
    text: String,
    tracker: &mut PlaybackTracker,
) {
    let synth_result = retry_transient(|| tts.synthesize(provider_config, text.clone(), None, Some(language.to_string()))).await;
    match synth_result {
        Ok(mut rx) => {
            let mut got_first_chunk = false;
            loop {
                let next = if got_first_chunk {
                    match tokio::time::timeout(TTS_CHUNK_TIMEOUT, rx.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            let _ = session
                                .emit(EgressEvent::Error {
                                    code: VoiceError::TtsTimeout.classify().client_code,
                                    message: VoiceError::TtsTimeout.to_string(),
                                })
                                .await;
                            break;
                        }
                    }
                } else {
                    rx.recv().await
                };

                match next {
                    Some(Ok(c)) => {
                        got_first_chunk = true;
                        let (_, frame) = tracker.push_chunk(&c.bytes);
                        if let Some(frame) = frame {
                            let _ = session.emit(EgressEvent::AudioBytes(frame.bytes)).await;
                        }
                    }
                    Some(Err(e)) => {
                        let class = e.classify();
                        let _ = session
                            .emit(EgressEvent::Error { code: class.client_code, message: e.to_string() })
                            .await;
                        break;
                    }
                    None => break,
                }
            }
        }
        Err(e) => {
            let class = e.classify();
            let _ = session
                .emit(EgressEvent::Error { code: class.client_code, message: e.to_string() })
                .await;
        }
    }
}

/// Minimum buffered length, with no punctuation boundary in sight, at which
/// the bridge flushes to TTS anyway rather than waiting for a sentence end
/// (§4.5: "each chunk of reasonable size (>= 8 characters or ending in
/// `.!?,`) is synthesized immediately").
const MIN_FLUSH_CHARS: usize = 8;

/// Index (inclusive) of the next chunk boundary ready to flush to TTS.
fn find_flush_boundary(buf: &str) -> Option<usize> {
    if let Some((i, _)) = buf.char_indices().find(|(_, c)| matches!(c, '.' | '!' | '?' | ',' | '\n')) {
        return Some(i);
    }
    if buf.chars().count() >= MIN_FLUSH_CHARS {
        return buf.char_indices().last().map(|(i, _)| i);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_boundary_in_short_partial_sentence() {
        assert_eq!(find_flush_boundary("hello"), None);
    }

    #[test]
    fn finds_first_sentence_terminator() {
        assert_eq!(find_flush_boundary("Hi. How are you?"), Some(2));
    }

    #[test]
    fn comma_counts_as_a_boundary() {
        assert_eq!(find_flush_boundary("well,"), Some(4));
    }

    #[test]
    fn newline_counts_as_a_boundary() {
        assert_eq!(find_flush_boundary("line one\nline two"), Some(8));
    }

    #[test]
    fn long_unpunctuated_run_flushes_at_eight_chars() {
        assert_eq!(find_flush_boundary("somewhat long"), Some(12));
    }
}
