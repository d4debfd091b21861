//! Conversation orchestrator (C8): drives the `{Idle, Listening, Processing,
//! Speaking, Ended}` state machine and owns the per-session task topology
//! from the concurrency model (ingress, STT relay, bridge, egress, idle
//! watchdog), all driven from one `tokio::select!` loop per session.

use crate::agent::llm::{ChatMessage, OpenRouterClient};
use crate::voice_core::assembler::UtteranceAssembler;
use crate::voice_core::bridge::LlmTtsBridge;
use crate::voice_core::config::{ProviderConfig, SessionConfig, VadConfig};
use crate::voice_core::error::{retry_transient, VoiceError};
use crate::voice_core::providers::{SttClient, SttEvent, TtsClient};
use crate::voice_core::session::{ClientEvent, ConversationState, EgressEvent, SessionHandle};
use crate::voice_core::vad::{EndReason, TurnController, TurnEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pure state transition table for C8. Kept free of I/O so the whole
/// state machine can be exercised without spinning up tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorEvent {
    SpeechStarted,
    UtteranceEnded,
    ResponseReady,
    PlaybackFinished,
    Interrupted,
    IdleTimeout,
    Closed,
}

/// While the agent is thinking or talking, incoming audio must not reach the
/// turn controller or STT at all (barge-in is disabled): speaker bleed-through
/// loud enough to register as speech would otherwise be mistaken for the
/// start of the user's next turn.
pub fn is_capture_suppressed(state: ConversationState) -> bool {
    matches!(state, ConversationState::Processing | ConversationState::Speaking)
}

pub fn next_state(current: ConversationState, event: OrchestratorEvent) -> ConversationState {
    use ConversationState::*;
    use OrchestratorEvent::*;

    match (current, event) {
        (_, Closed) => Ended,
        (Ended, _) => Ended,
        (Idle, SpeechStarted) => Listening,
        (Listening, UtteranceEnded) => Processing,
        (Processing, ResponseReady) => Speaking,
        (Speaking, PlaybackFinished) => Listening,
        (Speaking, Interrupted) => Listening,
        (Idle, IdleTimeout) => Ended,
        // Any other (state, event) pair is not a valid transition; hold.
        (state, _) => state,
    }
}

/// Owns one live session's pipeline: VAD, utterance assembly, STT relay,
/// and LLM->TTS bridging.
pub struct ConversationOrchestrator {
    session: Arc<SessionHandle>,
    session_config: SessionConfig,
    turn: TurnController,
    assembler: UtteranceAssembler,
    stt: SttClient,
    llm: Arc<OpenRouterClient>,
    tts: Arc<TtsClient>,
    provider_config: ProviderConfig,
    language: String,
    model: String,
    current_utterance_id: Option<String>,
    /// Signaled by a spawned response task when its bridge run finishes,
    /// success or failure, so the orchestrator (not the spawned task) owns
    /// the resulting state transition and mute window.
    response_done_tx: mpsc::Sender<()>,
    response_done_rx: mpsc::Receiver<()>,
    /// Capture stays suppressed until this deadline after playback ends,
    /// so the tail of TTS audio bleeding into the mic doesn't get mistaken
    /// for the start of the user's next turn.
    mute_until: Option<TokioInstant>,
}

impl ConversationOrchestrator {
    pub async fn new(
        session: Arc<SessionHandle>,
        session_config: SessionConfig,
        vad_config: VadConfig,
        assembler_config: crate::voice_core::config::AssemblerConfig,
        provider_config: ProviderConfig,
        language: String,
        llm: Arc<OpenRouterClient>,
        tts: Arc<TtsClient>,
        model: String,
    ) -> Result<Self, VoiceError> {
        let connect_config = provider_config.clone();
        let stt = retry_transient(|| SttClient::connect(&connect_config)).await?;
        let (response_done_tx, response_done_rx) = mpsc::channel(4);
        Ok(Self {
            session,
            session_config,
            turn: TurnController::new(vad_config),
            assembler: UtteranceAssembler::new(assembler_config),
            stt,
            llm,
            tts,
            provider_config,
            language,
            model,
            current_utterance_id: None,
            response_done_tx,
            response_done_rx,
            mute_until: None,
        })
    }

    /// Drive the session until the client disconnects, the idle timeout
    /// fires, or an unrecoverable error ends it.
    pub async fn run(mut self, mut client_events: mpsc::Receiver<ClientEvent>) {
        let idle_timeout = Duration::from_secs(self.session_config.idle_timeout_secs);
        let mut idle_deadline = TokioInstant::now() + idle_timeout;

        loop {
            tokio::select! {
                event = client_events.recv() => {
                    match event {
                        Some(ClientEvent::Audio { bytes, rms }) => {
                            idle_deadline = TokioInstant::now() + idle_timeout;
                            self.on_audio(bytes, rms).await;
                        }
                        Some(ClientEvent::Flush) => {
                            idle_deadline = TokioInstant::now() + idle_timeout;
                            if self.turn.force_end().is_some() {
                                self.on_utterance_ended(EndReason::Silence).await;
                            }
                        }
                        Some(ClientEvent::Text(text)) => {
                            idle_deadline = TokioInstant::now() + idle_timeout;
                            self.on_text(text).await;
                        }
                        Some(ClientEvent::Stop) => {
                            info!("voice session {} received stop", self.session.id);
                            break;
                        }
                        None => {
                            info!("voice session {} ingress closed", self.session.id);
                            break;
                        }
                    }
                }
                stt_event = self.stt.recv() => {
                    match stt_event {
                        Some(SttEvent::Partial(text)) => self.on_partial(text).await,
                        Some(SttEvent::Final(text)) => self.on_final(text).await,
                        Some(SttEvent::Disconnected(reason)) => {
                            self.on_stt_disconnected(reason).await;
                        }
                        None => {}
                    }
                }
                _ = self.response_done_rx.recv() => {
                    idle_deadline = TokioInstant::now() + idle_timeout;
                    self.session.set_state(ConversationState::Listening).await;
                    let _ = self.session.emit(EgressEvent::ProcessingState { is_processing: false }).await;
                    self.mute_until = Some(
                        TokioInstant::now() + Duration::from_millis(self.session_config.resume_grace_ms),
                    );
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    info!("voice session {} idle timeout", self.session.id);
                    let _ = self.session.emit(EgressEvent::Error {
                        code: VoiceError::Idle.classify().client_code,
                        message: "session idle".to_string(),
                    }).await;
                    break;
                }
            }

            if self.session.state().await == ConversationState::Ended {
                break;
            }
        }

        self.session.set_state(ConversationState::Ended).await;
    }

    async fn on_audio(&mut self, bytes: Vec<u8>, rms: f32) {
        if let Some(deadline) = self.mute_until {
            if TokioInstant::now() < deadline {
                return;
            }
            self.mute_until = None;
        }

        if is_capture_suppressed(self.session.state().await) {
            return;
        }

        if let Some(event) = self.turn.push_sample(rms) {
            match event {
                TurnEvent::SpeechStarted => self.on_speech_started().await,
                TurnEvent::UtteranceEnded(reason) => self.on_utterance_ended(reason).await,
            }
        }

        if self.session.state().await == ConversationState::Listening {
            if let Err(e) = self.stt.send_audio(bytes).await {
                warn!("failed to forward audio to stt: {e}");
            }
        }
    }

    async fn on_speech_started(&mut self) {
        // Idle covers the first utterance of the session; Listening covers
        // every subsequent one, since playback returns here rather than to
        // Idle. Processing/Speaking/Ended are not valid starting points.
        if matches!(
            self.session.state().await,
            ConversationState::Processing | ConversationState::Speaking | ConversationState::Ended
        ) {
            return;
        }
        let utterance_id = Uuid::new_v4().to_string();
        self.current_utterance_id = Some(utterance_id);
        self.assembler.reset_parts();
        self.session.set_state(ConversationState::Listening).await;
        let _ = self.session.emit(EgressEvent::VadSignal { signal: "START_SPEECH" }).await;
    }

    async fn on_partial(&mut self, text: String) {
        if self.current_utterance_id.is_none() {
            return;
        }
        let caption = self.assembler.push_partial(&text);
        let _ = self.session.emit(EgressEvent::StreamingTranscript { transcript: caption }).await;
    }

    async fn on_final(&mut self, text: String) {
        let Some(utterance_id) = self.current_utterance_id.clone() else { return };
        let selected = self.assembler.select_final(&text);
        if !self.assembler.accept_final(&selected, std::time::Instant::now()) {
            debug!("dropped duplicate final transcript for utterance {utterance_id}");
            return;
        }

        let _ = self
            .session
            .emit(EgressEvent::FinalTranscript { transcript: selected.clone() })
            .await;

        self.session.set_state(ConversationState::Processing).await;
        let _ = self.session.emit(EgressEvent::ProcessingState { is_processing: true }).await;
        self.spawn_response(selected).await;
    }

    /// A `{type:"text"}` control message bypasses STT/VAD entirely and goes
    /// straight to the LLM, for a text-only turn.
    async fn on_text(&mut self, text: String) {
        if matches!(
            self.session.state().await,
            ConversationState::Processing | ConversationState::Speaking | ConversationState::Ended
        ) {
            return;
        }
        self.session.set_state(ConversationState::Processing).await;
        let _ = self.session.emit(EgressEvent::ProcessingState { is_processing: true }).await;
        self.spawn_response(text).await;
    }

    async fn on_utterance_ended(&mut self, _reason: EndReason) {
        let _ = self.session.emit(EgressEvent::VadSignal { signal: "END_SPEECH" }).await;
        // The STT provider emits the authoritative final; nothing further to
        // do here beyond leaving Listening until `on_final` advances state.
    }

    /// Mid-utterance provider disconnect: try to reconnect within the
    /// `ProviderTransient` retry budget before giving up on this turn.
    async fn on_stt_disconnected(&mut self, reason: String) {
        warn!("stt disconnected for session {}: {reason}", self.session.id);
        if self.current_utterance_id.is_none() {
            let _ = self
                .session
                .emit(EgressEvent::Error { code: "provider_unavailable", message: reason })
                .await;
            return;
        }

        let reconnect_config = self.provider_config.clone();
        match retry_transient(|| SttClient::connect(&reconnect_config)).await {
            Ok(stt) => {
                self.stt = stt;
            }
            Err(e) => {
                let class = e.classify();
                let _ = self
                    .session
                    .emit(EgressEvent::Error { code: class.client_code, message: e.to_string() })
                    .await;
            }
        }
    }

    async fn spawn_response(&mut self, user_text: String) {
        let response_id = Uuid::new_v4().to_string();
        let session = self.session.clone();
        let llm = self.llm.clone();
        let tts = self.tts.clone();
        let provider_config = self.provider_config.clone();
        let language = self.language.clone();
        let model = self.model.clone();
        let messages = vec![ChatMessage::user(user_text)];
        let done_tx = self.response_done_tx.clone();

        // Speaking is entered by the bridge itself, once the first LLM
        // token actually reaches it (§4.8: "first LLM chunk delivered to
        // C5"), not here at dispatch time.
        tokio::spawn(async move {
            if let Err(e) =
                LlmTtsBridge::run(session.clone(), llm, tts, provider_config, language, model, messages, response_id).await
            {
                let class = e.classify();
                let _ = session.emit(EgressEvent::Error { code: class.client_code, message: e.to_string() }).await;
            }
            let _ = done_tx.send(()).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_listening_on_speech_started() {
        assert_eq!(
            next_state(ConversationState::Idle, OrchestratorEvent::SpeechStarted),
            ConversationState::Listening
        );
    }

    #[test]
    fn listening_to_processing_on_utterance_ended() {
        assert_eq!(
            next_state(ConversationState::Listening, OrchestratorEvent::UtteranceEnded),
            ConversationState::Processing
        );
    }

    #[test]
    fn processing_to_speaking_on_response_ready() {
        assert_eq!(
            next_state(ConversationState::Processing, OrchestratorEvent::ResponseReady),
            ConversationState::Speaking
        );
    }

    #[test]
    fn speaking_interrupt_returns_to_listening() {
        assert_eq!(
            next_state(ConversationState::Speaking, OrchestratorEvent::Interrupted),
            ConversationState::Listening
        );
    }

    #[test]
    fn any_state_closes_to_ended() {
        for state in [
            ConversationState::Idle,
            ConversationState::Listening,
            ConversationState::Processing,
            ConversationState::Speaking,
        ] {
            assert_eq!(next_state(state, OrchestratorEvent::Closed), ConversationState::Ended);
        }
    }

    #[test]
    fn ended_is_terminal() {
        assert_eq!(
            next_state(ConversationState::Ended, OrchestratorEvent::SpeechStarted),
            ConversationState::Ended
        );
    }

    #[test]
    fn invalid_transition_holds_current_state() {
        assert_eq!(
            next_state(ConversationState::Idle, OrchestratorEvent::ResponseReady),
            ConversationState::Idle
        );
    }

    #[test]
    fn no_direct_idle_to_speaking() {
        assert_eq!(
            next_state(ConversationState::Idle, OrchestratorEvent::ResponseReady),
            ConversationState::Idle
        );
    }

    #[test]
    fn capture_suppressed_while_processing_or_speaking() {
        assert!(is_capture_suppressed(ConversationState::Processing));
        assert!(is_capture_suppressed(ConversationState::Speaking));
    }

    #[test]
    fn capture_allowed_while_idle_or_listening() {
        assert!(!is_capture_suppressed(ConversationState::Idle));
        assert!(!is_capture_suppressed(ConversationState::Listening));
        assert!(!is_capture_suppressed(ConversationState::Ended));
    }
}
