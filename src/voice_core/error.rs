//! Error taxonomy for the real-time voice conversation core.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the conversation pipeline (C1-C8).
///
/// Each variant maps to a client-visible `error.code` and, where the error
/// is fatal to the session, a WebSocket close code via [`VoiceError::classify`].
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Bad or expired credential at handshake.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed control message, unknown `type`, or binary before `init`.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// STT/TTS provider connect or auth failure.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Mid-stream provider disconnect, retryable within budget.
    #[error("provider transient error: {0}")]
    ProviderTransient(String),

    /// Framing parse failure (see §4.1).
    #[error("tts protocol error: {0}")]
    TtsProtocolError(String),

    /// No TTS bytes for 20s after the first chunk.
    #[error("tts timed out waiting for audio")]
    TtsTimeout,

    /// Egress queue saturated beyond tolerance.
    #[error("backpressure: egress queue saturated")]
    Backpressure,

    /// No client activity within the idle timeout.
    #[error("session idle")]
    Idle,

    /// Invariant violation; caught, logged, session ended.
    #[error("internal error: {0}")]
    InternalBug(String),
}

/// Whether a session must be torn down for a given error, and the codes
/// used to report it to the client and the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClass {
    /// WebSocket close code, if the error is fatal to the session.
    pub close_code: Option<u16>,
    /// Machine-readable code sent in `{type:"error", code, ...}`.
    pub client_code: &'static str,
    /// Whether the orchestrator should return to `Listening` after reporting.
    pub recoverable: bool,
}

impl VoiceError {
    /// Classify this error per the propagation policy in the design notes.
    pub fn classify(&self) -> ErrorClass {
        match self {
            VoiceError::Auth(_) => ErrorClass {
                close_code: Some(1008),
                client_code: "auth",
                recoverable: false,
            },
            VoiceError::ProtocolViolation(_) => ErrorClass {
                close_code: Some(4000),
                client_code: "protocol_violation",
                recoverable: false,
            },
            VoiceError::ProviderUnavailable(_) => ErrorClass {
                close_code: Some(4001),
                client_code: "provider_unavailable",
                recoverable: true,
            },
            VoiceError::ProviderTransient(_) => ErrorClass {
                close_code: None,
                client_code: "provider_transient",
                recoverable: true,
            },
            VoiceError::TtsProtocolError(_) => ErrorClass {
                close_code: None,
                client_code: "tts_protocol_error",
                recoverable: true,
            },
            VoiceError::TtsTimeout => ErrorClass {
                close_code: None,
                client_code: "tts_timeout",
                recoverable: true,
            },
            VoiceError::Backpressure => ErrorClass {
                close_code: None,
                client_code: "backpressure",
                recoverable: true,
            },
            VoiceError::Idle => ErrorClass {
                close_code: Some(4002),
                client_code: "idle",
                recoverable: false,
            },
            VoiceError::InternalBug(_) => ErrorClass {
                close_code: Some(1011),
                client_code: "internal_bug",
                recoverable: false,
            },
        }
    }
}

/// Retries up to which a `ProviderTransient` failure is recovered locally
/// within one utterance before it is escalated to `ProviderUnavailable`.
pub const MAX_PROVIDER_TRANSIENT_RETRIES: u32 = 2;
pub const PROVIDER_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Run `attempt` up to `1 + MAX_PROVIDER_TRANSIENT_RETRIES` times, sleeping
/// `PROVIDER_RETRY_BACKOFF` between tries, as long as it keeps failing with
/// `ProviderTransient`. Any other error, or exhausting the retry budget,
/// surfaces as `ProviderUnavailable` so the caller always sees a terminal
/// verdict for this utterance.
pub async fn retry_transient<F, Fut, T>(mut attempt: F) -> Result<T, VoiceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, VoiceError>>,
{
    let mut tries = 0;
    loop {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(VoiceError::ProviderTransient(msg)) if tries < MAX_PROVIDER_TRANSIENT_RETRIES => {
                tries += 1;
                tokio::time::sleep(PROVIDER_RETRY_BACKOFF).await;
                tracing::debug!(
                    "retrying after provider transient error ({tries}/{MAX_PROVIDER_TRANSIENT_RETRIES}): {msg}"
                );
            }
            Err(VoiceError::ProviderTransient(msg)) => return Err(VoiceError::ProviderUnavailable(msg)),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_fatal_with_policy_violation_code() {
        let class = VoiceError::Auth("bad token".into()).classify();
        assert_eq!(class.close_code, Some(1008));
        assert!(!class.recoverable);
    }

    #[test]
    fn provider_transient_is_recoverable_with_no_close() {
        let class = VoiceError::ProviderTransient("disconnect".into()).classify();
        assert_eq!(class.close_code, None);
        assert!(class.recoverable);
    }

    #[test]
    fn idle_closes_with_4002() {
        assert_eq!(VoiceError::Idle.classify().close_code, Some(4002));
    }

    #[test]
    fn tts_protocol_error_is_recoverable_with_no_close() {
        let class = VoiceError::TtsProtocolError("oversize frame".into()).classify();
        assert_eq!(class.client_code, "tts_protocol_error");
        assert_eq!(class.close_code, None);
        assert!(class.recoverable);
    }

    #[tokio::test]
    async fn retry_transient_succeeds_after_one_failure() {
        let mut calls = 0;
        let result = retry_transient(|| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    Err(VoiceError::ProviderTransient("blip".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn retry_transient_escalates_after_budget_exhausted() {
        let mut calls = 0;
        let result: Result<(), VoiceError> = retry_transient(|| {
            calls += 1;
            async move { Err(VoiceError::ProviderTransient("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(VoiceError::ProviderUnavailable(_))));
        assert_eq!(calls, 1 + MAX_PROVIDER_TRANSIENT_RETRIES);
    }

    #[tokio::test]
    async fn retry_transient_does_not_retry_other_errors() {
        let mut calls = 0;
        let result: Result<(), VoiceError> = retry_transient(|| {
            calls += 1;
            async move { Err(VoiceError::TtsTimeout) }
        })
        .await;
        assert!(matches!(result, Err(VoiceError::TtsTimeout)));
        assert_eq!(calls, 1);
    }
}
