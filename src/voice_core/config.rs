//! Configuration for the voice conversation core.
//!
//! Follows the same `#[serde(default = "fn")]` composition idiom as
//! [`crate::config::Config`]'s `ModelsConfig`/`BudgetConfig`.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the conversation pipeline, composed into
/// [`crate::config::Config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceCoreConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub provider_a: ProviderConfig,
    #[serde(default)]
    pub provider_b: ProviderConfig,
}

impl Default for VoiceCoreConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            vad: VadConfig::default(),
            assembler: AssemblerConfig::default(),
            provider_a: ProviderConfig::provider_a(),
            provider_b: ProviderConfig::provider_b(),
        }
    }
}

/// Session-lifecycle tunables (§4.7, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds of client silence (no frames at all) before the session closes with `4002`.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Expected client heartbeat interval; purely informational, enforced via idle_timeout.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Depth of the orchestrator->egress bounded channel (§5: "depth >= 64").
    #[serde(default = "default_egress_queue_depth")]
    pub egress_queue_depth: usize,
    /// Grace period after TTS drain before capture resumes (decided open question).
    #[serde(default = "default_resume_grace_ms")]
    pub resume_grace_ms: u64,
    /// Max reconnect attempts the server will still honor a `session_id` for.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Window in which an identical final transcript is deduped (§4.3).
    #[serde(default = "default_final_dedupe_window_ms")]
    pub final_dedupe_window_ms: u64,
}

fn default_idle_timeout_secs() -> u64 {
    120
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_egress_queue_depth() -> usize {
    64
}
fn default_resume_grace_ms() -> u64 {
    300
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_final_dedupe_window_ms() -> u64 {
    3000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            egress_queue_depth: default_egress_queue_depth(),
            resume_grace_ms: default_resume_grace_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            final_dedupe_window_ms: default_final_dedupe_window_ms(),
        }
    }
}

/// VAD & turn controller thresholds (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadConfig {
    /// RMS level (0-255 scale) above which capture starts.
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,
    /// RMS level (0-255 scale) below which the silence timer runs.
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    /// Continuous silence required to finalize an utterance.
    #[serde(default = "default_silence_hold_ms")]
    pub silence_hold_ms: u64,
    /// Hard cap on a single utterance's duration.
    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u64,
    /// Cadence at which samples are evaluated.
    #[serde(default = "default_sample_window_ms")]
    pub sample_window_ms: u64,
}

fn default_speech_threshold() -> f32 {
    35.0
}
fn default_silence_threshold() -> f32 {
    15.0
}
fn default_silence_hold_ms() -> u64 {
    1200
}
fn default_max_utterance_ms() -> u64 {
    180_000
}
fn default_sample_window_ms() -> u64 {
    33
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: default_speech_threshold(),
            silence_threshold: default_silence_threshold(),
            silence_hold_ms: default_silence_hold_ms(),
            max_utterance_ms: default_max_utterance_ms(),
            sample_window_ms: default_sample_window_ms(),
        }
    }
}

/// Utterance assembler tunables (§4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Minimum fraction of the previous partial that must match as a prefix
    /// for a new partial to be treated as a cumulative refinement.
    #[serde(default = "default_cumulative_prefix_ratio")]
    pub cumulative_prefix_ratio: f64,
    /// Window in which a repeated identical final is dropped (ms).
    #[serde(default = "default_final_dedupe_window_ms")]
    pub final_dedupe_window_ms: u64,
}

fn default_cumulative_prefix_ratio() -> f64 {
    0.6
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            cumulative_prefix_ratio: default_cumulative_prefix_ratio(),
            final_dedupe_window_ms: default_final_dedupe_window_ms(),
        }
    }
}

/// Which STT/TTS provider a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderKind {
    /// Indic-multilingual provider; framed-WAV TTS downlink.
    A,
    /// English/Multi provider; raw-MP3 TTS downlink.
    B,
}

impl ProviderKind {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "B" => ProviderKind::B,
            _ => ProviderKind::A,
        }
    }
}

/// Per-provider endpoint/behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub stt_base_url: String,
    pub tts_base_url: String,
    pub api_key: Option<String>,
    /// Whether a `final_audio` control message is honored for this provider
    /// (decided open question: disabled by default for provider A).
    #[serde(default)]
    pub allow_final_audio: bool,
    /// Max buffered frame payload before a TTS stream is considered corrupt.
    #[serde(default = "default_max_frame_payload")]
    pub max_frame_payload: usize,
}

fn default_max_frame_payload() -> usize {
    2 * 1024 * 1024
}

impl ProviderConfig {
    pub fn provider_a() -> Self {
        Self {
            kind: ProviderKind::A,
            stt_base_url: "https://stt-a.example.internal".to_string(),
            tts_base_url: "https://tts-a.example.internal".to_string(),
            api_key: None,
            allow_final_audio: false,
            max_frame_payload: default_max_frame_payload(),
        }
    }

    pub fn provider_b() -> Self {
        Self {
            kind: ProviderKind::B,
            stt_base_url: "https://stt-b.example.internal".to_string(),
            tts_base_url: "https://tts-b.example.internal".to_string(),
            api_key: None,
            allow_final_audio: true,
            max_frame_payload: default_max_frame_payload(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let vad = VadConfig::default();
        assert_eq!(vad.speech_threshold, 35.0);
        assert_eq!(vad.silence_threshold, 15.0);
        assert_eq!(vad.silence_hold_ms, 1200);
        assert_eq!(vad.max_utterance_ms, 180_000);

        let session = SessionConfig::default();
        assert_eq!(session.egress_queue_depth, 64);
        assert_eq!(session.resume_grace_ms, 300);
        assert_eq!(session.idle_timeout_secs, 120);

        let assembler = AssemblerConfig::default();
        assert_eq!(assembler.cumulative_prefix_ratio, 0.6);
    }

    #[test]
    fn provider_defaults_match_open_question_decision() {
        assert!(!ProviderConfig::provider_a().allow_final_audio);
        assert!(ProviderConfig::provider_b().allow_final_audio);
    }

    #[test]
    fn provider_kind_parses_loosely() {
        assert_eq!(ProviderKind::from_str_loose("b"), ProviderKind::B);
        assert_eq!(ProviderKind::from_str_loose("A"), ProviderKind::A);
        assert_eq!(ProviderKind::from_str_loose("weird"), ProviderKind::A);
    }
}
