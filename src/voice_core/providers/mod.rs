//! External STT/TTS provider adapters (C1).
//!
//! Neither provider runs in-process; both are reached over the network.
//! Provider A speaks a WebSocket duplex for STT and a framed-WAV WebSocket
//! downlink for TTS (see [`super::framing`]). Provider B speaks HTTP/SSE for
//! STT partials and a raw-MP3 HTTP stream for TTS.

pub mod stt;
pub mod tts;

pub use stt::{SttClient, SttEvent};
pub use tts::{TtsChunk, TtsClient};
