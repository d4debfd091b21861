//! Real-time voice conversation pipeline.
//!
//! Talks to external STT/TTS providers over the network rather than running
//! inference in-process (contrast with [`crate::voice`], which wraps local
//! Whisper/Piper/Silero models for the desktop assistant).

pub mod assembler;
pub mod bridge;
pub mod config;
pub mod error;
pub mod framing;
pub mod orchestrator;
pub mod playback;
pub mod providers;
pub mod session;
pub mod vad;

pub use config::VoiceCoreConfig;
pub use error::VoiceError;
pub use session::SessionTable;
