//! My Agent - Real-Time Voice Conversation Server
//!
//! A secure, real-time voice/telehealth conversation streaming pipeline:
//! - OpenRouter API integration for LLM calls
//! - Pluggable STT/TTS provider adapters with framed audio downlink
//! - JWT authentication
//!
//! # Example
//!
//! ```ignore
//! use my_agent::agent::llm::OpenRouterClient;
//! use my_agent::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OpenRouterClient::from_keyring()?;
//!     let response = client.chat("Hello!").await?;
//!     println!("{}", response);
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod agent;
pub mod config;
pub mod security;
pub mod server;
pub mod voice_core;
pub mod cli;

// Re-export commonly used types for convenience
pub use agent::llm::OpenRouterClient;

pub use config::Config;

pub use security::{
    set_api_key,
    get_api_key,
    delete_api_key,
};

pub use server::{
    ServerState,
    start as start_server,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Real-Time Voice Conversation Server", NAME, VERSION)
}

/// Truncate a string to `max_len` bytes on a char boundary, for log previews.
pub fn truncate_safe(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_safe_leaves_short_strings_untouched() {
        assert_eq!(truncate_safe("hello", 10), "hello");
    }

    #[test]
    fn truncate_safe_cuts_on_a_char_boundary() {
        let s = "hëllo world";
        let truncated = truncate_safe(s, 3);
        assert!(truncated.ends_with("..."));
    }
}
