//! Security module
//!
//! Provides credential handling for the agent:
//! - Secrets management
//! - OS keyring integration

pub mod keyring;
pub mod secrets;

use anyhow::Result;

pub use secrets::{SecretsManager, SecretsConfig, Secret, SecretSource};

/// Set API key in secure keyring
pub fn set_api_key(key: &str) -> Result<()> {
    keyring::set_api_key(key)
}

/// Get API key from secure keyring
pub fn get_api_key() -> Result<String> {
    keyring::get_api_key()
}

/// Delete API key from keyring
pub fn delete_api_key() -> Result<()> {
    keyring::delete_api_key()
}
