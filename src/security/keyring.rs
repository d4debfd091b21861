//! Keyring integration for secure API key storage
//! Falls back to file storage if keyring is unavailable

use anyhow::{Result, Context};
use std::path::PathBuf;
use std::fs;

const SERVICE_NAME: &str = "my-agent";
const API_KEY_USERNAME: &str = "openrouter-api-key";
const API_KEY_FILE: &str = "api_key.txt";

/// Get the path for the fallback API key file
fn api_key_file_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "my-agent", "my-agent")
        .context("Failed to get project directories")?;
    let dir = base.config_dir();
    fs::create_dir_all(dir).context("Failed to create config directory")?;
    Ok(dir.join(API_KEY_FILE))
}

/// Set API key - tries keyring first, falls back to file
pub fn set_api_key(key: &str) -> Result<()> {
    // Try keyring first
    match keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        Ok(entry) => {
            if entry.set_password(key).is_ok() {
                // Also save to file as backup in case keyring retrieval fails
                let _ = save_to_file(key);
                return Ok(());
            }
        }
        Err(_) => {}
    }

    // Fallback to file storage
    save_to_file(key)?;
    println!("Note: Using file-based storage (keyring unavailable)");
    Ok(())
}

fn save_to_file(key: &str) -> Result<()> {
    let path = api_key_file_path()?;
    fs::write(&path, key).context("Failed to write API key file")?;

    // Set restrictive permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }

    Ok(())
}

/// Get API key - tries keyring first, falls back to file
pub fn get_api_key() -> Result<String> {
    // Try keyring first
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        if let Ok(key) = entry.get_password() {
            return Ok(key);
        }
    }

    // Fallback to file
    let path = api_key_file_path()?;
    let key = fs::read_to_string(&path)
        .context("Failed to read API key. Run 'my-agent config --set-api-key YOUR_KEY' first.")?;
    Ok(key.trim().to_string())
}

/// Delete API key from both keyring and file
pub fn delete_api_key() -> Result<()> {
    // Try to delete from keyring
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        let _ = entry.delete_credential();
    }

    // Delete file
    let path = api_key_file_path()?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to delete API key file")?;
    }

    Ok(())
}

/// Check if API key is set (in either keyring or file)
pub fn has_api_key() -> bool {
    // Check keyring
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, API_KEY_USERNAME) {
        if entry.get_password().is_ok() {
            return true;
        }
    }

    // Check file
    if let Ok(path) = api_key_file_path() {
        if path.exists() {
            return true;
        }
    }

    false
}

