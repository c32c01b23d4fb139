//! Interactive three-stage Telegram login: phone, one-time code, optional
//! two-factor password.
//!
//! Success persists the session token to `telegram/session/session.string`;
//! failure leaves no state behind.

use std::path::Path;

use base64::Engine as _;
use grammers_client::{Client, SignInError};
use grammers_session::Session;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::providers::ProviderError;

/// Load the persisted session token, if one exists.
///
/// The token file is UTF-8 base64, trimmed on load. A malformed token is
/// treated as absent so a corrupt file cannot wedge startup.
pub fn load_session(path: &Path) -> Option<Session> {
    let contents = std::fs::read_to_string(path).ok()?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(contents.trim())
        .ok()?;
    Session::load(&bytes).ok()
}

/// Persist the session token as base64 text.
///
/// # Errors
///
/// Returns an error when the directory or file cannot be written.
pub fn save_session(session: &Session, path: &Path) -> Result<(), ProviderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ProviderError::Internal(format!("session dir unwritable: {e}")))?;
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(session.save());
    std::fs::write(path, encoded)
        .map_err(|e| ProviderError::Internal(format!("session token unwritable: {e}")))?;
    Ok(())
}

/// Erase the persisted token, both preferred and legacy locations.
pub fn erase_session(preferred: &Path, legacy: &Path) {
    for path in [preferred, legacy] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Drive the interactive login flow on an already-connected client.
///
/// # Errors
///
/// Returns [`ProviderError::Auth`] for invalid codes or passwords and
/// transport errors for connectivity failures. No session token is written
/// on any failure path.
pub async fn run_login(client: &Client, session_path: &Path) -> Result<(), ProviderError> {
    if client
        .is_authorized()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?
    {
        info!("Telegram session already authorised");
        return Ok(());
    }

    let phone = prompt("Phone number (international format): ").await?;
    let token = client
        .request_login_code(&phone)
        .await
        .map_err(|e| ProviderError::Auth(format!("login code request failed: {e}")))?;

    let code = prompt("Login code (sent in-app): ").await?;
    match client.sign_in(&token, &code).await {
        Ok(user) => {
            info!(user_id = user.id(), "Telegram login complete");
        }
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = prompt("Two-factor password: ").await?;
            let user = client
                .check_password(password_token, password.trim())
                .await
                .map_err(|e| ProviderError::Auth(format!("password check failed: {e}")))?;
            info!(user_id = user.id(), "Telegram login complete (2FA)");
        }
        Err(SignInError::InvalidCode) => {
            return Err(ProviderError::Auth("invalid login code".to_owned()));
        }
        Err(e) => {
            return Err(ProviderError::Auth(format!("sign-in failed: {e}")));
        }
    }

    save_session(client.session(), session_path)?;
    info!(path = %session_path.display(), "Telegram session token persisted");
    Ok(())
}

/// Print a prompt to stderr and read one trimmed line from stdin.
async fn prompt(label: &str) -> Result<String, ProviderError> {
    let mut stderr = tokio::io::stderr();
    stderr
        .write_all(label.as_bytes())
        .await
        .map_err(|e| ProviderError::Internal(e.to_string()))?;
    stderr
        .flush()
        .await
        .map_err(|e| ProviderError::Internal(e.to_string()))?;

    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| ProviderError::Internal(e.to_string()))?;
    let trimmed = line.trim().to_owned();
    if trimmed.is_empty() {
        return Err(ProviderError::Auth("empty input, aborting login".to_owned()));
    }
    Ok(trimmed)
}
