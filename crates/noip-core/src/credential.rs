//! No-IP credential encoding.
//!
//! The updater stores the credential as the base64 form of `username:password`,
//! which is exactly what goes after `Basic ` in the `Authorization` header.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{NoipError, Result};

/// Encode a username/password pair into the stored credential form.
pub fn encode(username: &str, password: &str) -> String {
    STANDARD.encode(format!("{username}:{password}"))
}

/// Decode a stored credential back into its username (the password is never returned).
pub fn username(credential: &str) -> Result<String> {
    let raw = STANDARD
        .decode(credential.trim())
        .map_err(|e| NoipError::Config(format!("credential is not valid base64: {e}")))?;
    let text = String::from_utf8(raw)
        .map_err(|_| NoipError::Config("credential is not valid UTF-8".to_string()))?;
    match text.split_once(':') {
        Some((user, _)) if !user.is_empty() => Ok(user.to_string()),
        _ => Err(NoipError::Config(
            "credential must encode `username:password`".to_string(),
        )),
    }
}
