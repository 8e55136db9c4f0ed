//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use crate::CoreError;

const MAX_TITLE_LEN: usize = 255;
const MAX_ID_LEN: usize = 64;

/// Validate a to-do title: non-empty after trimming and at most 255 chars.
pub fn validate_title(s: &str) -> Result<(), CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidTitle("empty".into()));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(CoreError::InvalidTitle("too long".into()));
    }
    Ok(())
}

/// Validate a record identifier: ascii alphanumerics and hyphens, which
/// covers the hyphenated UUIDs the server generates.
pub fn validate_record_id(s: &str) -> Result<(), CoreError> {
    if s.is_empty() {
        return Err(CoreError::InvalidId("empty".into()));
    }
    if s.len() > MAX_ID_LEN {
        return Err(CoreError::InvalidId("too long".into()));
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(CoreError::InvalidId("invalid characters".into()));
    }
    Ok(())
}
