//! Shared HTTP utilities for the demo service workspace.
//!
//! Provides the JSON error envelope, resource locations, and time
//! formatting used by the api-server handlers.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::SystemTime;

/// Body returned with 503 when an async operation misses its bound.
pub const TIMEOUT_MESSAGE: &str = "Operation timed out --- please try again.";

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "bad_request" => "Bad request",
        "invalid_id" => "Invalid identifier format",
        "unauthorized" => "Authentication required",
        "forbidden" => "Access denied",
        "conflict" => "Resource already exists",
        "service_unavailable" => TIMEOUT_MESSAGE,
        "error" | "internal" => "Internal server error",
        _ => code, // Fallback to code as message for unknown codes
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
///
/// Returns: `{"error": {"code": "<code>", "message": "<message>"}}`
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

// ============================================================================
// Locations
// ============================================================================

/// Build the `Location` of a created resource: `{base}/{collection}/{id}`.
///
/// `base` may be empty (relative location) or an absolute prefix such as
/// `https://host/api`; a trailing slash on `base` is ignored.
pub fn resource_location(base: &str, collection: &str, id: &str) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        collection.trim_matches('/'),
        id
    )
}

/// Base URL of the request for absolute locations: `{proto}://{host}{path}`.
///
/// `proto` usually comes from `X-Forwarded-Proto` and defaults to `http`.
/// Without a host the bare `path` is returned, giving relative locations.
pub fn base_url_from_host(host: &str, proto: Option<&str>, path: &str) -> String {
    let host = host.trim();
    if host.is_empty() {
        return path.to_string();
    }
    let proto = proto
        .map(str::trim)
        .filter(|p| p.eq_ignore_ascii_case("http") || p.eq_ignore_ascii_case("https"))
        .unwrap_or("http")
        .to_ascii_lowercase();
    format!("{}://{}{}", proto, host, path)
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (seconds precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 string to SystemTime.
///
/// Returns an error if the string is not a valid RFC3339 timestamp.
pub fn parse_rfc3339(s: &str) -> Result<SystemTime, chrono::ParseError> {
    let dt = DateTime::parse_from_rfc3339(s)?;
    Ok(dt.with_timezone(&Utc).into())
}

// ============================================================================
// Flags
// ============================================================================

/// Interpret common truthy spellings (`1`, `true`, `yes`, `on`).
pub fn is_truthy(s: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|t| s.trim().eq_ignore_ascii_case(t))
}
