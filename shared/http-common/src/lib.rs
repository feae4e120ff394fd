//! Shared HTTP utilities for the record service workspace.
//!
//! Framework-agnostic error bodies and time formatting used by the api-server.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::SystemTime;

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "user_not_found" => "User not found",
        "task_not_found" => "Task not found",
        "no_tasks" => "User has no tasks",
        "bad_request" => "Bad request",
        "invalid_id" => "Invalid identifier format",
        "conflict" => "Resource already exists",
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
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (UTC). Sub-second digits are only
/// emitted when present.
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
