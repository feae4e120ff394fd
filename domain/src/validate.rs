//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use std::sync::LazyLock;

use regex::Regex;

use crate::{CoreError, TaskId, UserId};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("email pattern is a valid regex")
});

/// Syntax check only. Uniqueness is the service's concern.
pub fn validate_email(s: &str) -> Result<(), CoreError> {
    if !EMAIL_PATTERN.is_match(s) {
        return Err(CoreError::InvalidInput("invalid email format".into()));
    }
    Ok(())
}

/// Reject empty or whitespace-only text fields.
pub fn validate_required(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

pub fn validate_user_id(id: &UserId) -> Result<(), CoreError> {
    if id.is_nil() {
        return Err(CoreError::InvalidInput("invalid user id".into()));
    }
    Ok(())
}

pub fn validate_task_id(id: &TaskId) -> Result<(), CoreError> {
    if id.is_nil() {
        return Err(CoreError::InvalidInput("invalid task id".into()));
    }
    Ok(())
}
