//! Application services orchestrating the user and task use cases.
//!
//! Both services are generic over their ports and hold no record state of
//! their own; everything they know comes from the injected repositories.
//!
//! Calls are synchronous and take no cancellation token. An async caller
//! cancels by dropping the future that wraps the call.

use std::time::{Duration, SystemTime};

use tracing::error;

use crate::CoreError;

mod task;
mod user;

pub use task::TaskService;
pub use user::UserService;

/// `updated_at` for a record last stamped at `previous`. Strictly later than
/// `previous` even when the clock is frozen or runs behind.
pub(crate) fn next_stamp(now: SystemTime, previous: SystemTime) -> SystemTime {
    now.max(previous + Duration::from_micros(1))
}

/// Tag a failed port call with the operation that made it. Storage failures
/// are logged here; domain outcomes such as `NotFound` are not.
pub(crate) fn storage_failure(op: &'static str) -> impl Fn(CoreError) -> CoreError {
    move |e| {
        if matches!(e, CoreError::Repository(_)) {
            error!(op, err = %e, "repository call failed");
        }
        e.during(op)
    }
}
