//! Domain library for the user and task record service.
//!
//! Holds the entities, the ports (traits) the services depend on, and the
//! error type. Storage and transport live in separate crates; the in-memory
//! adapters under [`adapters`] exist for tests and local runs.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::SystemTime;

use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// The all-zero identifier. Never assigned to a stored record.
            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            pub fn parse_str(s: &str) -> Result<Self, CoreError> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| CoreError::InvalidInput(format!("invalid {}: {}", $label, s)))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.0, f)
            }
        }
    };
}

entity_id!(
    /// Identifier of a user, assigned by `UserService` on registration.
    UserId,
    "user id"
);

entity_id!(
    /// Identifier of a task, assigned by `TaskService` on creation.
    TaskId,
    "task id"
);

/// Syntactically valid email address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Email(String);

impl Email {
    pub fn parse<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        validate::validate_email(&val)?;
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A registered user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Email,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    /// Tasks owned by the user. Reads are not required to populate this.
    pub tasks: Vec<Task>,
}

/// A task owned by exactly one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Candidate user data for registration or full replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserDraft {
    pub username: String,
    pub email: String,
}

impl UserDraft {
    pub fn new<U: Into<String>, E: Into<String>>(username: U, email: E) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
        }
    }
}

/// Candidate task data for creation or full replacement of the mutable fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub completed: bool,
}

impl TaskDraft {
    /// A draft for a new, not yet completed task.
    pub fn new<T: Into<String>, D: Into<String>>(title: T, description: D) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            completed: false,
        }
    }
}

/// Partial user update. `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl UserChanges {
    /// Build a change set from an open key/value payload.
    ///
    /// Only `username` and `email` are recognized. Any other key rejects the
    /// whole payload so nothing from it is ever applied.
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut changes = Self::default();
        for (key, value) in fields {
            match key.as_ref() {
                "username" => changes.username = Some(value.into()),
                "email" => changes.email = Some(value.into()),
                other => {
                    return Err(CoreError::InvalidInput(format!("unknown field: {}", other)))
                }
            }
        }
        Ok(changes)
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none()
    }
}

/// Validated partial update handed to [`UserRepository::update_fields`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<Email>,
    pub updated_at: SystemTime,
}

/// Kind of record a lookup was about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    User,
    Task,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::User => "user",
            Resource::Task => "task",
        }
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Source of fresh record identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Repository port for users.
///
/// Lookups report absence as `Ok(None)`; mutations of a missing row return
/// `CoreError::NotFound`. Implementations should back email uniqueness with a
/// storage-level constraint and report a violation as `CoreError::AlreadyExists`.
pub trait UserRepository: Send + Sync {
    fn find_all(&self) -> Result<Vec<User>, CoreError>;
    fn find_by_id(&self, id: &UserId) -> Result<Option<User>, CoreError>;
    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError>;
    fn save(&self, user: User) -> Result<(), CoreError>;
    /// Replace username, email and updated_at of an existing user.
    fn update(&self, id: &UserId, user: &User) -> Result<(), CoreError>;
    /// Apply only the fields present in `patch` and return the stored record.
    fn update_fields(&self, id: &UserId, patch: &UserPatch) -> Result<User, CoreError>;
    fn delete(&self, id: &UserId) -> Result<(), CoreError>;
}

/// Repository port for tasks.
pub trait TaskRepository: Send + Sync {
    fn save(&self, user_id: &UserId, task: Task) -> Result<(), CoreError>;
    fn find_user_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, CoreError>;
    fn find_task_by_id(&self, user_id: &UserId, task_id: &TaskId)
        -> Result<Option<Task>, CoreError>;
    /// Replace title, description, completed and updated_at of an existing task.
    fn update(&self, task_id: &TaskId, task: &Task) -> Result<(), CoreError>;
    fn delete(&self, task_id: &TaskId) -> Result<(), CoreError>;
}

impl<R: UserRepository + ?Sized> UserRepository for Arc<R> {
    fn find_all(&self) -> Result<Vec<User>, CoreError> {
        (**self).find_all()
    }

    fn find_by_id(&self, id: &UserId) -> Result<Option<User>, CoreError> {
        (**self).find_by_id(id)
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        (**self).find_by_email(email)
    }

    fn save(&self, user: User) -> Result<(), CoreError> {
        (**self).save(user)
    }

    fn update(&self, id: &UserId, user: &User) -> Result<(), CoreError> {
        (**self).update(id, user)
    }

    fn update_fields(&self, id: &UserId, patch: &UserPatch) -> Result<User, CoreError> {
        (**self).update_fields(id, patch)
    }

    fn delete(&self, id: &UserId) -> Result<(), CoreError> {
        (**self).delete(id)
    }
}

impl<R: TaskRepository + ?Sized> TaskRepository for Arc<R> {
    fn save(&self, user_id: &UserId, task: Task) -> Result<(), CoreError> {
        (**self).save(user_id, task)
    }

    fn find_user_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, CoreError> {
        (**self).find_user_tasks(user_id)
    }

    fn find_task_by_id(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<Option<Task>, CoreError> {
        (**self).find_task_by_id(user_id, task_id)
    }

    fn update(&self, task_id: &TaskId, task: &Task) -> Result<(), CoreError> {
        (**self).update(task_id, task)
    }

    fn delete(&self, task_id: &TaskId) -> Result<(), CoreError> {
        (**self).delete(task_id)
    }
}

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(Resource),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The user exists but owns no tasks.
    #[error("no tasks found for user")]
    NoTasksFound,
    #[error("repository error: {0}")]
    Repository(String),
}

impl CoreError {
    /// Prefix a repository failure with the operation that hit it.
    /// Every other variant passes through unchanged.
    pub fn during(self, op: &str) -> Self {
        match self {
            CoreError::Repository(msg) => CoreError::Repository(format!("{}: {}", op, msg)),
            other => other,
        }
    }
}

pub mod adapters;
pub mod ids;
pub mod service;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_accepts_common_addresses() {
        let e = Email::parse("alice@example.com").expect("valid email");
        assert_eq!(e.as_str(), "alice@example.com");
        assert!(Email::parse("first.last+tag@mail.example.org").is_ok());
    }

    #[test]
    fn email_rejects_malformed() {
        let bad = Email::parse("not-an-email");
        assert!(matches!(bad, Err(CoreError::InvalidInput(_))));
        assert!(Email::parse("").is_err());
        assert!(Email::parse("a@b").is_err());
    }

    #[test]
    fn ids_parse_and_detect_nil() {
        assert!(UserId::nil().is_nil());
        let id = UserId::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        assert!(!id.is_nil());
        assert_eq!(id.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");

        let err = TaskId::parse_str("nope").unwrap_err();
        match err {
            CoreError::InvalidInput(msg) => assert_eq!(msg, "invalid task id: nope"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn changes_from_fields_accepts_known_keys() {
        let changes =
            UserChanges::from_fields([("username", "alice"), ("email", "a@example.com")]).unwrap();
        assert_eq!(changes.username.as_deref(), Some("alice"));
        assert_eq!(changes.email.as_deref(), Some("a@example.com"));
        assert!(!changes.is_empty());
    }

    #[test]
    fn changes_from_fields_rejects_unknown_key() {
        let err = UserChanges::from_fields([("username", "alice"), ("role", "admin")]).unwrap_err();
        match err {
            CoreError::InvalidInput(msg) => assert_eq!(msg, "unknown field: role"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn during_only_wraps_repository_failures() {
        let wrapped = CoreError::Repository("disk full".into()).during("save user");
        assert_eq!(wrapped.to_string(), "repository error: save user: disk full");

        let untouched = CoreError::NotFound(Resource::User).during("save user");
        assert_eq!(untouched.to_string(), "user not found");
    }
}
