use tracing::{debug, info, warn};

use super::{next_stamp, storage_failure};
use crate::validate::validate_required;
use crate::{
    Clock, CoreError, Email, IdGenerator, Resource, User, UserChanges, UserDraft, UserId,
    UserPatch, UserRepository,
};

/// Use cases over users: registration, lookup, full and partial update, delete.
///
/// Email uniqueness is checked here before every write that can change an
/// email. The check is read-then-write and can race; the repository's own
/// unique constraint is what finally rejects a duplicate.
pub struct UserService<R: UserRepository, G: IdGenerator, C: Clock> {
    repo: R,
    ids: G,
    clock: C,
}

impl<R: UserRepository, G: IdGenerator, C: Clock> UserService<R, G, C> {
    pub fn new(repo: R, ids: G, clock: C) -> Self {
        Self { repo, ids, clock }
    }

    /// Validate and store a new user. Returns the stored record.
    pub fn register_user(&self, draft: UserDraft) -> Result<User, CoreError> {
        let (username, email) = validate_draft(draft)
            .inspect_err(|e| debug!(err = %e, "registration rejected"))?;
        self.ensure_email_free(&email, None)?;

        let now = self.clock.now();
        let user = User {
            id: UserId::new(self.ids.next_id()),
            username,
            email,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
        };
        self.repo
            .save(user.clone())
            .map_err(storage_failure("save user"))?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub fn get_all_users(&self) -> Result<Vec<User>, CoreError> {
        self.repo.find_all().map_err(storage_failure("list users"))
    }

    pub fn get_user_by_id(&self, id: &UserId) -> Result<User, CoreError> {
        self.repo
            .find_by_id(id)
            .map_err(storage_failure("find user"))?
            .ok_or(CoreError::NotFound(Resource::User))
    }

    /// Replace username and email. `id` and `created_at` are kept.
    pub fn update_user(&self, id: &UserId, draft: UserDraft) -> Result<User, CoreError> {
        let existing = self.get_user_by_id(id)?;
        let (username, email) = validate_draft(draft)
            .inspect_err(|e| debug!(user_id = %id, err = %e, "update rejected"))?;
        self.ensure_email_free(&email, Some(id))?;

        let user = User {
            username,
            email,
            updated_at: next_stamp(self.clock.now(), existing.updated_at),
            ..existing
        };
        self.repo
            .update(id, &user)
            .map_err(storage_failure("update user"))?;
        info!(user_id = %id, "user updated");
        Ok(user)
    }

    /// Apply only the fields present in `changes`.
    pub fn update_user_fields(&self, id: &UserId, changes: UserChanges) -> Result<User, CoreError> {
        if changes.is_empty() {
            return Err(CoreError::InvalidInput("no fields to update".into()));
        }
        let existing = self.get_user_by_id(id)?;

        let username = match changes.username {
            Some(username) => {
                validate_required("username", &username)?;
                Some(username)
            }
            None => None,
        };
        let email = match changes.email {
            Some(raw) => {
                let email = Email::parse(raw)?;
                self.ensure_email_free(&email, Some(id))?;
                Some(email)
            }
            None => None,
        };

        let patch = UserPatch {
            username,
            email,
            updated_at: next_stamp(self.clock.now(), existing.updated_at),
        };
        let user = self
            .repo
            .update_fields(id, &patch)
            .map_err(storage_failure("update user fields"))?;
        info!(user_id = %id, "user fields updated");
        Ok(user)
    }

    /// Partial update from an open key/value payload. Keys outside
    /// `username`/`email` reject the payload before anything is looked up.
    pub fn update_user_fields_from_map<I, K, V>(
        &self,
        id: &UserId,
        fields: I,
    ) -> Result<User, CoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let changes = UserChanges::from_fields(fields)
            .inspect_err(|e| warn!(user_id = %id, err = %e, "partial update rejected"))?;
        self.update_user_fields(id, changes)
    }

    pub fn delete_user(&self, id: &UserId) -> Result<(), CoreError> {
        self.repo
            .delete(id)
            .map_err(storage_failure("delete user"))?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    fn ensure_email_free(&self, email: &Email, exclude: Option<&UserId>) -> Result<(), CoreError> {
        let hit = self
            .repo
            .find_by_email(email)
            .map_err(storage_failure("find user by email"))?;
        match hit {
            Some(other) if Some(&other.id) != exclude => {
                debug!(email = email.as_str(), "email already in use");
                Err(CoreError::AlreadyExists("email already in use".into()))
            }
            _ => Ok(()),
        }
    }
}

fn validate_draft(draft: UserDraft) -> Result<(String, Email), CoreError> {
    validate_required("username", &draft.username)?;
    let email = Email::parse(draft.email)?;
    Ok((draft.username, email))
}
