//! Storage selection for the server: in-memory stores or SQLite (feature-gated).
//!
//! `AnyRepo` implements both repository ports so one clone can be handed to
//! the user service and the task service alike.

use std::sync::Arc;

use domain::adapters::memory_repo::{InMemoryTaskRepo, InMemoryUserRepo};
use domain::{
    CoreError, Email, Task, TaskId, TaskRepository, User, UserId, UserPatch, UserRepository,
};

enum RepoKind {
    Memory {
        users: InMemoryUserRepo,
        tasks: InMemoryTaskRepo,
    },
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
}

#[derive(Clone)]
pub struct AnyRepo {
    kind: Arc<RepoKind>,
}

impl AnyRepo {
    pub fn memory() -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory {
                users: InMemoryUserRepo::new(),
                tasks: InMemoryTaskRepo::new(),
            }),
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: &std::path::Path) -> Result<Self, CoreError> {
        Ok(Self {
            kind: Arc::new(RepoKind::Sqlite(sqlite_adapter::SqliteRepo::open(path)?)),
        })
    }
}

impl UserRepository for AnyRepo {
    fn find_all(&self) -> Result<Vec<User>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { users, .. } => users.find_all(),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::find_all(r),
        }
    }

    fn find_by_id(&self, id: &UserId) -> Result<Option<User>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { users, .. } => users.find_by_id(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::find_by_id(r, id),
        }
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { users, .. } => users.find_by_email(email),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::find_by_email(r, email),
        }
    }

    fn save(&self, user: User) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { users, .. } => users.save(user),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::save(r, user),
        }
    }

    fn update(&self, id: &UserId, user: &User) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { users, .. } => users.update(id, user),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::update(r, id, user),
        }
    }

    fn update_fields(&self, id: &UserId, patch: &UserPatch) -> Result<User, CoreError> {
        match &*self.kind {
            RepoKind::Memory { users, .. } => users.update_fields(id, patch),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::update_fields(r, id, patch),
        }
    }

    fn delete(&self, id: &UserId) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { users, tasks } => {
                users.delete(id)?;
                tasks.delete_user_tasks(id).map(|_| ())
            }
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::delete(r, id),
        }
    }
}

impl TaskRepository for AnyRepo {
    fn save(&self, user_id: &UserId, task: Task) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { tasks, .. } => tasks.save(user_id, task),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => TaskRepository::save(r, user_id, task),
        }
    }

    fn find_user_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { tasks, .. } => tasks.find_user_tasks(user_id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => TaskRepository::find_user_tasks(r, user_id),
        }
    }

    fn find_task_by_id(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<Option<Task>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { tasks, .. } => tasks.find_task_by_id(user_id, task_id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => TaskRepository::find_task_by_id(r, user_id, task_id),
        }
    }

    fn update(&self, task_id: &TaskId, task: &Task) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { tasks, .. } => tasks.update(task_id, task),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => TaskRepository::update(r, task_id, task),
        }
    }

    fn delete(&self, task_id: &TaskId) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { tasks, .. } => tasks.delete(task_id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => TaskRepository::delete(r, task_id),
        }
    }
}
