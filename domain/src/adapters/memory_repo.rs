use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::{
    CoreError, Email, Resource, Task, TaskId, TaskRepository, User, UserId, UserPatch,
    UserRepository,
};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, CoreError> {
    m.lock()
        .map_err(|_| CoreError::Repository("mutex poisoned".into()))
}

fn email_taken(map: &BTreeMap<UserId, User>, email: &Email, exclude: Option<&UserId>) -> bool {
    map.values()
        .any(|u| &u.email == email && Some(&u.id) != exclude)
}

/// In-memory user store. Email uniqueness is checked under the same lock as
/// the write, so it holds even when the service-level check races.
pub struct InMemoryUserRepo {
    inner: Mutex<BTreeMap<UserId, User>>,
}

/// In-memory task store. Independent of the user store; it never cascades.
pub struct InMemoryTaskRepo {
    inner: Mutex<BTreeMap<TaskId, Task>>,
}

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryUserRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRepository for InMemoryUserRepo {
    fn find_all(&self) -> Result<Vec<User>, CoreError> {
        let map = lock(&self.inner)?;
        let mut users: Vec<_> = map.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    fn find_by_id(&self, id: &UserId) -> Result<Option<User>, CoreError> {
        let map = lock(&self.inner)?;
        Ok(map.get(id).cloned())
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        let map = lock(&self.inner)?;
        Ok(map.values().find(|u| &u.email == email).cloned())
    }

    fn save(&self, user: User) -> Result<(), CoreError> {
        let mut map = lock(&self.inner)?;
        if map.contains_key(&user.id) {
            return Err(CoreError::AlreadyExists(format!("user id {}", user.id)));
        }
        if email_taken(&map, &user.email, None) {
            return Err(CoreError::AlreadyExists("email already in use".into()));
        }
        map.insert(user.id, user);
        Ok(())
    }

    fn update(&self, id: &UserId, user: &User) -> Result<(), CoreError> {
        let mut map = lock(&self.inner)?;
        if !map.contains_key(id) {
            return Err(CoreError::NotFound(Resource::User));
        }
        if email_taken(&map, &user.email, Some(id)) {
            return Err(CoreError::AlreadyExists("email already in use".into()));
        }
        if let Some(stored) = map.get_mut(id) {
            stored.username = user.username.clone();
            stored.email = user.email.clone();
            stored.updated_at = user.updated_at;
        }
        Ok(())
    }

    fn update_fields(&self, id: &UserId, patch: &UserPatch) -> Result<User, CoreError> {
        let mut map = lock(&self.inner)?;
        if let Some(ref email) = patch.email {
            if email_taken(&map, email, Some(id)) {
                return Err(CoreError::AlreadyExists("email already in use".into()));
            }
        }
        let stored = map
            .get_mut(id)
            .ok_or(CoreError::NotFound(Resource::User))?;
        if let Some(ref username) = patch.username {
            stored.username = username.clone();
        }
        if let Some(ref email) = patch.email {
            stored.email = email.clone();
        }
        stored.updated_at = patch.updated_at;
        Ok(stored.clone())
    }

    fn delete(&self, id: &UserId) -> Result<(), CoreError> {
        let mut map = lock(&self.inner)?;
        match map.remove(id) {
            Some(_) => Ok(()),
            None => Err(CoreError::NotFound(Resource::User)),
        }
    }
}

impl InMemoryTaskRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Drop every task owned by `user_id`. Returns how many were removed.
    pub fn delete_user_tasks(&self, user_id: &UserId) -> Result<usize, CoreError> {
        let mut map = lock(&self.inner)?;
        let before = map.len();
        map.retain(|_, t| &t.user_id != user_id);
        Ok(before - map.len())
    }
}

impl Default for InMemoryTaskRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRepository for InMemoryTaskRepo {
    fn save(&self, user_id: &UserId, mut task: Task) -> Result<(), CoreError> {
        let mut map = lock(&self.inner)?;
        if map.contains_key(&task.id) {
            return Err(CoreError::AlreadyExists(format!("task id {}", task.id)));
        }
        task.user_id = *user_id;
        map.insert(task.id, task);
        Ok(())
    }

    fn find_user_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, CoreError> {
        let map = lock(&self.inner)?;
        let mut tasks: Vec<_> = map
            .values()
            .filter(|t| &t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    fn find_task_by_id(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
    ) -> Result<Option<Task>, CoreError> {
        let map = lock(&self.inner)?;
        Ok(map
            .get(task_id)
            .filter(|t| &t.user_id == user_id)
            .cloned())
    }

    fn update(&self, task_id: &TaskId, task: &Task) -> Result<(), CoreError> {
        let mut map = lock(&self.inner)?;
        match map.get_mut(task_id) {
            Some(stored) => {
                stored.title = task.title.clone();
                stored.description = task.description.clone();
                stored.completed = task.completed;
                stored.updated_at = task.updated_at;
                Ok(())
            }
            None => Err(CoreError::NotFound(Resource::Task)),
        }
    }

    fn delete(&self, task_id: &TaskId) -> Result<(), CoreError> {
        let mut map = lock(&self.inner)?;
        match map.remove(task_id) {
            Some(_) => Ok(()),
            None => Err(CoreError::NotFound(Resource::Task)),
        }
    }
}
