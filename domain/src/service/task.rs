use tracing::{debug, info};

use super::{next_stamp, storage_failure};
use crate::validate::{validate_required, validate_task_id, validate_user_id};
use crate::{
    Clock, CoreError, IdGenerator, Resource, Task, TaskDraft, TaskId, TaskRepository, UserId,
    UserRepository,
};

/// Use cases over tasks. Every operation first confirms the owning user
/// exists, so tasks left behind by a deleted user are never served.
pub struct TaskService<T: TaskRepository, U: UserRepository, G: IdGenerator, C: Clock> {
    tasks: T,
    users: U,
    ids: G,
    clock: C,
}

impl<T: TaskRepository, U: UserRepository, G: IdGenerator, C: Clock> TaskService<T, U, G, C> {
    pub fn new(tasks: T, users: U, ids: G, clock: C) -> Self {
        Self {
            tasks,
            users,
            ids,
            clock,
        }
    }

    pub fn create_task(&self, user_id: &UserId, draft: TaskDraft) -> Result<Task, CoreError> {
        validate_user_id(user_id)?;
        self.ensure_user_exists(user_id)?;
        validate_draft(&draft)
            .inspect_err(|e| debug!(user_id = %user_id, err = %e, "task rejected"))?;

        let now = self.clock.now();
        let task = Task {
            id: TaskId::new(self.ids.next_id()),
            user_id: *user_id,
            title: draft.title,
            description: draft.description,
            completed: draft.completed,
            created_at: now,
            updated_at: now,
        };
        self.tasks
            .save(user_id, task.clone())
            .map_err(storage_failure("save task"))?;
        info!(user_id = %user_id, task_id = %task.id, "task created");
        Ok(task)
    }

    /// All tasks of a user. A user with no tasks yields `NoTasksFound`.
    pub fn find_user_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, CoreError> {
        validate_user_id(user_id)?;
        self.ensure_user_exists(user_id)?;
        let tasks = self
            .tasks
            .find_user_tasks(user_id)
            .map_err(storage_failure("list tasks"))?;
        if tasks.is_empty() {
            return Err(CoreError::NoTasksFound);
        }
        Ok(tasks)
    }

    pub fn find_task_by_id(&self, user_id: &UserId, task_id: &TaskId) -> Result<Task, CoreError> {
        validate_user_id(user_id)?;
        validate_task_id(task_id)?;
        self.ensure_user_exists(user_id)?;
        self.existing_task(user_id, task_id)
    }

    /// Overwrite title, description and completed. Ownership and
    /// `created_at` are kept.
    pub fn update_task(
        &self,
        user_id: &UserId,
        task_id: &TaskId,
        draft: TaskDraft,
    ) -> Result<Task, CoreError> {
        validate_user_id(user_id)?;
        validate_task_id(task_id)?;
        self.ensure_user_exists(user_id)?;
        let existing = self.existing_task(user_id, task_id)?;
        validate_draft(&draft)
            .inspect_err(|e| debug!(task_id = %task_id, err = %e, "task update rejected"))?;

        let task = Task {
            title: draft.title,
            description: draft.description,
            completed: draft.completed,
            updated_at: next_stamp(self.clock.now(), existing.updated_at),
            ..existing
        };
        self.tasks
            .update(task_id, &task)
            .map_err(storage_failure("update task"))?;
        info!(user_id = %user_id, task_id = %task_id, "task updated");
        Ok(task)
    }

    pub fn delete_task(&self, user_id: &UserId, task_id: &TaskId) -> Result<(), CoreError> {
        validate_user_id(user_id)?;
        validate_task_id(task_id)?;
        self.ensure_user_exists(user_id)?;
        self.existing_task(user_id, task_id)?;
        self.tasks
            .delete(task_id)
            .map_err(storage_failure("delete task"))?;
        info!(user_id = %user_id, task_id = %task_id, "task deleted");
        Ok(())
    }

    fn ensure_user_exists(&self, user_id: &UserId) -> Result<(), CoreError> {
        match self
            .users
            .find_by_id(user_id)
            .map_err(storage_failure("find user"))?
        {
            Some(_) => Ok(()),
            None => Err(CoreError::NotFound(Resource::User)),
        }
    }

    fn existing_task(&self, user_id: &UserId, task_id: &TaskId) -> Result<Task, CoreError> {
        self.tasks
            .find_task_by_id(user_id, task_id)
            .map_err(storage_failure("find task"))?
            .ok_or(CoreError::NotFound(Resource::Task))
    }
}

fn validate_draft(draft: &TaskDraft) -> Result<(), CoreError> {
    validate_required("title", &draft.title)?;
    validate_required("description", &draft.description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_repo::{InMemoryTaskRepo, InMemoryUserRepo};
    use crate::service::testing::{FixedClock, SequentialIds};
    use crate::service::UserService;
    use crate::{User, UserDraft};
    use std::sync::Arc;

    type Tasks = TaskService<Arc<InMemoryTaskRepo>, Arc<InMemoryUserRepo>, SequentialIds, FixedClock>;
    type Users = UserService<Arc<InMemoryUserRepo>, SequentialIds, FixedClock>;

    struct Fixture {
        users: Users,
        tasks: Tasks,
        task_store: Arc<InMemoryTaskRepo>,
    }

    fn fixture() -> Fixture {
        let user_store = Arc::new(InMemoryUserRepo::new());
        let task_store = Arc::new(InMemoryTaskRepo::new());
        Fixture {
            users: UserService::new(
                Arc::clone(&user_store),
                SequentialIds::new(),
                FixedClock::at_secs(1_000),
            ),
            tasks: TaskService::new(
                Arc::clone(&task_store),
                user_store,
                SequentialIds::new(),
                FixedClock::at_secs(2_000),
            ),
            task_store,
        }
    }

    fn register(f: &Fixture) -> User {
        f.users
            .register_user(UserDraft::new("alice", "alice@example.com"))
            .unwrap()
    }

    #[test]
    fn create_for_unknown_user_persists_nothing() {
        let f = fixture();
        let ghost = UserId::new(uuid::Uuid::new_v4());
        let err = f
            .tasks
            .create_task(&ghost, TaskDraft::new("Buy milk", "2 liters"))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(Resource::User)));
        assert!(f.task_store.find_user_tasks(&ghost).unwrap().is_empty());
    }

    #[test]
    fn create_with_nil_user_is_invalid() {
        let f = fixture();
        let err = f
            .tasks
            .create_task(&UserId::nil(), TaskDraft::new("t", "d"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn create_with_blank_title_is_invalid() {
        let f = fixture();
        let user = register(&f);
        let err = f
            .tasks
            .create_task(&user.id, TaskDraft::new(" ", "d"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn user_without_tasks_is_distinct_from_unknown_user() {
        let f = fixture();
        let user = register(&f);
        assert!(matches!(
            f.tasks.find_user_tasks(&user.id),
            Err(CoreError::NoTasksFound)
        ));
        let ghost = UserId::new(uuid::Uuid::new_v4());
        assert!(matches!(
            f.tasks.find_user_tasks(&ghost),
            Err(CoreError::NotFound(Resource::User))
        ));
    }

    #[test]
    fn nil_task_id_is_invalid() {
        let f = fixture();
        let user = register(&f);
        assert!(matches!(
            f.tasks.find_task_by_id(&user.id, &TaskId::nil()),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            f.tasks.delete_task(&user.id, &TaskId::nil()),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn task_of_another_user_is_not_found() {
        let f = fixture();
        let alice = register(&f);
        let bob = f
            .users
            .register_user(UserDraft::new("bob", "bob@example.com"))
            .unwrap();
        let task = f
            .tasks
            .create_task(&alice.id, TaskDraft::new("Alice's", "private"))
            .unwrap();
        assert!(matches!(
            f.tasks.find_task_by_id(&bob.id, &task.id),
            Err(CoreError::NotFound(Resource::Task))
        ));
        assert!(matches!(
            f.tasks.delete_task(&bob.id, &task.id),
            Err(CoreError::NotFound(Resource::Task))
        ));
    }

    #[test]
    fn update_overwrites_only_mutable_fields() {
        let f = fixture();
        let user = register(&f);
        let task = f
            .tasks
            .create_task(&user.id, TaskDraft::new("Buy milk", "2 liters"))
            .unwrap();

        let draft = TaskDraft {
            title: "Buy oat milk".into(),
            description: "1 liter".into(),
            completed: true,
        };
        let updated = f.tasks.update_task(&user.id, &task.id, draft).unwrap();
        assert_eq!(updated.id, task.id);
        assert_eq!(updated.user_id, user.id);
        assert_eq!(updated.created_at, task.created_at);
        assert!(updated.updated_at > task.updated_at);
        assert!(updated.completed);

        let fetched = f.tasks.find_task_by_id(&user.id, &task.id).unwrap();
        assert_eq!(fetched, updated);
    }

    #[test]
    fn tasks_of_deleted_user_are_unreachable() {
        let f = fixture();
        let user = register(&f);
        let task = f
            .tasks
            .create_task(&user.id, TaskDraft::new("t", "d"))
            .unwrap();
        f.users.delete_user(&user.id).unwrap();
        assert!(matches!(
            f.tasks.find_task_by_id(&user.id, &task.id),
            Err(CoreError::NotFound(Resource::User))
        ));
    }

    struct UnreachableUsers;

    impl UserRepository for UnreachableUsers {
        fn find_all(&self) -> Result<Vec<User>, CoreError> {
            Err(CoreError::Repository("down".into()))
        }
        fn find_by_id(&self, _id: &UserId) -> Result<Option<User>, CoreError> {
            Err(CoreError::Repository("down".into()))
        }
        fn find_by_email(&self, _email: &crate::Email) -> Result<Option<User>, CoreError> {
            Err(CoreError::Repository("down".into()))
        }
        fn save(&self, _user: User) -> Result<(), CoreError> {
            Err(CoreError::Repository("down".into()))
        }
        fn update(&self, _id: &UserId, _user: &User) -> Result<(), CoreError> {
            Err(CoreError::Repository("down".into()))
        }
        fn update_fields(
            &self,
            _id: &UserId,
            _patch: &crate::UserPatch,
        ) -> Result<User, CoreError> {
            Err(CoreError::Repository("down".into()))
        }
        fn delete(&self, _id: &UserId) -> Result<(), CoreError> {
            Err(CoreError::Repository("down".into()))
        }
    }

    #[test]
    fn failing_user_lookup_is_a_repository_error() {
        let task_store = Arc::new(InMemoryTaskRepo::new());
        let tasks = TaskService::new(
            Arc::clone(&task_store),
            UnreachableUsers,
            SequentialIds::new(),
            FixedClock::at_secs(2_000),
        );
        let user_id = UserId::new(uuid::Uuid::new_v4());

        let err = tasks
            .create_task(&user_id, TaskDraft::new("Buy milk", "2 liters"))
            .unwrap_err();
        match err {
            CoreError::Repository(msg) => assert!(msg.starts_with("find user:"), "{msg}"),
            other => panic!("expected Repository, got {other:?}"),
        }
        assert!(task_store.find_user_tasks(&user_id).unwrap().is_empty());

        assert!(matches!(
            tasks.find_user_tasks(&user_id),
            Err(CoreError::Repository(_))
        ));
    }

    #[test]
    fn end_to_end_user_and_tasks() {
        let f = fixture();
        let user = register(&f);

        let milk = f
            .tasks
            .create_task(&user.id, TaskDraft::new("Buy milk", "2 liters"))
            .unwrap();
        let walk = f
            .tasks
            .create_task(&user.id, TaskDraft::new("Walk dog", "around the park"))
            .unwrap();

        let listed = f.tasks.find_user_tasks(&user.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.user_id == user.id && !t.completed));

        let done = TaskDraft {
            completed: true,
            ..TaskDraft::new("Buy milk", "2 liters")
        };
        let updated = f.tasks.update_task(&user.id, &milk.id, done).unwrap();
        assert!(updated.completed);

        f.tasks.delete_task(&user.id, &walk.id).unwrap();
        assert!(matches!(
            f.tasks.find_task_by_id(&user.id, &walk.id),
            Err(CoreError::NotFound(Resource::Task))
        ));

        let remaining = f.tasks.find_user_tasks(&user.id).unwrap();
        assert_eq!(remaining, vec![updated]);
    }
}
