//! sqlite-adapter: SQLite implementation of the user and task ports.
//!
//! Purpose
//! - Provide a file-based store so the service runs locally with durable data.
//! - Implements both `UserRepository` and `TaskRepository` from the `domain`
//!   crate on a single connection, so one `Arc<SqliteRepo>` backs both services.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - `users.email` is `UNIQUE`; a violation surfaces as `CoreError::AlreadyExists`
//!   even when two registrations race past the service-level check.
//! - `tasks.user_id` references `users(id)` with `ON DELETE CASCADE`.
//! - Timestamps are stored as nanoseconds since UNIX_EPOCH (i64).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    CoreError, Email, Resource, Task, TaskId, TaskRepository, User, UserId, UserPatch,
    UserRepository,
};
use rusqlite::{params, Connection};
use tracing::debug;

const USER_COLUMNS: &str = "id, username, email, created_at, updated_at";
const TASK_COLUMNS: &str = "id, user_id, title, description, completed, created_at, updated_at";

/// SQLite-backed repository for users and their tasks.
pub struct SqliteRepo {
    conn: Mutex<Connection>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path.as_ref()).map_err(map_sqerr)?;
        init_schema(&conn)?;
        debug!(path = %path.as_ref().display(), "sqlite store ready");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Like [`SqliteRepo::new`], but creates missing parent directories first.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| CoreError::Repository(format!("create {}: {e}", dir.display())))?;
        }
        Self::new(path)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.conn.lock().map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id);
        "#,
    )
    .map_err(map_sqerr)
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError { CoreError::Repository(format!("sqlite error: {e}")) }

/// Translate constraint failures into domain outcomes; everything else is opaque.
fn map_write_err(e: rusqlite::Error, missing_parent: Resource) -> CoreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        match err.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                return CoreError::AlreadyExists("email already in use".into())
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return CoreError::AlreadyExists("record id already exists".into())
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return CoreError::NotFound(missing_parent),
            _ => {}
        }
    }
    map_sqerr(e)
}

fn system_time_to_nanos(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)
}
fn nanos_to_system_time(nanos: i64) -> SystemTime { UNIX_EPOCH + Duration::from_nanos(nanos.max(0) as u64) }

fn row_to_user(row: &rusqlite::Row) -> Result<User, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let username: String = row.get(1).map_err(map_sqerr)?;
    let email: String = row.get(2).map_err(map_sqerr)?;
    let created_at: i64 = row.get(3).map_err(map_sqerr)?;
    let updated_at: i64 = row.get(4).map_err(map_sqerr)?;

    let id = UserId::parse_str(&id).map_err(|e| CoreError::Repository(format!("bad user id in db: {e}")))?;
    let email = Email::parse(email).map_err(|_| CoreError::Repository("bad email in db".into()))?;
    Ok(User {
        id,
        username,
        email,
        created_at: nanos_to_system_time(created_at),
        updated_at: nanos_to_system_time(updated_at),
        tasks: Vec::new(),
    })
}

fn row_to_task(row: &rusqlite::Row) -> Result<Task, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let user_id: String = row.get(1).map_err(map_sqerr)?;
    let title: String = row.get(2).map_err(map_sqerr)?;
    let description: String = row.get(3).map_err(map_sqerr)?;
    let completed: i64 = row.get(4).map_err(map_sqerr)?;
    let created_at: i64 = row.get(5).map_err(map_sqerr)?;
    let updated_at: i64 = row.get(6).map_err(map_sqerr)?;

    Ok(Task {
        id: TaskId::parse_str(&id).map_err(|e| CoreError::Repository(format!("bad task id in db: {e}")))?,
        user_id: UserId::parse_str(&user_id).map_err(|e| CoreError::Repository(format!("bad user id in db: {e}")))?,
        title,
        description,
        completed: completed != 0,
        created_at: nanos_to_system_time(created_at),
        updated_at: nanos_to_system_time(updated_at),
    })
}

fn select_user(conn: &Connection, id: &UserId) -> Result<Option<User>, CoreError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
        .map_err(map_sqerr)?;
    let mut rows = stmt.query(params![id.to_string()]).map_err(map_sqerr)?;
    if let Some(row) = rows.next().map_err(map_sqerr)? {
        Ok(Some(row_to_user(row)?))
    } else {
        Ok(None)
    }
}

fn select_user_tasks(conn: &Connection, user_id: &UserId) -> Result<Vec<Task>, CoreError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY created_at, id"))
        .map_err(map_sqerr)?;
    let mut rows = stmt.query(params![user_id.to_string()]).map_err(map_sqerr)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_sqerr)? {
        out.push(row_to_task(row)?);
    }
    Ok(out)
}

impl UserRepository for SqliteRepo {
    fn find_all(&self) -> Result<Vec<User>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"))
            .map_err(map_sqerr)?;
        let mut rows = stmt.query([]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_user(row)?);
        }
        Ok(out)
    }

    /// Returns the user with its tasks filled in.
    fn find_by_id(&self, id: &UserId) -> Result<Option<User>, CoreError> {
        let conn = self.lock()?;
        match select_user(&conn, id)? {
            Some(mut user) => {
                user.tasks = select_user_tasks(&conn, id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    fn find_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"))
            .map_err(map_sqerr)?;
        let mut rows = stmt.query(params![email.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_user(row)?))
        } else {
            Ok(None)
        }
    }

    fn save(&self, user: User) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO users({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                user.id.to_string(),
                user.username,
                user.email.as_str(),
                system_time_to_nanos(user.created_at),
                system_time_to_nanos(user.updated_at),
            ],
        )
        .map_err(|e| map_write_err(e, Resource::User))?;
        Ok(())
    }

    fn update(&self, id: &UserId, user: &User) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE users SET username = ?1, email = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    user.username,
                    user.email.as_str(),
                    system_time_to_nanos(user.updated_at),
                    id.to_string(),
                ],
            )
            .map_err(|e| map_write_err(e, Resource::User))?;
        if changed == 0 {
            Err(CoreError::NotFound(Resource::User))
        } else {
            Ok(())
        }
    }

    fn update_fields(&self, id: &UserId, patch: &UserPatch) -> Result<User, CoreError> {
        let conn = self.lock()?;
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(ref username) = patch.username {
            sets.push("username = ?");
            values.push(Box::new(username.clone()));
        }
        if let Some(ref email) = patch.email {
            sets.push("email = ?");
            values.push(Box::new(email.as_str().to_string()));
        }
        sets.push("updated_at = ?");
        values.push(Box::new(system_time_to_nanos(patch.updated_at)));
        values.push(Box::new(id.to_string()));

        let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let changed = conn
            .execute(&sql, params.as_slice())
            .map_err(|e| map_write_err(e, Resource::User))?;
        if changed == 0 {
            return Err(CoreError::NotFound(Resource::User));
        }
        let mut user = select_user(&conn, id)?.ok_or(CoreError::NotFound(Resource::User))?;
        user.tasks = select_user_tasks(&conn, id)?;
        Ok(user)
    }

    fn delete(&self, id: &UserId) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound(Resource::User))
        } else {
            Ok(())
        }
    }
}

impl TaskRepository for SqliteRepo {
    fn save(&self, user_id: &UserId, task: Task) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO tasks({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                task.id.to_string(),
                user_id.to_string(),
                task.title,
                task.description,
                task.completed as i64,
                system_time_to_nanos(task.created_at),
                system_time_to_nanos(task.updated_at),
            ],
        )
        .map_err(|e| map_write_err(e, Resource::User))?;
        Ok(())
    }

    fn find_user_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, CoreError> {
        let conn = self.lock()?;
        select_user_tasks(&conn, user_id)
    }

    fn find_task_by_id(&self, user_id: &UserId, task_id: &TaskId) -> Result<Option<Task>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"))
            .map_err(map_sqerr)?;
        let mut rows = stmt
            .query(params![task_id.to_string(), user_id.to_string()])
            .map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_task(row)?))
        } else {
            Ok(None)
        }
    }

    fn update(&self, task_id: &TaskId, task: &Task) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET title = ?1, description = ?2, completed = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    task.title,
                    task.description,
                    task.completed as i64,
                    system_time_to_nanos(task.updated_at),
                    task_id.to_string(),
                ],
            )
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound(Resource::Task))
        } else {
            Ok(())
        }
    }

    fn delete(&self, task_id: &TaskId) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![task_id.to_string()])
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound(Resource::Task))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tmp_db() -> (SqliteRepo, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let repo = SqliteRepo::new(path).unwrap();
        (repo, dir)
    }

    fn mk_user(email: &str, created_secs: u64) -> User {
        let at = UNIX_EPOCH + Duration::from_secs(created_secs);
        User {
            id: UserId::new(Uuid::new_v4()),
            username: "alice".into(),
            email: Email::parse(email).unwrap(),
            created_at: at,
            updated_at: at,
            tasks: Vec::new(),
        }
    }

    fn mk_task(user_id: UserId, title: &str) -> Task {
        Task {
            id: TaskId::new(Uuid::new_v4()),
            user_id,
            title: title.into(),
            description: "desc".into(),
            completed: false,
            created_at: UNIX_EPOCH + Duration::from_nanos(1_500_000_123),
            updated_at: UNIX_EPOCH + Duration::from_nanos(1_500_000_123),
        }
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("records.db");
        let repo = SqliteRepo::open(&path).unwrap();
        assert!(path.exists());
        assert!(repo.find_all().unwrap().is_empty());
    }

    #[test]
    fn save_find_roundtrip_keeps_nanosecond_timestamps() {
        let (repo, _dir) = tmp_db();
        let mut user = mk_user("alice@example.com", 0);
        user.updated_at = UNIX_EPOCH + Duration::from_nanos(987_654_321);
        UserRepository::save(&repo, user.clone()).unwrap();

        let got = UserRepository::find_by_id(&repo, &user.id).unwrap().unwrap();
        assert_eq!(got, user);
        let by_email = repo.find_by_email(&user.email).unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[test]
    fn duplicate_email_conflicts() {
        let (repo, _dir) = tmp_db();
        UserRepository::save(&repo, mk_user("dup@example.com", 0)).unwrap();
        let err = UserRepository::save(&repo, mk_user("dup@example.com", 1)).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));
    }

    #[test]
    fn find_all_orders_by_creation() {
        let (repo, _dir) = tmp_db();
        for i in 0..3u64 {
            UserRepository::save(&repo, mk_user(&format!("u{i}@example.com"), 10 - i)).unwrap();
        }
        let users = repo.find_all().unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].email.as_str(), "u2@example.com");
    }

    #[test]
    fn update_fields_touches_only_present_columns() {
        let (repo, _dir) = tmp_db();
        let user = mk_user("alice@example.com", 0);
        UserRepository::save(&repo, user.clone()).unwrap();

        let patch = UserPatch {
            username: None,
            email: Some(Email::parse("alicia@example.com").unwrap()),
            updated_at: UNIX_EPOCH + Duration::from_secs(9),
        };
        let got = repo.update_fields(&user.id, &patch).unwrap();
        assert_eq!(got.username, "alice");
        assert_eq!(got.email.as_str(), "alicia@example.com");
        assert_eq!(got.created_at, user.created_at);
        assert_eq!(got.updated_at, patch.updated_at);
    }

    #[test]
    fn update_missing_user_not_found() {
        let (repo, _dir) = tmp_db();
        let ghost = mk_user("ghost@example.com", 0);
        let err = UserRepository::update(&repo, &ghost.id, &ghost).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(Resource::User)));
        let err = UserRepository::delete(&repo, &ghost.id).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(Resource::User)));
    }

    #[test]
    fn find_by_id_fills_tasks() {
        let (repo, _dir) = tmp_db();
        let user = mk_user("alice@example.com", 0);
        UserRepository::save(&repo, user.clone()).unwrap();
        let task = mk_task(user.id, "Buy milk");
        TaskRepository::save(&repo, &user.id, task.clone()).unwrap();

        let got = UserRepository::find_by_id(&repo, &user.id).unwrap().unwrap();
        assert_eq!(got.tasks, vec![task]);
    }

    #[test]
    fn update_fields_returns_user_with_tasks() {
        let (repo, _dir) = tmp_db();
        let user = mk_user("alice@example.com", 0);
        UserRepository::save(&repo, user.clone()).unwrap();
        let task = mk_task(user.id, "Buy milk");
        TaskRepository::save(&repo, &user.id, task.clone()).unwrap();

        let patch = UserPatch {
            username: Some("ally".into()),
            email: None,
            updated_at: UNIX_EPOCH + Duration::from_secs(5),
        };
        let patched = repo.update_fields(&user.id, &patch).unwrap();
        assert_eq!(patched.tasks, vec![task]);
        let fetched = UserRepository::find_by_id(&repo, &user.id).unwrap().unwrap();
        assert_eq!(patched, fetched);
    }

    #[test]
    fn task_for_missing_user_rejected_by_foreign_key() {
        let (repo, _dir) = tmp_db();
        let ghost = UserId::new(Uuid::new_v4());
        let err = TaskRepository::save(&repo, &ghost, mk_task(ghost, "orphan")).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(Resource::User)));
    }

    #[test]
    fn deleting_user_cascades_tasks() {
        let (repo, _dir) = tmp_db();
        let user = mk_user("alice@example.com", 0);
        UserRepository::save(&repo, user.clone()).unwrap();
        TaskRepository::save(&repo, &user.id, mk_task(user.id, "a")).unwrap();
        TaskRepository::save(&repo, &user.id, mk_task(user.id, "b")).unwrap();

        UserRepository::delete(&repo, &user.id).unwrap();
        assert!(repo.find_user_tasks(&user.id).unwrap().is_empty());
    }

    #[test]
    fn task_update_and_scope() {
        let (repo, _dir) = tmp_db();
        let user = mk_user("alice@example.com", 0);
        let other = mk_user("bob@example.com", 0);
        UserRepository::save(&repo, user.clone()).unwrap();
        UserRepository::save(&repo, other.clone()).unwrap();
        let mut task = mk_task(user.id, "Buy milk");
        TaskRepository::save(&repo, &user.id, task.clone()).unwrap();

        task.completed = true;
        task.title = "Buy oat milk".into();
        task.updated_at = UNIX_EPOCH + Duration::from_secs(7);
        TaskRepository::update(&repo, &task.id, &task).unwrap();

        let got = repo.find_task_by_id(&user.id, &task.id).unwrap().unwrap();
        assert_eq!(got, task);
        assert!(repo.find_task_by_id(&other.id, &task.id).unwrap().is_none());

        TaskRepository::delete(&repo, &task.id).unwrap();
        let err = TaskRepository::delete(&repo, &task.id).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(Resource::Task)));
    }
}
