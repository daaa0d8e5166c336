//! `SQLite`-backed storage gateway.
//!
//! One [`SqliteStore`] wraps one connection behind a mutex; every gateway
//! call locks it for the duration of a few statements and never across an
//! await point. Multi-statement writes run inside a transaction.
//!
//! Due-reminder filtering loads the unsent candidates and applies
//! [`reminder_due`] in Rust, so the lead-time rule lives in one place.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use taskping_proto::model::{
    ChatId, CommitMode, GroupId, NewTask, Role, Task, TaskDetails, TaskGroupSummary, TaskId, User,
    UserId, UserTaskView, reminder_due,
};
use tracing::debug;

use super::{StorageGateway, StoreConnector, StoreError};

const SCHEMA_SQL: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS task_group (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    keyname           TEXT NOT NULL UNIQUE,
    remind_in_minutes INTEGER
);

CREATE TABLE IF NOT EXISTS app_user (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    tg_nick TEXT NOT NULL UNIQUE,
    role    TEXT NOT NULL DEFAULT 'participant',
    chat_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS task (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id      INTEGER NOT NULL REFERENCES task_group(id) ON DELETE CASCADE,
    name          TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    deadline      TEXT NOT NULL,
    reminder_sent INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_task_group ON task(group_id);

CREATE TABLE IF NOT EXISTS user_task (
    user_id                 INTEGER NOT NULL REFERENCES app_user(id) ON DELETE CASCADE,
    task_id                 INTEGER NOT NULL REFERENCES task(id) ON DELETE CASCADE,
    again_remind_in_minutes INTEGER,
    reminder_sent           INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, task_id)
);

CREATE INDEX IF NOT EXISTS idx_user_task_task ON user_task(task_id);
";

const GROUP_SUMMARY_SQL: &str = "SELECT g.id, g.keyname, g.remind_in_minutes, \
     (SELECT COUNT(*) FROM task t WHERE t.group_id = g.id) \
     FROM task_group g";

const USER_SQL: &str = "SELECT id, tg_nick, role, chat_id FROM app_user";

/// Durable store over a single `SQLite` connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created, or
    /// [`StoreError::Sqlite`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_groups(
        conn: &Connection,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<TaskGroupSummary>, StoreError> {
        let sql = format!("{GROUP_SUMMARY_SQL} {filter} ORDER BY g.id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<u32>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut groups = Vec::new();
        for row in rows {
            let (id, keyname, remind_in_minutes, count) = row?;
            groups.push(TaskGroupSummary {
                id: GroupId::new(id),
                keyname,
                remind_in_minutes,
                task_count: usize::try_from(count)
                    .map_err(|_| StoreError::Corrupt(format!("task count {count}")))?,
            });
        }
        Ok(groups)
    }

    fn query_users(
        conn: &Connection,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<User>, StoreError> {
        let sql = format!("{USER_SQL} {filter} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut users = Vec::new();
        for row in rows {
            let (id, handle, role, chat_id) = row?;
            users.push(User {
                id: UserId::new(id),
                handle,
                role: Role::parse(&role)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown role {role:?}")))?,
                chat_id: ChatId::new(chat_id),
            });
        }
        Ok(users)
    }
}

impl StorageGateway for SqliteStore {
    async fn upsert_task_group(
        &self,
        keyname: &str,
        remind_in_minutes: Option<u32>,
    ) -> Result<GroupId, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO task_group (keyname, remind_in_minutes) VALUES (?1, ?2) \
             ON CONFLICT(keyname) DO UPDATE SET remind_in_minutes = \
             COALESCE(excluded.remind_in_minutes, task_group.remind_in_minutes)",
            params![keyname, remind_in_minutes],
        )?;
        let id = conn.query_row(
            "SELECT id FROM task_group WHERE keyname = ?1",
            params![keyname],
            |row| row.get(0),
        )?;
        Ok(GroupId::new(id))
    }

    async fn find_task_group(&self, keyname: &str) -> Result<Option<TaskGroupSummary>, StoreError> {
        let conn = self.conn.lock();
        Ok(Self::query_groups(&conn, "WHERE g.keyname = ?1", params![keyname])?
            .into_iter()
            .next())
    }

    async fn replace_tasks(
        &self,
        group_id: GroupId,
        tasks: &[NewTask],
        mode: CommitMode,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM task_group WHERE id = ?1",
                params![group_id.get()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(StoreError::GroupNotFound(group_id));
        }
        if mode == CommitMode::Replace {
            tx.execute("DELETE FROM task WHERE group_id = ?1", params![group_id.get()])?;
        }
        {
            let mut insert_task = tx.prepare(
                "INSERT INTO task (group_id, name, description, deadline) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut insert_participant =
                tx.prepare("INSERT OR IGNORE INTO user_task (user_id, task_id) VALUES (?1, ?2)")?;
            for task in tasks {
                insert_task.execute(params![
                    group_id.get(),
                    task.name,
                    task.description,
                    task.deadline
                ])?;
                let task_id = tx.last_insert_rowid();
                for user_id in &task.participants {
                    insert_participant.execute(params![user_id.get(), task_id])?;
                }
            }
        }
        tx.commit()?;
        debug!(%group_id, count = tasks.len(), ?mode, "committed tasks");
        Ok(())
    }

    async fn ensure_user(
        &self,
        handle: &str,
        chat_id: ChatId,
        role: Option<Role>,
    ) -> Result<UserId, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO app_user (tg_nick, role, chat_id) VALUES (?1, ?2, ?3)",
            params![handle, role.unwrap_or_default().as_str(), chat_id.get()],
        )?;
        let id = conn.query_row(
            "SELECT id FROM app_user WHERE tg_nick = ?1",
            params![handle],
            |row| row.get(0),
        )?;
        Ok(UserId::new(id))
    }

    async fn set_user_chat_address(&self, handle: &str, chat_id: ChatId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE app_user SET chat_id = ?1 WHERE tg_nick = ?2",
            params![chat_id.get(), handle],
        )?;
        Ok(changed > 0)
    }

    async fn find_user(&self, handle: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock();
        Ok(Self::query_users(&conn, "WHERE tg_nick = ?1", params![handle])?
            .into_iter()
            .next())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock();
        Ok(Self::query_users(&conn, "WHERE id = ?1", params![user_id.get()])?
            .into_iter()
            .next())
    }

    async fn task_participants(&self, task_id: TaskId) -> Result<Vec<User>, StoreError> {
        let conn = self.conn.lock();
        Self::query_users(
            &conn,
            "WHERE id IN (SELECT user_id FROM user_task WHERE task_id = ?1)",
            params![task_id.get()],
        )
    }

    async fn task_details(&self, task_id: TaskId) -> Result<Option<TaskDetails>, StoreError> {
        let conn = self.conn.lock();
        let details = conn
            .query_row(
                "SELECT t.name, t.description, t.deadline, g.keyname \
                 FROM task t JOIN task_group g ON g.id = t.group_id WHERE t.id = ?1",
                params![task_id.get()],
                |row| {
                    Ok(TaskDetails {
                        task_id,
                        name: row.get(0)?,
                        description: row.get(1)?,
                        deadline: row.get(2)?,
                        keyname: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(details)
    }

    async fn tasks_in_group(&self, group_id: GroupId) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, deadline, reminder_sent \
             FROM task WHERE group_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![group_id.get()], |row| {
            Ok(Task {
                id: TaskId::new(row.get(0)?),
                group_id,
                name: row.get(1)?,
                description: row.get(2)?,
                deadline: row.get(3)?,
                reminder_sent: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn tasks_due_for_group_policy(&self, now: NaiveDateTime) -> Result<Vec<TaskId>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.deadline, g.remind_in_minutes \
             FROM task t JOIN task_group g ON g.id = t.group_id \
             WHERE t.reminder_sent = 0 AND g.remind_in_minutes IS NOT NULL ORDER BY t.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, NaiveDateTime>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?;
        let mut due = Vec::new();
        for row in rows {
            let (id, deadline, lead) = row?;
            if reminder_due(deadline, lead, now) {
                due.push(TaskId::new(id));
            }
        }
        Ok(due)
    }

    async fn tasks_due_for_user_policy(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<(UserId, TaskId)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ut.user_id, ut.task_id, t.deadline, ut.again_remind_in_minutes \
             FROM user_task ut JOIN task t ON t.id = ut.task_id \
             WHERE ut.reminder_sent = 0 AND ut.again_remind_in_minutes IS NOT NULL \
             ORDER BY ut.task_id, ut.user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, NaiveDateTime>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?;
        let mut due = Vec::new();
        for row in rows {
            let (user_id, task_id, deadline, lead) = row?;
            if reminder_due(deadline, lead, now) {
                due.push((UserId::new(user_id), TaskId::new(task_id)));
            }
        }
        Ok(due)
    }

    async fn mark_group_reminder_sent(&self, task_id: TaskId) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE task SET reminder_sent = 1 WHERE id = ?1",
            params![task_id.get()],
        )?;
        Ok(())
    }

    async fn mark_user_reminder_sent(&self, user_id: UserId, task_id: TaskId) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE user_task SET reminder_sent = 1 WHERE user_id = ?1 AND task_id = ?2",
            params![user_id.get(), task_id.get()],
        )?;
        Ok(())
    }

    async fn unmark_group_reminder_sent(&self, task_id: TaskId) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE task SET reminder_sent = 0 WHERE id = ?1",
            params![task_id.get()],
        )?;
        Ok(())
    }

    async fn unmark_user_reminder_sent(
        &self,
        user_id: UserId,
        task_id: TaskId,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE user_task SET reminder_sent = 0 WHERE user_id = ?1 AND task_id = ?2",
            params![user_id.get(), task_id.get()],
        )?;
        Ok(())
    }

    async fn set_participant_lead_time(
        &self,
        user_id: UserId,
        task_id: TaskId,
        minutes: u32,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE user_task SET again_remind_in_minutes = ?1, reminder_sent = 0 \
             WHERE user_id = ?2 AND task_id = ?3",
            params![minutes, user_id.get(), task_id.get()],
        )?;
        Ok(changed > 0)
    }

    async fn delete_task_group(&self, group_id: GroupId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM task_group WHERE id = ?1",
            params![group_id.get()],
        )?;
        Ok(changed > 0)
    }

    async fn list_user_tasks(
        &self,
        user_id: UserId,
        now: NaiveDateTime,
    ) -> Result<Vec<UserTaskView>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, g.keyname, t.deadline, g.remind_in_minutes, \
             ut.again_remind_in_minutes \
             FROM user_task ut \
             JOIN task t ON t.id = ut.task_id \
             JOIN task_group g ON g.id = t.group_id \
             WHERE ut.user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id.get()], |row| {
            Ok(UserTaskView {
                task_id: TaskId::new(row.get(0)?),
                name: row.get(1)?,
                keyname: row.get(2)?,
                deadline: row.get(3)?,
                group_lead_time: row.get(4)?,
                personal_lead_time: row.get(5)?,
            })
        })?;
        let mut views = Vec::new();
        for row in rows {
            let view = row?;
            if view.deadline > now {
                views.push(view);
            }
        }
        views.sort_by_key(|v| (v.deadline, v.task_id));
        Ok(views)
    }

    async fn list_task_groups(&self) -> Result<Vec<TaskGroupSummary>, StoreError> {
        let conn = self.conn.lock();
        Self::query_groups(&conn, "", [])
    }
}

/// Opens a fresh [`SqliteStore`] on the same database file per connect.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// Creates a connector for the database at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    async fn connect(&self) -> Result<SqliteStore, StoreError> {
        SqliteStore::open(&self.path)
    }
}
