//! Storage gateway for task groups, tasks, users and participations.
//!
//! Defines the [`StorageGateway`] trait the conversation and reminder code
//! is written against. Concrete implementations:
//! - [`memory::MemoryStore`] - in-process tables behind a lock, for tests
//!   and ephemeral runs
//! - [`sqlite::SqliteStore`] - durable `SQLite` database
//!
//! Every write is individually atomic. In particular a replace-mode
//! [`StorageGateway::replace_tasks`] never exposes a group with zero tasks
//! to a concurrent reader.

pub mod memory;
pub mod sqlite;

use std::future::Future;

use chrono::NaiveDateTime;
use taskping_proto::model::{
    ChatId, CommitMode, GroupId, NewTask, Role, Task, TaskDetails, TaskGroupSummary, TaskId, User,
    UserId, UserTaskView,
};

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A task commit referenced a group that does not exist.
    #[error("task group {0} not found")]
    GroupNotFound(GroupId),

    /// The `SQLite` backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be interpreted.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Query and mutation contract over the persistent store.
///
/// Methods that take `now` evaluate deadlines against that instant instead
/// of reading the clock, so callers control time.
pub trait StorageGateway: Send + Sync {
    /// Creates a group, or updates the lead time of an existing one.
    ///
    /// A `None` lead time never clears an already stored value.
    fn upsert_task_group(
        &self,
        keyname: &str,
        remind_in_minutes: Option<u32>,
    ) -> impl Future<Output = Result<GroupId, StoreError>> + Send;

    /// Looks up a group by keyname.
    fn find_task_group(
        &self,
        keyname: &str,
    ) -> impl Future<Output = Result<Option<TaskGroupSummary>, StoreError>> + Send;

    /// Commits tasks into a group.
    ///
    /// In [`CommitMode::Replace`] all existing tasks (and their
    /// participations) are removed in the same atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::GroupNotFound`] if `group_id` does not exist.
    fn replace_tasks(
        &self,
        group_id: GroupId,
        tasks: &[NewTask],
        mode: CommitMode,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Ensures a user with this handle exists. No-op if it already does.
    fn ensure_user(
        &self,
        handle: &str,
        chat_id: ChatId,
        role: Option<Role>,
    ) -> impl Future<Output = Result<UserId, StoreError>> + Send;

    /// Records a user's chat address. Returns `false` if no such user.
    fn set_user_chat_address(
        &self,
        handle: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Looks up a user by handle (case-sensitive).
    fn find_user(
        &self,
        handle: &str,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Looks up a user by id.
    fn get_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Users assigned to a task.
    fn task_participants(
        &self,
        task_id: TaskId,
    ) -> impl Future<Output = Result<Vec<User>, StoreError>> + Send;

    /// Template data for one task, `None` if it no longer exists.
    fn task_details(
        &self,
        task_id: TaskId,
    ) -> impl Future<Output = Result<Option<TaskDetails>, StoreError>> + Send;

    /// All tasks of a group.
    fn tasks_in_group(
        &self,
        group_id: GroupId,
    ) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Tasks whose group reminder is unsent and due under the group lead time.
    fn tasks_due_for_group_policy(
        &self,
        now: NaiveDateTime,
    ) -> impl Future<Output = Result<Vec<TaskId>, StoreError>> + Send;

    /// Participations whose user reminder is unsent and due under the
    /// participant's own lead time.
    fn tasks_due_for_user_policy(
        &self,
        now: NaiveDateTime,
    ) -> impl Future<Output = Result<Vec<(UserId, TaskId)>, StoreError>> + Send;

    /// Sets the group-policy dedup flag of a task.
    fn mark_group_reminder_sent(
        &self,
        task_id: TaskId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Sets the user-policy dedup flag of a participation.
    fn mark_user_reminder_sent(
        &self,
        user_id: UserId,
        task_id: TaskId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Clears the group-policy dedup flag of a task.
    fn unmark_group_reminder_sent(
        &self,
        task_id: TaskId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Clears the user-policy dedup flag of a participation.
    fn unmark_user_reminder_sent(
        &self,
        user_id: UserId,
        task_id: TaskId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Sets a participant's personal lead time and re-arms their reminder.
    /// Returns `false` if the user is not assigned to the task.
    fn set_participant_lead_time(
        &self,
        user_id: UserId,
        task_id: TaskId,
        minutes: u32,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Deletes a group with all of its tasks. Returns `false` if absent.
    fn delete_task_group(
        &self,
        group_id: GroupId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// A user's tasks with deadlines after `now`, ordered by deadline.
    fn list_user_tasks(
        &self,
        user_id: UserId,
        now: NaiveDateTime,
    ) -> impl Future<Output = Result<Vec<UserTaskView>, StoreError>> + Send;

    /// All groups, ordered by id.
    fn list_task_groups(
        &self,
    ) -> impl Future<Output = Result<Vec<TaskGroupSummary>, StoreError>> + Send;
}

/// Hands out store handles.
///
/// The reminder scheduler asks for a fresh handle on every tick so that a
/// stale connection never outlives one scan, and so that it never shares a
/// connection with the message-handling side.
pub trait StoreConnector: Send + Sync {
    /// Store handle type produced by this connector.
    type Store: StorageGateway;

    /// Opens a new handle.
    fn connect(&self) -> impl Future<Output = Result<Self::Store, StoreError>> + Send;
}
