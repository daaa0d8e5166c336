//! In-memory storage gateway.
//!
//! [`MemoryStore`] keeps the four tables in ordered maps behind a single
//! [`RwLock`]. Each gateway call takes the lock once, so every call is
//! atomic with respect to every other. Clones share the same tables.
//!
//! Contents are lost when the process exits.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use taskping_proto::model::{
    ChatId, CommitMode, GroupId, NewTask, Participation, Role, Task, TaskDetails,
    TaskGroupSummary, TaskId, User, UserId, UserTaskView, reminder_due,
};
use tokio::sync::RwLock;

use super::{StorageGateway, StoreConnector, StoreError};

#[derive(Debug, Clone)]
struct GroupRow {
    keyname: String,
    remind_in_minutes: Option<u32>,
}

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    groups: BTreeMap<GroupId, GroupRow>,
    tasks: BTreeMap<TaskId, Task>,
    users: BTreeMap<UserId, User>,
    participations: BTreeMap<(UserId, TaskId), Participation>,
}

impl Tables {
    const fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn summary(&self, id: GroupId, row: &GroupRow) -> TaskGroupSummary {
        TaskGroupSummary {
            id,
            keyname: row.keyname.clone(),
            remind_in_minutes: row.remind_in_minutes,
            task_count: self.tasks.values().filter(|t| t.group_id == id).count(),
        }
    }

    fn remove_tasks_of(&mut self, group_id: GroupId) {
        let doomed: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.group_id == group_id)
            .map(|t| t.id)
            .collect();
        for task_id in &doomed {
            self.tasks.remove(task_id);
        }
        self.participations
            .retain(|(_, task_id), _| !doomed.contains(task_id));
    }
}

/// Shared in-memory tables implementing [`StorageGateway`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the participation row for a user/task pair, if assigned.
    pub async fn participation(&self, user_id: UserId, task_id: TaskId) -> Option<Participation> {
        let tables = self.tables.read().await;
        tables.participations.get(&(user_id, task_id)).cloned()
    }
}

impl StoreConnector for MemoryStore {
    type Store = Self;

    async fn connect(&self) -> Result<Self, StoreError> {
        Ok(self.clone())
    }
}

impl StorageGateway for MemoryStore {
    async fn upsert_task_group(
        &self,
        keyname: &str,
        remind_in_minutes: Option<u32>,
    ) -> Result<GroupId, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some((id, row)) = tables
            .groups
            .iter_mut()
            .find(|(_, row)| row.keyname == keyname)
        {
            if remind_in_minutes.is_some() {
                row.remind_in_minutes = remind_in_minutes;
            }
            return Ok(*id);
        }
        let id = GroupId::new(tables.next_id());
        tables.groups.insert(
            id,
            GroupRow {
                keyname: keyname.to_string(),
                remind_in_minutes,
            },
        );
        drop(tables);
        Ok(id)
    }

    async fn find_task_group(&self, keyname: &str) -> Result<Option<TaskGroupSummary>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .iter()
            .find(|(_, row)| row.keyname == keyname)
            .map(|(id, row)| tables.summary(*id, row)))
    }

    async fn replace_tasks(
        &self,
        group_id: GroupId,
        tasks: &[NewTask],
        mode: CommitMode,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.groups.contains_key(&group_id) {
            return Err(StoreError::GroupNotFound(group_id));
        }
        if mode == CommitMode::Replace {
            tables.remove_tasks_of(group_id);
        }
        for new in tasks {
            let id = TaskId::new(tables.next_id());
            tables.tasks.insert(
                id,
                Task {
                    id,
                    group_id,
                    name: new.name.clone(),
                    description: new.description.clone(),
                    deadline: new.deadline,
                    reminder_sent: false,
                },
            );
            for user_id in &new.participants {
                tables
                    .participations
                    .entry((*user_id, id))
                    .or_insert(Participation {
                        user_id: *user_id,
                        task_id: id,
                        again_remind_in_minutes: None,
                        reminder_sent: false,
                    });
            }
        }
        drop(tables);
        Ok(())
    }

    async fn ensure_user(
        &self,
        handle: &str,
        chat_id: ChatId,
        role: Option<Role>,
    ) -> Result<UserId, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(user) = tables.users.values().find(|u| u.handle == handle) {
            return Ok(user.id);
        }
        let id = UserId::new(tables.next_id());
        tables.users.insert(
            id,
            User {
                id,
                handle: handle.to_string(),
                role: role.unwrap_or_default(),
                chat_id,
            },
        );
        drop(tables);
        Ok(id)
    }

    async fn set_user_chat_address(&self, handle: &str, chat_id: ChatId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .users
            .values_mut()
            .find(|u| u.handle == handle)
            .map(|u| u.chat_id = chat_id)
            .is_some())
    }

    async fn find_user(&self, handle: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.handle == handle).cloned())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&user_id).cloned())
    }

    async fn task_participants(&self, task_id: TaskId) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .participations
            .keys()
            .filter(|(_, t)| *t == task_id)
            .filter_map(|(user_id, _)| tables.users.get(user_id).cloned())
            .collect())
    }

    async fn task_details(&self, task_id: TaskId) -> Result<Option<TaskDetails>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.tasks.get(&task_id).and_then(|task| {
            tables.groups.get(&task.group_id).map(|group| TaskDetails {
                task_id,
                name: task.name.clone(),
                description: task.description.clone(),
                deadline: task.deadline,
                keyname: group.keyname.clone(),
            })
        }))
    }

    async fn tasks_in_group(&self, group_id: GroupId) -> Result<Vec<Task>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn tasks_due_for_group_policy(&self, now: NaiveDateTime) -> Result<Vec<TaskId>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|task| !task.reminder_sent)
            .filter(|task| {
                tables
                    .groups
                    .get(&task.group_id)
                    .and_then(|g| g.remind_in_minutes)
                    .is_some_and(|lead| reminder_due(task.deadline, lead, now))
            })
            .map(|task| task.id)
            .collect())
    }

    async fn tasks_due_for_user_policy(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<(UserId, TaskId)>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .participations
            .values()
            .filter(|p| !p.reminder_sent)
            .filter(|p| {
                let deadline = tables.tasks.get(&p.task_id).map(|t| t.deadline);
                match (deadline, p.again_remind_in_minutes) {
                    (Some(deadline), Some(lead)) => reminder_due(deadline, lead, now),
                    _ => false,
                }
            })
            .map(|p| (p.user_id, p.task_id))
            .collect())
    }

    async fn mark_group_reminder_sent(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(task) = tables.tasks.get_mut(&task_id) {
            task.reminder_sent = true;
        }
        drop(tables);
        Ok(())
    }

    async fn mark_user_reminder_sent(&self, user_id: UserId, task_id: TaskId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(p) = tables.participations.get_mut(&(user_id, task_id)) {
            p.reminder_sent = true;
        }
        drop(tables);
        Ok(())
    }

    async fn unmark_group_reminder_sent(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(task) = tables.tasks.get_mut(&task_id) {
            task.reminder_sent = false;
        }
        drop(tables);
        Ok(())
    }

    async fn unmark_user_reminder_sent(
        &self,
        user_id: UserId,
        task_id: TaskId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(p) = tables.participations.get_mut(&(user_id, task_id)) {
            p.reminder_sent = false;
        }
        drop(tables);
        Ok(())
    }

    async fn set_participant_lead_time(
        &self,
        user_id: UserId,
        task_id: TaskId,
        minutes: u32,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .participations
            .get_mut(&(user_id, task_id))
            .map(|p| {
                p.again_remind_in_minutes = Some(minutes);
                p.reminder_sent = false;
            })
            .is_some())
    }

    async fn delete_task_group(&self, group_id: GroupId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.groups.remove(&group_id).is_none() {
            return Ok(false);
        }
        tables.remove_tasks_of(group_id);
        drop(tables);
        Ok(true)
    }

    async fn list_user_tasks(
        &self,
        user_id: UserId,
        now: NaiveDateTime,
    ) -> Result<Vec<UserTaskView>, StoreError> {
        let tables = self.tables.read().await;
        let mut views: Vec<UserTaskView> = tables
            .participations
            .values()
            .filter(|p| p.user_id == user_id)
            .filter_map(|p| {
                let task = tables.tasks.get(&p.task_id)?;
                let group = tables.groups.get(&task.group_id)?;
                (task.deadline > now).then(|| UserTaskView {
                    task_id: task.id,
                    name: task.name.clone(),
                    keyname: group.keyname.clone(),
                    deadline: task.deadline,
                    group_lead_time: group.remind_in_minutes,
                    personal_lead_time: p.again_remind_in_minutes,
                })
            })
            .collect();
        drop(tables);
        views.sort_by_key(|v| (v.deadline, v.task_id));
        Ok(views)
    }

    async fn list_task_groups(&self) -> Result<Vec<TaskGroupSummary>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .iter()
            .map(|(id, row)| tables.summary(*id, row))
            .collect())
    }
}
