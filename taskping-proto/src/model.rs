//! Data model for task groups ("events"), their tasks, and participants.
//!
//! Identifiers are thin newtypes over the store's integer row ids so that a
//! `TaskId` can never be passed where a `UserId` is expected. Timestamps are
//! naive: the whole system runs in the server's single implicit time zone.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Maximum length of an event keyname, in characters.
pub const MAX_EVENT_NAME_LEN: usize = 12;

/// Minimum length of a chat handle for it to count as an addressable user.
pub const MIN_HANDLE_LEN: usize = 5;

/// Name given to tasks whose name cell was left blank.
pub const UNTITLED_TASK_NAME: &str = "Untitled task";

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw store row id.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw store row id.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a [`TaskGroup`](TaskGroupSummary).
    GroupId
);
row_id!(
    /// Identifier of a [`Task`].
    TaskId
);
row_id!(
    /// Identifier of a [`User`].
    UserId
);

/// Delivery address of a user in the chat network.
///
/// `0` means the address is not known yet: the user has been mentioned in a
/// task sheet but has never opened a conversation with the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChatId(i64);

impl ChatId {
    /// The "not yet known" address.
    pub const UNKNOWN: Self = Self(0);

    /// Wraps a raw chat identifier.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw chat identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether a message can be addressed to this chat.
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    /// May author and delete events.
    Organizer,
    /// Receives reminders for assigned tasks.
    #[default]
    Participant,
}

impl Role {
    /// Stable lowercase name, used as the stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Organizer => "organizer",
            Self::Participant => "participant",
        }
    }

    /// Parses the stored representation back into a role.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "organizer" => Some(Self::Organizer),
            "participant" => Some(Self::Participant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known user of the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store identity.
    pub id: UserId,
    /// Chat handle without the leading `@`; case-sensitive.
    pub handle: String,
    /// Access level.
    pub role: Role,
    /// Delivery address, [`ChatId::UNKNOWN`] until the user contacts the bot.
    pub chat_id: ChatId,
}

/// A task group as reported by listing and lookup queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroupSummary {
    /// Store identity.
    pub id: GroupId,
    /// Organizer-chosen unique name.
    pub keyname: String,
    /// Default reminder lead time; `None` until first set.
    pub remind_in_minutes: Option<u32>,
    /// Number of tasks currently in the group.
    pub task_count: usize,
}

/// A single task inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store identity.
    pub id: TaskId,
    /// Owning group.
    pub group_id: GroupId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Absolute deadline in server time.
    pub deadline: NaiveDateTime,
    /// Group-policy dedup flag.
    pub reminder_sent: bool,
}

/// Assignment of a user to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    /// Assigned user.
    pub user_id: UserId,
    /// Assigned task.
    pub task_id: TaskId,
    /// Personal lead time override; `None` means the user policy never fires.
    pub again_remind_in_minutes: Option<u32>,
    /// User-policy dedup flag, independent of [`Task::reminder_sent`].
    pub reminder_sent: bool,
}

/// Everything the reminder template needs about one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetails {
    /// Task identity.
    pub task_id: TaskId,
    /// Task name.
    pub name: String,
    /// Task description.
    pub description: String,
    /// Task deadline.
    pub deadline: NaiveDateTime,
    /// Keyname of the owning group.
    pub keyname: String,
}

/// One row of a user's personal task listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTaskView {
    /// Task identity.
    pub task_id: TaskId,
    /// Task name.
    pub name: String,
    /// Keyname of the owning group.
    pub keyname: String,
    /// Task deadline.
    pub deadline: NaiveDateTime,
    /// Group lead time.
    pub group_lead_time: Option<u32>,
    /// The user's personal lead time override, if any.
    pub personal_lead_time: Option<u32>,
}

/// A task ready to be committed into a group, participants already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task name.
    pub name: String,
    /// Task description.
    pub description: String,
    /// Task deadline.
    pub deadline: NaiveDateTime,
    /// Users assigned to the task.
    pub participants: Vec<UserId>,
}

/// How a task commit treats the group's existing tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitMode {
    /// Remove every existing task of the group first.
    Replace,
    /// Keep existing tasks and add the new ones.
    Append,
}

/// Which lead-time policy produced a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderPolicy {
    /// The group's default lead time; dedup flag lives on the task.
    Group,
    /// A participant's personal override; dedup flag lives on the participation.
    User,
}

impl std::fmt::Display for ReminderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Whether a reminder with the given lead time is due at `now`.
///
/// Due means the remaining time until the deadline is at most the lead time.
/// Deadlines already in the past are always due.
#[must_use]
pub fn reminder_due(deadline: NaiveDateTime, lead_minutes: u32, now: NaiveDateTime) -> bool {
    deadline.signed_duration_since(now) <= TimeDelta::minutes(i64::from(lead_minutes))
}
