//! Inbound message router.
//!
//! Commands are answered directly; every other message goes to the
//! sender's authoring dialog. Authoring and deletion require the sender to
//! be on the administrator allow-list.
//!
//! [`Bot::run`] drains the transport in batches. Messages of one batch are
//! grouped per chat: chats are served concurrently, and the messages of a
//! single chat strictly in arrival order.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use taskping_proto::ingest::format_deadline;
use taskping_proto::model::{ChatId, Role};
use taskping_proto::validate::parse_lead_time;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::conversation::Conversation;
use crate::store::{StorageGateway, StoreError};
use crate::transport::{ChatTransport, Inbound, IncomingMessage, TransportError};

/// Reply to senders without a chat handle.
pub const NO_HANDLE_REPLY: &str =
    "Your profile has no username, which is required for this function.";

/// Reply to non-administrators using an administrator command.
pub const ADMINS_ONLY_REPLY: &str = "Sorry, this command is for administrators only.";

/// Reply when a store operation fails unexpectedly.
pub const INTERNAL_ERROR_REPLY: &str = "Something went wrong. Please try again later.";

const NOT_SUBSCRIBED_REPLY: &str = "You are not subscribed to any event yet.";

const HELP_TEXT: &str = "Commands:\n\
    /listme - your upcoming deadlines\n\
    /remindme <event> <minutes> - your own reminder lead time\n\
    /listall - events with pending reminders (administrators)\n\
    /newevent - create or replace an event from a task sheet (administrators)\n\
    /delete_task - delete an event (administrators)";

/// Delay before polling again after a transport error.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default upper bound for sending one reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// The message-handling side of the service.
#[derive(Debug)]
pub struct Bot<S, T> {
    store: S,
    transport: Arc<T>,
    conversation: Conversation,
    admins: HashSet<String>,
    reply_timeout: Duration,
}

impl<S, T> Bot<S, T>
where
    S: StorageGateway + 'static,
    T: ChatTransport + 'static,
{
    /// Creates a router. Admin handles may carry a leading `@`.
    pub fn new(
        store: S,
        transport: Arc<T>,
        conversation: Conversation,
        admins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            store,
            transport,
            conversation,
            admins: admins
                .into_iter()
                .map(|a| a.trim().trim_start_matches('@').to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            reply_timeout: REPLY_TIMEOUT,
        }
    }

    /// Bounds how long a single reply may take to send. A reply that
    /// exceeds it is dropped so one stuck chat cannot stall the poll loop.
    #[must_use]
    pub const fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// The store used for message handling.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The authoring dialog.
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Whether `handle` (with or without `@`) is an administrator.
    #[must_use]
    pub fn is_admin(&self, handle: &str) -> bool {
        self.admins.contains(handle.trim_start_matches('@'))
    }

    /// Handles one message and sends the reply, if any.
    pub async fn handle(&self, message: IncomingMessage) {
        let Some(reply) = self.respond(&message).await else {
            return;
        };
        if let Err(e) = self.send_reply(message.chat_id, &reply).await {
            warn!(chat = %message.chat_id, handle = ?message.handle, error = %e, "failed to send reply");
        }
    }

    async fn send_reply(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError> {
        tokio::time::timeout(self.reply_timeout, self.transport.send_text(chat_id, text))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Computes the reply to one message without sending it.
    pub async fn respond(&self, message: &IncomingMessage) -> Option<String> {
        let handle = message.handle.as_deref();
        match &message.kind {
            Inbound::Command { name, args } => {
                debug!(command = %name, handle = ?handle, "command received");
                Some(self.command(name, args, handle, message.chat_id).await)
            }
            Inbound::Text(text) => {
                let Some(handle) = handle else {
                    return Some(NO_HANDLE_REPLY.to_string());
                };
                Some(
                    self.conversation
                        .on_text(handle, text, &self.store)
                        .await
                        .unwrap_or_else(|| HELP_TEXT.to_string()),
                )
            }
            Inbound::Document {
                file_name,
                reference,
            } => {
                let Some(handle) = handle else {
                    return Some(NO_HANDLE_REPLY.to_string());
                };
                Some(
                    self.conversation
                        .on_document(handle, file_name.as_deref(), reference, self.transport.as_ref())
                        .await,
                )
            }
        }
    }

    async fn command(
        &self,
        name: &str,
        args: &[String],
        handle: Option<&str>,
        chat_id: ChatId,
    ) -> String {
        if name == "start" {
            return self.start(handle, chat_id).await;
        }
        if name == "help" {
            return HELP_TEXT.to_string();
        }
        let Some(handle) = handle else {
            return NO_HANDLE_REPLY.to_string();
        };
        let admin_only = matches!(name, "listall" | "newevent" | "delete_task");
        if admin_only && !self.is_admin(handle) {
            info!(handle, command = %name, "rejected administrator command");
            return ADMINS_ONLY_REPLY.to_string();
        }

        let result = match name {
            "listme" => self.list_me(handle, Local::now().naive_local()).await,
            "listall" => self.list_all().await,
            "newevent" => Ok(self.conversation.begin_event(handle).await),
            "delete_task" => Ok(self.conversation.begin_deletion(handle).await),
            "remindme" => self.remind_me(handle, args).await,
            _ => Ok(format!("Unknown command /{name}.\n\n{HELP_TEXT}")),
        };
        result.unwrap_or_else(|e| {
            error!(handle, command = %name, error = %e, "command failed");
            INTERNAL_ERROR_REPLY.to_string()
        })
    }

    async fn start(&self, handle: Option<&str>, chat_id: ChatId) -> String {
        let greeting = "Hello! I send reminders about the deadlines of the tasks you are assigned to.";
        let Some(handle) = handle else {
            return format!(
                "{greeting}\n\nYour profile has no username, so some functions are unavailable."
            );
        };
        let role = if self.is_admin(handle) {
            Role::Organizer
        } else {
            Role::Participant
        };
        let registered = match self.store.ensure_user(handle, chat_id, Some(role)).await {
            Ok(_) => self.store.set_user_chat_address(handle, chat_id).await,
            Err(e) => Err(e),
        };
        match registered {
            Ok(_) => {
                info!(handle, chat = %chat_id, %role, "user registered");
                format!("{greeting}\n\n{HELP_TEXT}")
            }
            Err(e) => {
                error!(handle, error = %e, "failed to register user");
                INTERNAL_ERROR_REPLY.to_string()
            }
        }
    }

    async fn list_me(&self, handle: &str, now: NaiveDateTime) -> Result<String, StoreError> {
        let Some(user) = self.store.find_user(handle).await? else {
            return Ok(NOT_SUBSCRIBED_REPLY.to_string());
        };
        let views = self.store.list_user_tasks(user.id, now).await?;
        if views.is_empty() {
            return Ok(NOT_SUBSCRIBED_REPLY.to_string());
        }

        let mut events: Vec<(&str, Option<u32>, Vec<String>)> = Vec::new();
        for view in &views {
            let mut line = format!("  - {}: {}", view.name, format_deadline(view.deadline));
            if let Some(personal) = view.personal_lead_time {
                let _ = write!(line, " (your reminder: {personal} minutes before)");
            }
            match events.iter_mut().find(|(k, _, _)| *k == view.keyname) {
                Some((_, _, lines)) => lines.push(line),
                None => events.push((view.keyname.as_str(), view.group_lead_time, vec![line])),
            }
        }

        let mut reply = String::from("You are subscribed to the following events and deadlines:\n");
        for (keyname, lead, lines) in events {
            let _ = write!(reply, "\n{keyname}:\n{}\n", lines.join("\n"));
            match lead {
                Some(minutes) => {
                    let _ = writeln!(reply, "You will be reminded {minutes} minutes before the deadline.");
                }
                None => reply.push_str("No reminder set.\n"),
            }
        }
        Ok(reply.trim_end().to_string())
    }

    async fn list_all(&self) -> Result<String, StoreError> {
        let groups = self.store.list_task_groups().await?;
        if groups.is_empty() {
            return Ok("You have not created any events yet.".to_string());
        }
        let mut reply = String::new();
        for group in groups {
            let tasks = self.store.tasks_in_group(group.id).await?;
            if tasks.iter().all(|t| t.reminder_sent) {
                continue;
            }
            let lead = group.remind_in_minutes.map_or_else(
                || "no reminder set".to_string(),
                |m| format!("reminder {m} minutes before the deadline"),
            );
            let _ = writeln!(reply, "{}: {} task(s), {lead}", group.keyname, group.task_count);
        }
        if reply.is_empty() {
            return Ok("No events with pending reminders.".to_string());
        }
        Ok(format!("Events:\n{}", reply.trim_end()))
    }

    async fn remind_me(&self, handle: &str, args: &[String]) -> Result<String, StoreError> {
        // The keyname may itself contain spaces; minutes are always last.
        let [first, rest @ .., minutes] = args else {
            return Ok("Usage: /remindme <event> <minutes>".to_string());
        };
        let name_parts = std::iter::once(first).chain(rest).map(String::as_str);
        let keyname = name_parts.collect::<Vec<_>>().join(" ");
        let Ok(minutes) = parse_lead_time(minutes) else {
            return Ok("Invalid number. Please enter a positive whole number of minutes.".to_string());
        };
        let Some(group) = self.store.find_task_group(&keyname).await? else {
            return Ok(format!("Event '{keyname}' not found."));
        };
        let no_tasks = format!("You have no tasks in event '{keyname}'.");
        let Some(user) = self.store.find_user(handle).await? else {
            return Ok(no_tasks);
        };

        let mut updated = 0_usize;
        for task in self.store.tasks_in_group(group.id).await? {
            if self
                .store
                .set_participant_lead_time(user.id, task.id, minutes)
                .await?
            {
                updated += 1;
            }
        }
        if updated == 0 {
            return Ok(no_tasks);
        }
        info!(handle, keyname = %keyname, minutes, tasks = updated, "personal lead time set");
        Ok(format!(
            "You will be reminded {minutes} minutes before each of your {updated} task(s) in '{keyname}'."
        ))
    }

    /// Polls the transport until it closes. Poll failures are logged and
    /// retried after a short delay.
    pub async fn run(self: Arc<Self>) {
        info!(admins = self.admins.len(), "bot polling started");
        loop {
            let batch = match self.transport.poll().await {
                Ok(batch) => batch,
                Err(TransportError::Closed) => {
                    info!("transport closed, stopping bot");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "poll failed");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let swept = self.conversation.sessions().sweep();
            if swept > 0 {
                debug!(swept, "idle sessions removed");
            }

            let mut per_chat: HashMap<ChatId, Vec<IncomingMessage>> = HashMap::new();
            for message in batch {
                per_chat.entry(message.chat_id).or_default().push(message);
            }
            let mut workers = JoinSet::new();
            for (_, messages) in per_chat {
                let bot = Arc::clone(&self);
                workers.spawn(async move {
                    for message in messages {
                        bot.handle(message).await;
                    }
                });
            }
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "message handler panicked");
                }
            }
        }
    }
}
