//! Delivery of reminder messages.
//!
//! One message per obligation. A failed delivery is logged with the
//! recipient's handle and skipped; its dedup flag stays unset so the next
//! tick retries it. A successful delivery sets the flag of the policy that
//! produced the obligation. The group flag is per task, so it is set only
//! once every group-policy recipient of that task in the batch was reached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use taskping_proto::ingest::format_deadline;
use taskping_proto::model::{ReminderPolicy, TaskDetails, TaskId, User};
use tracing::{debug, error, warn};

use crate::store::StorageGateway;
use crate::transport::{ChatTransport, TransportError};

/// One reminder to deliver: a recipient, a task, and the policy that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obligation {
    /// Who gets the message.
    pub recipient: User,
    /// Which task it is about.
    pub task_id: TaskId,
    /// Which dedup flag to set on success.
    pub policy: ReminderPolicy,
}

/// Outcome counts of one dispatch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages handed to the transport successfully.
    pub delivered: usize,
    /// Deliveries that failed or timed out.
    pub failed: usize,
    /// Obligations whose task disappeared before delivery.
    pub skipped: usize,
}

/// Renders the reminder text for a task.
#[must_use]
pub fn format_reminder(details: &TaskDetails) -> String {
    let mut text = format!(
        "Reminder: task \"{}\" of event \"{}\" is due at {}.",
        details.name,
        details.keyname,
        format_deadline(details.deadline)
    );
    if !details.description.trim().is_empty() {
        text.push_str("\n\n");
        text.push_str(&details.description);
    }
    text
}

/// Sends reminders through a [`ChatTransport`] and records what was sent.
#[derive(Debug)]
pub struct NotificationDispatcher<T> {
    transport: Arc<T>,
    timeout: Duration,
}

impl<T: ChatTransport> NotificationDispatcher<T> {
    /// Creates a dispatcher that gives each send at most `timeout`.
    #[must_use]
    pub const fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Delivers every obligation, continuing past individual failures.
    pub async fn dispatch<S: StorageGateway>(
        &self,
        store: &S,
        obligations: &[Obligation],
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut details: HashMap<TaskId, Option<TaskDetails>> = HashMap::new();
        // Task id -> whether every group-policy send for it succeeded.
        let mut group_outcome: HashMap<TaskId, bool> = HashMap::new();

        for obligation in obligations {
            let task_id = obligation.task_id;
            if !details.contains_key(&task_id) {
                let fetched = match store.task_details(task_id).await {
                    Ok(found) => found,
                    Err(e) => {
                        error!(task = %task_id, error = %e, "failed to load task for reminder");
                        None
                    }
                };
                details.insert(task_id, fetched);
            }
            let Some(Some(task)) = details.get(&task_id) else {
                report.skipped += 1;
                continue;
            };

            let handle = &obligation.recipient.handle;
            let sent = self.deliver(&obligation.recipient, &format_reminder(task)).await;
            if let Err(e) = &sent {
                warn!(recipient = %handle, task = %task_id, policy = %obligation.policy, error = %e, "reminder delivery failed");
                report.failed += 1;
            } else {
                report.delivered += 1;
                debug!(recipient = %handle, task = %task_id, policy = %obligation.policy, "reminder delivered");
            }

            match obligation.policy {
                ReminderPolicy::Group => {
                    let all_sent = group_outcome.entry(task_id).or_insert(true);
                    *all_sent &= sent.is_ok();
                }
                ReminderPolicy::User if sent.is_ok() => {
                    if let Err(e) = store
                        .mark_user_reminder_sent(obligation.recipient.id, task_id)
                        .await
                    {
                        error!(recipient = %handle, task = %task_id, error = %e, "failed to record sent reminder");
                    }
                }
                ReminderPolicy::User => {}
            }
        }

        for (task_id, all_sent) in group_outcome {
            if !all_sent {
                debug!(task = %task_id, "group reminder left unmarked for retry");
                continue;
            }
            if let Err(e) = store.mark_group_reminder_sent(task_id).await {
                error!(task = %task_id, error = %e, "failed to record sent reminder");
            }
        }
        report
    }

    async fn deliver(&self, recipient: &User, text: &str) -> Result<(), TransportError> {
        if !recipient.chat_id.is_known() {
            return Err(TransportError::Unreachable(recipient.chat_id));
        }
        tokio::time::timeout(self.timeout, self.transport.send_text(recipient.chat_id, text))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}
