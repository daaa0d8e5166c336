//! Periodic detection of due reminders.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use taskping_proto::model::ReminderPolicy;
use tracing::{debug, error, info, warn};

use super::dispatch::{DispatchReport, NotificationDispatcher, Obligation};
use crate::store::{StorageGateway, StoreConnector, StoreError};
use crate::transport::ChatTransport;

/// Builds the delivery obligations that are due at `now`.
///
/// Group-policy hits expand to every participant of the task; user-policy
/// hits already name their recipient. A (user, task) pair due under both
/// policies yields two obligations, one per dedup flag.
///
/// # Errors
///
/// Propagates the first [`StoreError`].
pub async fn collect_obligations<S: StorageGateway>(
    store: &S,
    now: NaiveDateTime,
) -> Result<Vec<Obligation>, StoreError> {
    let mut obligations = Vec::new();

    for task_id in store.tasks_due_for_group_policy(now).await? {
        for recipient in store.task_participants(task_id).await? {
            obligations.push(Obligation {
                recipient,
                task_id,
                policy: ReminderPolicy::Group,
            });
        }
    }

    for (user_id, task_id) in store.tasks_due_for_user_policy(now).await? {
        match store.get_user(user_id).await? {
            Some(recipient) => obligations.push(Obligation {
                recipient,
                task_id,
                policy: ReminderPolicy::User,
            }),
            None => warn!(user = %user_id, task = %task_id, "due reminder for unknown user"),
        }
    }

    Ok(obligations)
}

/// Wakes on a fixed interval and delivers every reminder that became due.
#[derive(Debug)]
pub struct ReminderScheduler<C, T> {
    connector: C,
    dispatcher: NotificationDispatcher<T>,
    interval: Duration,
}

impl<C, T> ReminderScheduler<C, T>
where
    C: StoreConnector,
    T: ChatTransport,
{
    /// Creates a scheduler ticking every `interval`.
    #[must_use]
    pub const fn new(connector: C, dispatcher: NotificationDispatcher<T>, interval: Duration) -> Self {
        Self {
            connector,
            dispatcher,
            interval,
        }
    }

    /// Runs one scan against a fresh store handle, treating `now` as the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be reached or queried.
    /// Delivery failures are not errors; they are counted in the report.
    pub async fn tick_at(&self, now: NaiveDateTime) -> Result<DispatchReport, StoreError> {
        let store = self.connector.connect().await?;
        let obligations = collect_obligations(&store, now).await?;
        debug!(obligations = obligations.len(), "reminder tick");
        if obligations.is_empty() {
            return Ok(DispatchReport::default());
        }
        let report = self.dispatcher.dispatch(&store, &obligations).await;
        info!(
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "reminders dispatched"
        );
        Ok(report)
    }

    /// Runs one scan at the server's local time.
    ///
    /// # Errors
    ///
    /// See [`tick_at`](Self::tick_at).
    pub async fn tick(&self) -> Result<DispatchReport, StoreError> {
        self.tick_at(Local::now().naive_local()).await
    }

    /// Ticks forever. Errors are logged and the next tick proceeds.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "reminder scheduler started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "reminder tick failed");
            }
        }
    }
}
