//! Integration tests for the reminder engine: due detection, delivery,
//! dedup flags and failure isolation.
//!
//! Time is injected through `ReminderScheduler::tick_at`, so no test
//! depends on the wall clock.
//!
//! Verification command: `cargo test --test reminder_delivery`

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use taskping_bot::reminders::{
    NotificationDispatcher, Obligation, ReminderScheduler, collect_obligations,
};
use taskping_bot::store::StorageGateway;
use taskping_bot::store::memory::MemoryStore;
use taskping_bot::transport::loopback::LoopbackTransport;
use taskping_bot::transport::{ChatTransport, DocumentRef, IncomingMessage, TransportError};
use taskping_proto::model::{
    ChatId, CommitMode, NewTask, ReminderPolicy, TaskId, User, UserId,
};

// =============================================================================
// Test helpers
// =============================================================================

fn deadline() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2030, 1, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn minutes_before(minutes: i64) -> NaiveDateTime {
    deadline() - TimeDelta::minutes(minutes)
}

async fn user(store: &MemoryStore, handle: &str, chat: i64) -> UserId {
    store
        .ensure_user(handle, ChatId::new(chat), None)
        .await
        .unwrap()
}

/// Creates a group with one task per participant list, all due at
/// [`deadline`]. Returns the task ids in order.
async fn seed(
    store: &MemoryStore,
    keyname: &str,
    lead: Option<u32>,
    participants: &[Vec<UserId>],
) -> Vec<TaskId> {
    let group = store.upsert_task_group(keyname, lead).await.unwrap();
    let tasks: Vec<NewTask> = participants
        .iter()
        .enumerate()
        .map(|(i, users)| NewTask {
            name: format!("Task{i}"),
            description: "descr".to_string(),
            deadline: deadline(),
            participants: users.clone(),
        })
        .collect();
    store
        .replace_tasks(group, &tasks, CommitMode::Replace)
        .await
        .unwrap();
    store
        .tasks_in_group(group)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect()
}

fn scheduler<T: ChatTransport>(
    store: &MemoryStore,
    transport: Arc<T>,
    timeout: Duration,
) -> ReminderScheduler<MemoryStore, T> {
    ReminderScheduler::new(
        store.clone(),
        NotificationDispatcher::new(transport, timeout),
        Duration::from_secs(30),
    )
}

/// Transport whose sends never complete.
struct HangingTransport;

impl ChatTransport for HangingTransport {
    async fn send_text(&self, _chat: ChatId, _text: &str) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn fetch_document(&self, document: &DocumentRef) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::DocumentMissing(document.clone()))
    }

    async fn poll(&self) -> Result<Vec<IncomingMessage>, TransportError> {
        Err(TransportError::Closed)
    }
}

// =============================================================================
// Group policy
// =============================================================================

#[tokio::test]
async fn group_reminder_is_delivered_once() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let alice = user(&store, "alice", 1).await;
    let carol = user(&store, "carol_x", 2).await;
    let tasks = seed(&store, "Sprint1", Some(60), &[vec![alice, carol]]).await;
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));

    let early = scheduler.tick_at(minutes_before(61)).await.unwrap();
    assert_eq!(early.delivered, 0);

    let report = scheduler.tick_at(minutes_before(60)).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(transport.sent_to(ChatId::new(1)).len(), 1);
    assert!(transport.sent_to(ChatId::new(2))[0].contains("Sprint1"));

    let again = scheduler.tick_at(minutes_before(30)).await.unwrap();
    assert_eq!(again.delivered, 0);
    assert!(
        store
            .tasks_due_for_group_policy(minutes_before(30))
            .await
            .unwrap()
            .is_empty()
    );
    assert!(!store.tasks_due_for_group_policy(minutes_before(0)).await.unwrap().contains(&tasks[0]));
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn past_deadlines_are_due_immediately() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let alice = user(&store, "alice", 1).await;
    seed(&store, "Late", Some(5), &[vec![alice]]).await;
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));

    let report = scheduler
        .tick_at(deadline() + TimeDelta::days(3))
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn one_failing_recipient_does_not_block_others() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let alice = user(&store, "alice", 1).await;
    let bobby = user(&store, "bobby", 2).await;
    let carol = user(&store, "carol_x", 3).await;
    let tasks = seed(&store, "G", Some(60), &[vec![alice], vec![bobby], vec![carol]]).await;
    transport.fail_chat(ChatId::new(2));
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));
    let now = minutes_before(10);

    let report = scheduler.tick_at(now).await.unwrap();
    assert_eq!((report.delivered, report.failed), (2, 1));
    assert_eq!(store.tasks_due_for_group_policy(now).await.unwrap(), vec![tasks[1]]);

    let retry = scheduler.tick_at(now).await.unwrap();
    assert_eq!((retry.delivered, retry.failed), (0, 1));

    transport.heal_chat(ChatId::new(2));
    let healed = scheduler.tick_at(now).await.unwrap();
    assert_eq!((healed.delivered, healed.failed), (1, 0));
    assert!(store.tasks_due_for_group_policy(now).await.unwrap().is_empty());
    assert_eq!(transport.sent_to(ChatId::new(2)).len(), 1);
}

#[tokio::test]
async fn shared_task_is_retried_until_every_participant_is_reached() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let alice = user(&store, "alice", 1).await;
    // Ingested from a sheet, has not sent /start yet.
    let bobby = user(&store, "bobby", 0).await;
    let tasks = seed(&store, "G", Some(60), &[vec![alice, bobby]]).await;
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));
    let now = minutes_before(10);

    let first = scheduler.tick_at(now).await.unwrap();
    assert_eq!((first.delivered, first.failed), (1, 1));
    assert_eq!(store.tasks_due_for_group_policy(now).await.unwrap(), tasks);

    assert!(
        store
            .set_user_chat_address("bobby", ChatId::new(2))
            .await
            .unwrap()
    );
    let second = scheduler.tick_at(now).await.unwrap();
    assert_eq!((second.delivered, second.failed), (2, 0));
    assert_eq!(transport.sent_to(ChatId::new(2)).len(), 1);
    // Reached twice: duplicates are allowed, misses are not.
    assert_eq!(transport.sent_to(ChatId::new(1)).len(), 2);

    let third = scheduler.tick_at(now).await.unwrap();
    assert_eq!(third, Default::default());
    assert!(store.tasks_due_for_group_policy(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_chat_address_is_a_failure_without_sending() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let ghost = user(&store, "ghost_user", 0).await;
    let tasks = seed(&store, "G", Some(60), &[vec![ghost]]).await;
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));

    let report = scheduler.tick_at(minutes_before(1)).await.unwrap();
    assert_eq!((report.delivered, report.failed), (0, 1));
    assert!(transport.sent().is_empty());
    assert_eq!(
        store.tasks_due_for_group_policy(minutes_before(1)).await.unwrap(),
        tasks
    );
}

#[tokio::test]
async fn hung_delivery_times_out() {
    let store = MemoryStore::new();
    let alice = user(&store, "alice", 1).await;
    seed(&store, "G", Some(60), &[vec![alice]]).await;
    let scheduler = scheduler(&store, Arc::new(HangingTransport), Duration::from_millis(50));

    let report = scheduler.tick_at(minutes_before(1)).await.unwrap();
    assert_eq!((report.delivered, report.failed), (0, 1));
}

// =============================================================================
// User policy
// =============================================================================

#[tokio::test]
async fn user_policy_marks_only_the_participation() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let alice = user(&store, "alice", 1).await;
    let tasks = seed(&store, "G", None, &[vec![alice]]).await;
    store
        .set_participant_lead_time(alice, tasks[0], 30)
        .await
        .unwrap();
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));

    let obligations = collect_obligations(&store, minutes_before(20)).await.unwrap();
    assert_eq!(obligations.len(), 1);
    assert_eq!(obligations[0].policy, ReminderPolicy::User);

    let report = scheduler.tick_at(minutes_before(20)).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(store.participation(alice, tasks[0]).await.unwrap().reminder_sent);
    let group = store.find_task_group("G").await.unwrap().unwrap();
    assert!(!store.tasks_in_group(group.id).await.unwrap()[0].reminder_sent);

    let again = scheduler.tick_at(minutes_before(10)).await.unwrap();
    assert_eq!(again.delivered, 0);
}

#[tokio::test]
async fn group_and_user_flags_are_independent() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let alice = user(&store, "alice", 1).await;
    let tasks = seed(&store, "G", Some(60), &[vec![alice]]).await;
    store
        .set_participant_lead_time(alice, tasks[0], 10)
        .await
        .unwrap();
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));

    let group_hit = scheduler.tick_at(minutes_before(50)).await.unwrap();
    assert_eq!(group_hit.delivered, 1);
    assert!(!store.participation(alice, tasks[0]).await.unwrap().reminder_sent);

    let user_hit = scheduler.tick_at(minutes_before(5)).await.unwrap();
    assert_eq!(user_hit.delivered, 1);
    assert_eq!(transport.sent_to(ChatId::new(1)).len(), 2);

    store.unmark_user_reminder_sent(alice, tasks[0]).await.unwrap();
    store.unmark_group_reminder_sent(tasks[0]).await.unwrap();
    let both = collect_obligations(&store, minutes_before(5)).await.unwrap();
    assert_eq!(both.len(), 2);
}

#[tokio::test]
async fn null_lead_times_never_fire() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let alice = user(&store, "alice", 1).await;
    seed(&store, "G", None, &[vec![alice]]).await;
    let scheduler = scheduler(&store, Arc::clone(&transport), Duration::from_secs(1));

    let report = scheduler
        .tick_at(deadline() + TimeDelta::days(1))
        .await
        .unwrap();
    assert_eq!(report, Default::default());
    assert!(transport.sent().is_empty());
}

// =============================================================================
// Dispatcher
// =============================================================================

#[tokio::test]
async fn vanished_task_is_skipped() {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let dispatcher = NotificationDispatcher::new(Arc::clone(&transport), Duration::from_secs(1));
    let obligation = Obligation {
        recipient: User {
            id: UserId::new(1),
            handle: "alice".to_string(),
            role: taskping_proto::model::Role::Participant,
            chat_id: ChatId::new(1),
        },
        task_id: TaskId::new(404),
        policy: ReminderPolicy::Group,
    };

    let report = dispatcher.dispatch(&store, &[obligation]).await;
    assert_eq!(report.skipped, 1);
    assert!(transport.sent().is_empty());
}
