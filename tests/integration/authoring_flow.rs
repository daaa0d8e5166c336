//! Integration tests for the event-authoring dialog driven through the
//! command router.
//!
//! Uses `MemoryStore` and `LoopbackTransport`; no network or disk.
//!
//! Verification command: `cargo test --test authoring_flow`

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use taskping_bot::bot::{ADMINS_ONLY_REPLY, Bot, NO_HANDLE_REPLY};
use taskping_bot::conversation::{Conversation, NOT_FOUND_REPLY, Step};
use taskping_bot::store::StorageGateway;
use taskping_bot::store::memory::MemoryStore;
use taskping_bot::transport::loopback::LoopbackTransport;
use taskping_bot::transport::{
    ChatTransport, DocumentRef, Inbound, IncomingMessage, TransportError,
};
use taskping_proto::model::{ChatId, Role};

// =============================================================================
// Test helpers
// =============================================================================

const ORGANIZER: &str = "organizer";
const ORGANIZER_CHAT: ChatId = ChatId::new(100);

const SPRINT_SHEET: &str = "name,description,deadline,participants\n\
                            TaskA,descr,2030-01-01 10:00:00,alice@\n\
                            TaskB,descr,2030-01-02 09:30,bob\n";

type TestBot = Bot<MemoryStore, LoopbackTransport>;

fn setup() -> (TestBot, Arc<LoopbackTransport>, MemoryStore) {
    let store = MemoryStore::new();
    let transport = Arc::new(LoopbackTransport::new());
    let conversation = Conversation::new(
        Duration::from_secs(600),
        vec![".csv".to_string(), ".tsv".to_string()],
    );
    let bot = Bot::new(
        store.clone(),
        Arc::clone(&transport),
        conversation,
        vec!["@organizer".to_string(), "second_org".to_string()],
    );
    (bot, transport, store)
}

fn text(handle: &str, chat: ChatId, body: &str) -> IncomingMessage {
    IncomingMessage {
        handle: Some(handle.to_string()),
        chat_id: chat,
        kind: Inbound::from_text(body),
    }
}

fn upload(handle: &str, chat: ChatId, file_name: &str, reference: &str) -> IncomingMessage {
    IncomingMessage {
        handle: Some(handle.to_string()),
        chat_id: chat,
        kind: Inbound::Document {
            file_name: Some(file_name.to_string()),
            reference: DocumentRef::new(reference),
        },
    }
}

async fn say(bot: &TestBot, handle: &str, chat: ChatId, body: &str) -> String {
    bot.respond(&text(handle, chat, body)).await.unwrap()
}

/// Runs the whole dialog for one event.
async fn author_event(
    bot: &TestBot,
    transport: &LoopbackTransport,
    handle: &str,
    chat: ChatId,
    sheet: &str,
    keyname: &str,
    minutes: &str,
) -> String {
    let reference = format!("{handle}-{keyname}");
    transport.add_document(DocumentRef::new(&reference), sheet.as_bytes().to_vec());
    say(bot, handle, chat, "/newevent").await;
    bot.respond(&upload(handle, chat, "tasks.csv", &reference))
        .await
        .unwrap();
    say(bot, handle, chat, keyname).await;
    say(bot, handle, chat, minutes).await
}

// =============================================================================
// Authoring
// =============================================================================

#[tokio::test]
async fn sprint_scenario_creates_group_with_two_tasks() {
    let (bot, transport, store) = setup();
    transport.add_document(DocumentRef::new("sheet-1"), SPRINT_SHEET.as_bytes().to_vec());

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/newevent").await;
    assert_eq!(bot.conversation().sessions().step(ORGANIZER).await, Step::AwaitingFile);

    bot.respond(&upload(ORGANIZER, ORGANIZER_CHAT, "sprint.csv", "sheet-1"))
        .await
        .unwrap();
    assert_eq!(
        bot.conversation().sessions().step(ORGANIZER).await,
        Step::AwaitingEventName
    );

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "Sprint1").await;
    assert_eq!(
        bot.conversation().sessions().step(ORGANIZER).await,
        Step::AwaitingRemindTime
    );

    let reply = say(&bot, ORGANIZER, ORGANIZER_CHAT, "60").await;
    assert!(reply.contains("Sprint1"), "unexpected reply: {reply}");
    assert_eq!(
        bot.conversation().sessions().step(ORGANIZER).await,
        Step::AwaitingCommands
    );

    let groups = store.list_task_groups().await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].keyname, "Sprint1");
    assert_eq!(groups[0].task_count, 2);
    assert_eq!(groups[0].remind_in_minutes, Some(60));

    let alice = store.find_user("alice").await.unwrap().unwrap();
    assert_eq!(alice.chat_id, ChatId::UNKNOWN);
    assert_eq!(alice.role, Role::Participant);
    // Handles shorter than five characters are not addressable.
    assert!(store.find_user("bob").await.unwrap().is_none());
}

#[tokio::test]
async fn recommitting_a_keyname_replaces_its_tasks() {
    let (bot, transport, store) = setup();
    let big = "h,h,h,h\n\
               T1,,2030-01-01 10:00,alice\n\
               T2,,2030-01-01 11:00,alice\n\
               T3,,2030-01-01 12:00,carol_x\n";
    let small = "h,h,h,h\nOnly,,2030-02-01 10:00,carol_x\n";

    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, big, "Sprint1", "30").await;
    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, small, "Sprint1", "45").await;

    let group = store.find_task_group("Sprint1").await.unwrap().unwrap();
    assert_eq!(group.task_count, 1);
    assert_eq!(group.remind_in_minutes, Some(45));
    let tasks = store.tasks_in_group(group.id).await.unwrap();
    assert_eq!(tasks[0].name, "Only");

    let alice = store.find_user("alice").await.unwrap().unwrap();
    let far_past = chrono::NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    assert!(store.list_user_tasks(alice.id, far_past).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_event_names_leave_step_unchanged() {
    let (bot, transport, store) = setup();
    transport.add_document(DocumentRef::new("s"), SPRINT_SHEET.as_bytes().to_vec());
    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/newevent").await;
    bot.respond(&upload(ORGANIZER, ORGANIZER_CHAT, "s.csv", "s"))
        .await
        .unwrap();

    for bad in ["ThirteenChars", "Sprint/1"] {
        say(&bot, ORGANIZER, ORGANIZER_CHAT, bad).await;
        assert_eq!(
            bot.conversation().sessions().step(ORGANIZER).await,
            Step::AwaitingEventName,
            "name {bad:?} should be rejected"
        );
    }

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "TwelveChars_").await;
    say(&bot, ORGANIZER, ORGANIZER_CHAT, "10").await;
    assert!(store.find_task_group("TwelveChars_").await.unwrap().is_some());
}

#[tokio::test]
async fn newevent_discards_partial_state() {
    let (bot, transport, store) = setup();
    transport.add_document(DocumentRef::new("s"), SPRINT_SHEET.as_bytes().to_vec());
    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/newevent").await;
    bot.respond(&upload(ORGANIZER, ORGANIZER_CHAT, "s.csv", "s"))
        .await
        .unwrap();
    say(&bot, ORGANIZER, ORGANIZER_CHAT, "Abandoned").await;

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/newevent").await;
    assert_eq!(bot.conversation().sessions().step(ORGANIZER).await, Step::AwaitingFile);
    let reply = say(&bot, ORGANIZER, ORGANIZER_CHAT, "10").await;
    assert!(reply.contains("file"), "unexpected reply: {reply}");
    assert!(store.list_task_groups().await.unwrap().is_empty());
}

#[tokio::test]
async fn two_organizers_author_in_parallel() {
    let (bot, transport, store) = setup();
    let other_chat = ChatId::new(200);
    let sheet_b = "h,h,h,h\nX,,2030-03-01 08:00,dave_x\n";
    transport.add_document(DocumentRef::new("a"), SPRINT_SHEET.as_bytes().to_vec());
    transport.add_document(DocumentRef::new("b"), sheet_b.as_bytes().to_vec());

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/newevent").await;
    say(&bot, "second_org", other_chat, "/newevent").await;
    bot.respond(&upload("second_org", other_chat, "b.csv", "b"))
        .await
        .unwrap();
    bot.respond(&upload(ORGANIZER, ORGANIZER_CHAT, "a.csv", "a"))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        say(&bot, ORGANIZER, ORGANIZER_CHAT, "EventA"),
        say(&bot, "second_org", other_chat, "EventB"),
    );
    assert!(!a.is_empty() && !b.is_empty());
    let (a, b) = tokio::join!(
        say(&bot, ORGANIZER, ORGANIZER_CHAT, "20"),
        say(&bot, "second_org", other_chat, "40"),
    );
    assert!(a.contains("EventA"));
    assert!(b.contains("EventB"));

    let a = store.find_task_group("EventA").await.unwrap().unwrap();
    let b = store.find_task_group("EventB").await.unwrap().unwrap();
    assert_eq!((a.task_count, a.remind_in_minutes), (2, Some(20)));
    assert_eq!((b.task_count, b.remind_in_minutes), (1, Some(40)));
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn deleting_unknown_event_reports_not_found() {
    let (bot, transport, store) = setup();
    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, SPRINT_SHEET, "Sprint1", "60")
        .await;

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/delete_task").await;
    assert_eq!(
        bot.conversation().sessions().step(ORGANIZER).await,
        Step::AwaitingDeletion
    );
    let reply = say(&bot, ORGANIZER, ORGANIZER_CHAT, "Ghost").await;
    assert_eq!(reply, NOT_FOUND_REPLY);
    assert_eq!(
        bot.conversation().sessions().step(ORGANIZER).await,
        Step::AwaitingCommands
    );
    assert_eq!(store.list_task_groups().await.unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_an_event_removes_its_tasks() {
    let (bot, transport, store) = setup();
    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, SPRINT_SHEET, "Sprint1", "60")
        .await;
    let group = store.find_task_group("Sprint1").await.unwrap().unwrap();

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/delete_task").await;
    let reply = say(&bot, ORGANIZER, ORGANIZER_CHAT, "Sprint1").await;
    assert!(reply.contains("deleted"));
    assert!(store.list_task_groups().await.unwrap().is_empty());
    assert!(store.tasks_in_group(group.id).await.unwrap().is_empty());
}

// =============================================================================
// Access control and other commands
// =============================================================================

#[tokio::test]
async fn authoring_commands_require_admin() {
    let (bot, _transport, _store) = setup();
    for command in ["/newevent", "/delete_task", "/listall"] {
        assert_eq!(say(&bot, "mallory", ChatId::new(9), command).await, ADMINS_ONLY_REPLY);
    }
    let anonymous = IncomingMessage {
        handle: None,
        chat_id: ChatId::new(9),
        kind: Inbound::from_text("/newevent"),
    };
    assert_eq!(bot.respond(&anonymous).await.unwrap(), NO_HANDLE_REPLY);
    assert_eq!(
        bot.conversation().sessions().step("mallory").await,
        Step::AwaitingCommands
    );
}

#[tokio::test]
async fn start_records_chat_address_and_role() {
    let (bot, transport, store) = setup();
    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, SPRINT_SHEET, "Sprint1", "60")
        .await;

    bot.handle(text("alice", ChatId::new(42), "/start")).await;
    let alice = store.find_user("alice").await.unwrap().unwrap();
    assert_eq!(alice.chat_id, ChatId::new(42));
    assert_eq!(transport.sent_to(ChatId::new(42)).len(), 1);

    say(&bot, ORGANIZER, ORGANIZER_CHAT, "/start").await;
    let organizer = store.find_user(ORGANIZER).await.unwrap().unwrap();
    assert_eq!(organizer.role, Role::Organizer);
    assert_eq!(organizer.chat_id, ORGANIZER_CHAT);
}

#[tokio::test]
async fn listme_groups_tasks_by_event() {
    let (bot, transport, _store) = setup();
    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, SPRINT_SHEET, "Sprint1", "60")
        .await;

    let reply = say(&bot, "alice", ChatId::new(42), "/listme").await;
    assert!(reply.contains("Sprint1:"), "unexpected reply: {reply}");
    assert!(reply.contains("TaskA: 2030-01-01 10:00:00"));
    assert!(!reply.contains("TaskB"));
    assert!(reply.contains("60 minutes"));

    let stranger = say(&bot, "stranger", ChatId::new(43), "/listme").await;
    assert!(stranger.contains("not subscribed"));
}

#[tokio::test]
async fn listall_reports_pending_events() {
    let (bot, transport, store) = setup();
    assert!(say(&bot, ORGANIZER, ORGANIZER_CHAT, "/listall").await.contains("not created"));

    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, SPRINT_SHEET, "Sprint1", "60")
        .await;
    let reply = say(&bot, ORGANIZER, ORGANIZER_CHAT, "/listall").await;
    assert!(reply.contains("Sprint1: 2 task(s)"), "unexpected reply: {reply}");

    let group = store.find_task_group("Sprint1").await.unwrap().unwrap();
    for task in store.tasks_in_group(group.id).await.unwrap() {
        store.mark_group_reminder_sent(task.id).await.unwrap();
    }
    let reply = say(&bot, ORGANIZER, ORGANIZER_CHAT, "/listall").await;
    assert!(reply.contains("No events with pending reminders"));
}

#[tokio::test]
async fn remindme_sets_personal_lead_time() {
    let (bot, transport, store) = setup();
    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, SPRINT_SHEET, "Sprint1", "60")
        .await;

    let reply = say(&bot, "alice", ChatId::new(42), "/remindme Sprint1 15").await;
    assert!(reply.contains("15 minutes"), "unexpected reply: {reply}");

    let alice = store.find_user("alice").await.unwrap().unwrap();
    let group = store.find_task_group("Sprint1").await.unwrap().unwrap();
    let task_a = store.tasks_in_group(group.id).await.unwrap()[0].id;
    let participation = store.participation(alice.id, task_a).await.unwrap();
    assert_eq!(participation.again_remind_in_minutes, Some(15));

    assert!(say(&bot, "alice", ChatId::new(42), "/remindme Ghost 15").await.contains("not found"));
    assert!(say(&bot, "alice", ChatId::new(42), "/remindme Sprint1 0").await.contains("Invalid"));
    assert!(say(&bot, "alice", ChatId::new(42), "/remindme").await.contains("Usage"));
    assert!(
        say(&bot, "stranger", ChatId::new(43), "/remindme Sprint1 5")
            .await
            .contains("no tasks")
    );
}

#[tokio::test]
async fn remindme_accepts_keynames_with_spaces() {
    let (bot, transport, store) = setup();
    author_event(&bot, &transport, ORGANIZER, ORGANIZER_CHAT, SPRINT_SHEET, "Team A", "60")
        .await;
    assert!(store.find_task_group("Team A").await.unwrap().is_some());

    let reply = say(&bot, "alice", ChatId::new(42), "/remindme Team A 20").await;
    assert!(reply.contains("20 minutes"), "unexpected reply: {reply}");
    assert!(reply.contains("'Team A'"));
    assert!(say(&bot, "alice", ChatId::new(42), "/remindme Team").await.contains("Usage"));
}

/// Transport whose sends never complete.
struct StuckTransport;

impl ChatTransport for StuckTransport {
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

#[tokio::test]
async fn stuck_reply_is_abandoned_after_timeout() {
    let bot = Bot::new(
        MemoryStore::new(),
        Arc::new(StuckTransport),
        Conversation::new(Duration::from_secs(600), vec![".csv".to_string()]),
        vec![ORGANIZER.to_string()],
    )
    .with_reply_timeout(Duration::from_millis(50));

    let handled = tokio::time::timeout(
        Duration::from_secs(5),
        bot.handle(text("alice", ChatId::new(42), "/help")),
    )
    .await;
    assert!(handled.is_ok(), "reply send was not bounded");
}

#[tokio::test]
async fn idle_text_gets_help() {
    let (bot, _transport, _store) = setup();
    let reply = say(&bot, "alice", ChatId::new(42), "hello?").await;
    assert!(reply.contains("/listme"));
}
