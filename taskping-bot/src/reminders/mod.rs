//! Deadline reminder engine.
//!
//! [`scheduler::ReminderScheduler`] finds what is due on each tick and
//! [`dispatch::NotificationDispatcher`] delivers it. Delivery is
//! at-least-once: the dedup flag is set only after the transport accepted
//! the message.

pub mod dispatch;
pub mod scheduler;

pub use dispatch::{DispatchReport, NotificationDispatcher, Obligation, format_reminder};
pub use scheduler::{ReminderScheduler, collect_obligations};
