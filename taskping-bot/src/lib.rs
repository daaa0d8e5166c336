//! `TaskPing` bot library.
//!
//! Exposes the command router, authoring dialog, reminder engine, storage
//! gateways and chat transports for use in tests and embedding. The
//! `taskping` binary wires them to `SQLite` and the Telegram Bot API.

pub mod bot;
pub mod config;
pub mod conversation;
pub mod reminders;
pub mod store;
pub mod transport;
