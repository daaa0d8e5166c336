//! Chat transport abstraction.
//!
//! Defines the [`ChatTransport`] trait the bot and the reminder dispatcher
//! talk through. Concrete implementations:
//! - [`loopback::LoopbackTransport`] - in-process transport for tests
//! - [`telegram::TelegramTransport`] - Telegram Bot API over HTTPS

pub mod loopback;
pub mod telegram;

use std::fmt;

use taskping_proto::model::ChatId;

/// Opaque reference to an uploaded document, resolvable by the transport
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef(String);

impl DocumentRef {
    /// Wraps a transport-specific file identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the file identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an inbound message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A `/command`, name lowercased and without the slash or `@botname`.
    Command {
        /// Command name, e.g. `newevent`.
        name: String,
        /// Whitespace-separated arguments after the command.
        args: Vec<String>,
    },
    /// Plain text.
    Text(String),
    /// An uploaded file.
    Document {
        /// File name as sent by the client, if any.
        file_name: Option<String>,
        /// Reference used to download the content.
        reference: DocumentRef,
    },
}

/// A message received from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Sender handle without `@`; `None` if the account has no username.
    pub handle: Option<String>,
    /// Chat the message arrived in; replies go here.
    pub chat_id: ChatId,
    /// Message content.
    pub kind: Inbound,
}

impl Inbound {
    /// Parses raw message text into a command or plain text.
    ///
    /// `/NewEvent@my_bot arg` becomes `Command { name: "newevent", args: ["arg"] }`.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Self::Text(text.to_string());
        };
        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        if name.is_empty() {
            return Self::Text(text.to_string());
        }
        Self::Command {
            name,
            args: parts.map(str::to_string).collect(),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The recipient cannot be addressed.
    #[error("chat {0} is unreachable")]
    Unreachable(ChatId),

    /// The operation did not complete in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The inbound side has been shut down.
    #[error("transport closed")]
    Closed,

    /// The HTTP request itself failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The chat API rejected the request.
    #[error("api error {code}: {description}")]
    Api {
        /// Error code returned by the API.
        code: i64,
        /// Human-readable reason.
        description: String,
    },

    /// A referenced document does not exist.
    #[error("document {0} not found")]
    DocumentMissing(DocumentRef),
}

/// Async transport for exchanging messages with chat users.
pub trait ChatTransport: Send + Sync {
    /// Sends a text message to a chat.
    ///
    /// Implementations fail with [`TransportError::Unreachable`] for
    /// [`ChatId::UNKNOWN`] without touching the network.
    fn send_text(
        &self,
        chat: ChatId,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Downloads the bytes of an uploaded document.
    fn fetch_document(
        &self,
        document: &DocumentRef,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Waits for the next batch of inbound messages.
    ///
    /// An empty batch is a normal outcome of a poll timeout.
    fn poll(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<IncomingMessage>, TransportError>> + Send;
}
