//! Loopback transport for testing.
//!
//! Outbound messages are recorded instead of sent, uploaded documents are
//! served from an in-memory map, and inbound messages are fed through a
//! [`tokio::sync::mpsc`] channel. Individual chats can be marked as failing
//! to exercise delivery error paths.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use taskping_proto::model::ChatId;
use tokio::sync::mpsc;

use super::{ChatTransport, DocumentRef, IncomingMessage, TransportError};

/// In-process transport that records what the bot sends.
#[derive(Debug)]
pub struct LoopbackTransport {
    sent: Mutex<Vec<(ChatId, String)>>,
    documents: Mutex<HashMap<DocumentRef, Vec<u8>>>,
    failing: Mutex<HashSet<ChatId>>,
    inbox_tx: mpsc::UnboundedSender<IncomingMessage>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<IncomingMessage>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    /// Creates a transport with no documents and no failing chats.
    #[must_use]
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            documents: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
        }
    }

    /// Makes a document available for [`ChatTransport::fetch_document`].
    pub fn add_document(&self, reference: DocumentRef, bytes: impl Into<Vec<u8>>) {
        self.documents.lock().insert(reference, bytes.into());
    }

    /// Makes every send to `chat` fail with [`TransportError::Unreachable`].
    pub fn fail_chat(&self, chat: ChatId) {
        self.failing.lock().insert(chat);
    }

    /// Undoes [`fail_chat`](Self::fail_chat).
    pub fn heal_chat(&self, chat: ChatId) {
        self.failing.lock().remove(&chat);
    }

    /// Queues a message for the next [`ChatTransport::poll`].
    pub fn push_incoming(&self, message: IncomingMessage) {
        // The receiver lives as long as `self`.
        let _ = self.inbox_tx.send(message);
    }

    /// Everything sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().clone()
    }

    /// Messages sent to one chat, in order.
    #[must_use]
    pub fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Returns and forgets everything sent so far.
    pub fn take_sent(&self) -> Vec<(ChatId, String)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl ChatTransport for LoopbackTransport {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), TransportError> {
        if !chat.is_known() || self.failing.lock().contains(&chat) {
            return Err(TransportError::Unreachable(chat));
        }
        self.sent.lock().push((chat, text.to_string()));
        Ok(())
    }

    async fn fetch_document(&self, document: &DocumentRef) -> Result<Vec<u8>, TransportError> {
        self.documents
            .lock()
            .get(document)
            .cloned()
            .ok_or_else(|| TransportError::DocumentMissing(document.clone()))
    }

    async fn poll(&self) -> Result<Vec<IncomingMessage>, TransportError> {
        let mut rx = self.inbox_rx.lock().await;
        let first = rx.recv().await.ok_or(TransportError::Closed)?;
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }
        Ok(batch)
    }
}
