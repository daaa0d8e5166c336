//! Telegram Bot API transport.
//!
//! Inbound messages arrive through `getUpdates` long polling; the update
//! offset is tracked here so every update is handed out once. Documents are
//! resolved through `getFile` and downloaded from the file endpoint.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use taskping_proto::model::ChatId;
use tracing::{debug, warn};

use super::{ChatTransport, DocumentRef, Inbound, IncomingMessage, TransportError};

/// Slack added to the long-poll timeout for the HTTP client timeout.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, TransportError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TransportError::Api {
                code: self.error_code.unwrap_or_default(),
                description: self
                    .description
                    .unwrap_or_else(|| "missing result".to_string()),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    chat: Chat,
    from: Option<TgUser>,
    text: Option<String>,
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    file_id: String,
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

impl TgMessage {
    fn into_incoming(self) -> Option<IncomingMessage> {
        let kind = if let Some(document) = self.document {
            Inbound::Document {
                file_name: document.file_name,
                reference: DocumentRef::new(document.file_id),
            }
        } else {
            Inbound::from_text(&self.text?)
        };
        Some(IncomingMessage {
            handle: self.from.and_then(|u| u.username),
            chat_id: ChatId::new(self.chat.id),
            kind,
        })
    }
}

/// Transport speaking the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    token: String,
    poll_timeout_secs: u64,
    offset: AtomicI64,
}

impl TelegramTransport {
    /// Creates a transport for the bot identified by `token`.
    ///
    /// `api_base` is normally `https://api.telegram.org`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        poll_timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs) + HTTP_TIMEOUT_SLACK)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            poll_timeout_secs,
            offset: AtomicI64::new(0),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        let parsed: ApiResponse<T> = response.json().await?;
        parsed.into_result()
    }
}

impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<(), TransportError> {
        if !chat.is_known() {
            return Err(TransportError::Unreachable(chat));
        }
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &json!({ "chat_id": chat.get(), "text": text }),
            )
            .await?;
        debug!(%chat, "message sent");
        Ok(())
    }

    async fn fetch_document(&self, document: &DocumentRef) -> Result<Vec<u8>, TransportError> {
        let file: File = self
            .call("getFile", &json!({ "file_id": document.as_str() }))
            .await?;
        let path = file
            .file_path
            .ok_or_else(|| TransportError::DocumentMissing(document.clone()))?;
        let url = format!("{}/file/bot{}/{path}", self.api_base, self.token);
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn poll(&self) -> Result<Vec<IncomingMessage>, TransportError> {
        let offset = self.offset.load(Ordering::Acquire);
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &json!({
                    "offset": offset,
                    "timeout": self.poll_timeout_secs,
                    "allowed_updates": ["message"],
                }),
            )
            .await?;

        let mut messages = Vec::with_capacity(updates.len());
        for update in updates {
            self.offset
                .fetch_max(update.update_id + 1, Ordering::AcqRel);
            match update.message.and_then(TgMessage::into_incoming) {
                Some(message) => messages.push(message),
                None => warn!(update_id = update.update_id, "skipping unsupported update"),
            }
        }
        Ok(messages)
    }
}
