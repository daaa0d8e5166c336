//! Event-authoring dialog.
//!
//! An organizer creates an event in four messages: `/newevent`, the task
//! sheet upload, the keyname, and the default lead time. The last step
//! commits the sheet into the store, replacing any previous tasks of a
//! group with the same keyname. `/delete_task` is a separate one-step
//! dialog that removes a group by keyname.
//!
//! Every transition runs under the user's session lock (see
//! [`session::SessionStore`]). Recoverable input errors leave the step
//! unchanged and tell the user what to fix; a commit or deletion always
//! returns the session to idle, whatever the outcome.

pub mod session;

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use taskping_proto::ValidationError;
use taskping_proto::ingest::{TaskRecord, is_addressable_handle, parse_rows};
use taskping_proto::model::{ChatId, CommitMode, MAX_EVENT_NAME_LEN, NewTask};
use taskping_proto::sheet::{DelimitedSheet, SheetDecoder, SheetError, WorkbookSheet};
use taskping_proto::validate::{parse_lead_time, validate_event_name};
use tracing::{error, info, warn};

use crate::store::{StorageGateway, StoreError};
use crate::transport::{ChatTransport, DocumentRef, TransportError};

pub use session::{Session, SessionStore, Step};

/// Reply to a deletion request for an unknown keyname.
pub const NOT_FOUND_REPLY: &str = "Event not found. Please check the name and try again.";

/// Reply when an uploaded file arrives outside of the upload step.
pub const UNEXPECTED_FILE_REPLY: &str = "I was not expecting a file. Use /newevent to create an event.";

/// Why a dialog step did not advance or complete.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    /// The input failed validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The uploaded sheet could not be decoded.
    #[error("{0}")]
    Sheet(#[from] SheetError),

    /// The uploaded file has a name that is not accepted.
    #[error("unsupported file {name:?}")]
    UnsupportedFile {
        /// Name of the rejected file.
        name: String,
    },

    /// The sheet has a header but no task rows.
    #[error("the sheet contains no tasks")]
    EmptySheet,

    /// The document could not be downloaded.
    #[error("download failed: {0}")]
    Transport(#[from] TransportError),

    /// The store rejected the commit.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Extensions decoded as spreadsheet files; anything else is read as
/// delimited text.
const WORKBOOK_EXTENSIONS: [&str; 4] = [".xlsx", ".xlsm", ".xls", ".ods"];

/// The authoring dialog for all users.
pub struct Conversation {
    sessions: SessionStore,
    /// Accepted extension (lowercase) and the decoder for it.
    decoders: Vec<(String, Box<dyn SheetDecoder>)>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("sessions", &self.sessions.len())
            .field("accepted_extensions", &self.extensions())
            .finish_non_exhaustive()
    }
}

impl Conversation {
    /// Creates a dialog accepting uploads whose names end in one of
    /// `accepted_extensions`, e.g. `".xlsx"`, compared case-insensitively.
    ///
    /// Spreadsheet extensions are decoded with [`WorkbookSheet`], all
    /// others with [`DelimitedSheet`].
    #[must_use]
    pub fn new(session_idle: Duration, accepted_extensions: Vec<String>) -> Self {
        let decoders = accepted_extensions
            .into_iter()
            .map(|ext| {
                let ext = ext.to_lowercase();
                let decoder: Box<dyn SheetDecoder> = if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
                    Box::new(WorkbookSheet::new())
                } else {
                    Box::new(DelimitedSheet::new())
                };
                (ext, decoder)
            })
            .collect();
        Self {
            sessions: SessionStore::new(session_idle),
            decoders,
        }
    }

    fn extensions(&self) -> Vec<&str> {
        self.decoders.iter().map(|(ext, _)| ext.as_str()).collect()
    }

    /// The session store, for inspection and periodic sweeping.
    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Starts a new authoring flow, discarding any partial state.
    pub async fn begin_event(&self, handle: &str) -> String {
        let mut session = self.sessions.lock(handle).await;
        session.reset();
        session.step = Step::AwaitingFile;
        format!(
            "Send the task sheet ({}) with columns: name, description, deadline \
             (YYYY-MM-DD HH:MM:SS), participants.",
            self.extensions().join(", ")
        )
    }

    /// Starts the deletion flow, discarding any partial state.
    pub async fn begin_deletion(&self, handle: &str) -> String {
        let mut session = self.sessions.lock(handle).await;
        session.reset();
        session.step = Step::AwaitingDeletion;
        "Enter the name of the event you want to delete.".to_string()
    }

    /// Handles an uploaded document.
    ///
    /// Only meaningful in [`Step::AwaitingFile`]; on any failure the step
    /// stays there so the user can resend.
    pub async fn on_document<T: ChatTransport>(
        &self,
        handle: &str,
        file_name: Option<&str>,
        reference: &DocumentRef,
        transport: &T,
    ) -> String {
        let mut session = self.sessions.lock(handle).await;
        if session.step != Step::AwaitingFile {
            return UNEXPECTED_FILE_REPLY.to_string();
        }
        match self.ingest(file_name, reference, transport).await {
            Ok(records) => {
                let count = records.len();
                session.parsed_tasks = records;
                session.step = Step::AwaitingEventName;
                info!(handle, tasks = count, "task sheet accepted");
                format!(
                    "Sheet accepted with {count} task(s). Now enter a unique event name \
                     (up to {MAX_EVENT_NAME_LEN} characters)."
                )
            }
            Err(e) => {
                warn!(handle, error = %e, "task sheet rejected");
                self.ingest_error_reply(&e)
            }
        }
    }

    /// Handles a text message that is not a command.
    ///
    /// Returns `None` when the user has no dialog in progress.
    pub async fn on_text<S: StorageGateway>(
        &self,
        handle: &str,
        text: &str,
        store: &S,
    ) -> Option<String> {
        let mut session = self.sessions.lock(handle).await;
        let reply = match session.step {
            Step::AwaitingCommands => return None,
            Step::AwaitingFile => "Please upload the task sheet as a file.".to_string(),
            Step::AwaitingEventName => {
                // Checked as typed; surrounding spaces count towards the limit.
                match validate_event_name(text) {
                    Ok(()) => {
                        session.event_name = Some(text.to_string());
                        session.step = Step::AwaitingRemindTime;
                        "Enter how many minutes before each deadline the participants \
                         should be reminded."
                            .to_string()
                    }
                    Err(e) => format!("{}. Please enter another name.", capitalise(&e.to_string())),
                }
            }
            Step::AwaitingRemindTime => match parse_lead_time(text) {
                Ok(minutes) => {
                    let keyname = session.event_name.take().unwrap_or_default();
                    let records = std::mem::take(&mut session.parsed_tasks);
                    session.reset();
                    match commit(store, &keyname, minutes, &records).await {
                        Ok(count) => {
                            info!(handle, keyname = %keyname, tasks = count, lead_minutes = minutes, "event committed");
                            format!("Event '{keyname}' created/updated with {count} task(s).")
                        }
                        Err(e) => {
                            error!(handle, keyname = %keyname, error = %e, "event commit failed");
                            "Could not save the event. Please start again with /newevent."
                                .to_string()
                        }
                    }
                }
                Err(_) => "Invalid number. Please enter a positive whole number of minutes."
                    .to_string(),
            },
            Step::AwaitingDeletion => {
                session.reset();
                delete_event(store, handle, text.trim()).await
            }
        };
        Some(reply)
    }

    async fn ingest<T: ChatTransport>(
        &self,
        file_name: Option<&str>,
        reference: &DocumentRef,
        transport: &T,
    ) -> Result<Vec<TaskRecord>, ConversationError> {
        let name = file_name.unwrap_or_default();
        let lowered = name.to_lowercase();
        let Some((_, decoder)) = self
            .decoders
            .iter()
            .find(|(ext, _)| lowered.ends_with(ext.as_str()))
        else {
            return Err(ConversationError::UnsupportedFile {
                name: name.to_string(),
            });
        };
        let bytes = transport.fetch_document(reference).await?;
        let rows = decoder.decode(&bytes)?;
        let records = parse_rows(&rows)?;
        if records.is_empty() {
            return Err(ConversationError::EmptySheet);
        }
        Ok(records)
    }

    fn ingest_error_reply(&self, err: &ConversationError) -> String {
        match err {
            ConversationError::UnsupportedFile { .. } => format!(
                "Please send the sheet as a {} file.",
                self.extensions().join(" or ")
            ),
            ConversationError::Transport(_) | ConversationError::Store(_) => {
                "Could not read the file. Please send it again.".to_string()
            }
            other => format!(
                "The sheet has errors: {other}. Deadlines must look like \
                 YYYY-MM-DD HH:MM:SS. Please fix it and send it again."
            ),
        }
    }
}

/// Writes a parsed sheet into the group `keyname`, replacing its tasks.
///
/// Participants with handles too short to be addressable are dropped.
/// Returns the number of tasks committed.
///
/// # Errors
///
/// Propagates any [`StoreError`]; nothing is replaced if the failure
/// happens before the final step.
pub async fn commit<S: StorageGateway>(
    store: &S,
    keyname: &str,
    lead_minutes: u32,
    records: &[TaskRecord],
) -> Result<usize, StoreError> {
    let group_id = store.upsert_task_group(keyname, Some(lead_minutes)).await?;

    let handles: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.participants.iter().map(String::as_str))
        .filter(|h| is_addressable_handle(h))
        .collect();
    let mut ids = HashMap::with_capacity(handles.len());
    for handle in handles {
        let id = store.ensure_user(handle, ChatId::UNKNOWN, None).await?;
        ids.insert(handle, id);
    }

    let tasks: Vec<NewTask> = records
        .iter()
        .map(|r| NewTask {
            name: r.name.clone(),
            description: r.description.clone(),
            deadline: r.deadline,
            participants: r
                .participants
                .iter()
                .filter_map(|h| ids.get(h.as_str()).copied())
                .collect(),
        })
        .collect();
    store
        .replace_tasks(group_id, &tasks, CommitMode::Replace)
        .await?;
    Ok(tasks.len())
}

async fn delete_event<S: StorageGateway>(store: &S, handle: &str, keyname: &str) -> String {
    let deleted = match store.find_task_group(keyname).await {
        Ok(Some(group)) => store.delete_task_group(group.id).await,
        Ok(None) => Ok(false),
        Err(e) => Err(e),
    };
    match deleted {
        Ok(true) => {
            info!(handle, keyname, "event deleted");
            format!("Event '{keyname}' deleted.")
        }
        Ok(false) => NOT_FOUND_REPLY.to_string(),
        Err(e) => {
            error!(handle, keyname, error = %e, "event deletion failed");
            NOT_FOUND_REPLY.to_string()
        }
    }
}

fn capitalise(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
