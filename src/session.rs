//! Durable save/load/list/delete of conversations, one JSON file per session.

use crate::error::ChatError;
use crate::history::{current_timestamp, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Session id used for automatic save/resume.
pub const AUTOSAVE_ID: &str = "autosave";

/// Lightweight reference to an attached file's content at attach time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FileRef {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SessionMetadata {
    pub message_count: usize,
    pub file_count: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub active_model: Option<String>,
    pub history: Vec<Message>,
    #[serde(default)]
    pub added_files: HashMap<String, FileRef>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

impl SessionRecord {
    pub fn new(id: String, active_model: Option<String>, history: Vec<Message>) -> Self {
        let now = current_timestamp();
        let mut record = Self {
            id,
            created_at: now,
            updated_at: now,
            active_model,
            history,
            added_files: HashMap::new(),
            metadata: SessionMetadata::default(),
        };
        record.refresh_metadata();
        record
    }

    fn refresh_metadata(&mut self) {
        self.metadata.message_count = self.history.len();
        self.metadata.file_count = self.added_files.len();
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub updated_at: u64,
    pub message_count: usize,
}

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Result<Self, ChatError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn open_default() -> Result<Self, ChatError> {
        Self::new(crate::config::default_data_dir()?.join("sessions"))
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Writes the record, refreshing `updated_at` and the counts. Single
    /// writer assumed; no cross-process locking.
    pub fn save(&self, record: &mut SessionRecord) -> Result<(), ChatError> {
        record.updated_at = current_timestamp();
        record.refresh_metadata();
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.path_for(&record.id), content)?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<SessionRecord>, ChatError> {
        let path = self.path_for(id);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerates saved sessions, most recently updated first. Unreadable
    /// files are skipped with a warning rather than failing the listing.
    pub fn list(&self) -> Result<Vec<SessionSummary>, ChatError> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(ChatError::from)
                .and_then(|c| serde_json::from_str::<SessionRecord>(&c).map_err(ChatError::from))
            {
                Ok(record) => summaries.push(SessionSummary {
                    id: record.id,
                    updated_at: record.updated_at,
                    message_count: record.metadata.message_count,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session file"),
            }
        }
        summaries.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        Ok(summaries)
    }

    /// Removes a session. Idempotent: returns whether a file was deleted.
    pub fn delete(&self, id: &str) -> Result<bool, ChatError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Derives a filesystem-safe session id from a user-chosen name, or generates
/// one when no usable characters remain.
pub fn slug_id(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        generated_id()
    } else {
        slug
    }
}

pub fn generated_id() -> String {
    format!("session-{}", Uuid::new_v4())
}
