use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::models::{Message, Role, Transcript};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Boundary to wherever chat transcripts live. Appends are best-effort from
/// the session's point of view: a failure is logged, never surfaced, and
/// never rolls back the in-memory conversation.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn load_history(&self, user_id: &str) -> Result<Vec<Message>, StoreError>;
    async fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError>;
}

/// File-backed transcript store: one pretty-printed JSON file per user under
/// the root directory.
pub struct FileTranscriptStore {
    root: PathBuf,
}

impl FileTranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted in the app's data directory.
    pub fn from_data_dir() -> Result<Self, StoreError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::Other("Could not find data directory".to_string()))?
            .join("Grantline")
            .join("transcripts");
        Ok(Self::new(data_dir))
    }

    fn transcript_path(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", user_id))
    }

    fn load_transcript(&self, user_id: &str) -> Result<Transcript, StoreError> {
        let path = self.transcript_path(user_id);
        if !path.exists() {
            return Ok(Transcript::new(user_id));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_transcript(&self, transcript: &Transcript) -> Result<(), StoreError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)?;
        }
        let path = self.transcript_path(&transcript.user_id);
        let content = serde_json::to_string_pretty(transcript)?;
        fs::write(&path, content)?;
        Ok(())
    }
}

#[async_trait]
impl TranscriptStore for FileTranscriptStore {
    async fn load_history(&self, user_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self.load_transcript(user_id)?.messages)
    }

    async fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut transcript = self.load_transcript(user_id)?;
        transcript.messages.push(Message {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        transcript.updated_at = Utc::now();
        self.save_transcript(&transcript)
    }
}
