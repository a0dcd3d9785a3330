//! Append-only chat history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode history entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Sink for chat lines, both heard and said.
///
/// Writes are at-least-once; a crash between computing and persisting a line
/// loses that line.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    async fn append(&self, sender: &str, text: &str, timestamp: DateTime<Utc>) -> Result<(), HistoryError>;
}

/// One stored chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub message: String,
}

/// Stores one JSON object per line in a file.
#[derive(Debug)]
pub struct JsonlChatHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlChatHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every stored entry. Lines that fail to parse are skipped.
    pub async fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[async_trait]
impl ChatHistory for JsonlChatHistory {
    async fn append(&self, sender: &str, text: &str, timestamp: DateTime<Utc>) -> Result<(), HistoryError> {
        let entry = HistoryEntry {
            timestamp,
            sender: sender.to_string(),
            message: text.to_string(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_entries_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlChatHistory::new(dir.path().join("memory").join("chat.jsonl"));

        history.append("player", "hello bot", Utc::now()).await.unwrap();
        history.append("agent", "hi!", Utc::now()).await.unwrap();

        let entries = history.load().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sender, "player");
        assert_eq!(entries[0].message, "hello bot");
        assert_eq!(entries[1].sender, "agent");
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlChatHistory::new(dir.path().join("absent.jsonl"));
        assert!(history.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.jsonl");
        tokio::fs::write(&path, "not json\n").await.unwrap();

        let history = JsonlChatHistory::new(&path);
        history.append("player", "after garbage", Utc::now()).await.unwrap();

        let entries = history.load().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "after garbage");
    }
}
