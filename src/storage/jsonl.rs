//! JSONL storage for per-session conversation history

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::message::Message;

/// Append-only JSONL backend for chat history.
///
/// One file per session; lines are written in creation order, so reading the
/// file back yields messages oldest first. Callers serialize writes per
/// session to preserve that ordering.
pub struct HistoryStorage {
    base_path: PathBuf,
}

impl HistoryStorage {
    /// Create a new history storage
    pub fn new(config: &Config) -> Result<Self> {
        let base_path = config.conversations_path();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the path to the log file for a session
    fn log_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", session_id))
    }

    /// Append a message to the session log
    pub fn append(&self, message: &Message) -> Result<()> {
        let path = self.log_path(&message.session_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        let json = serde_json::to_string(message)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all messages for a session, oldest first
    pub fn read_all(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.log_path(session_id);

        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        let mut messages = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(&line)?;
            messages.push(message);
        }

        Ok(messages)
    }

    /// Read the last N messages for a session, preserving creation order
    pub fn read_last_n(&self, session_id: &str, n: usize) -> Result<Vec<Message>> {
        let all = self.read_all(session_id)?;
        let start = all.len().saturating_sub(n);
        Ok(all[start..].to_vec())
    }

    /// Count messages in a session
    pub fn count(&self, session_id: &str) -> Result<usize> {
        let path = self.log_path(session_id);

        if !path.exists() {
            return Ok(0);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        Ok(reader
            .lines()
            .filter(|l| l.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(false))
            .count())
    }

    /// List all sessions with stored history
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    sessions.push(stem.to_string_lossy().to_string());
                }
            }
        }

        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use tempfile::TempDir;

    fn storage() -> (TempDir, HistoryStorage) {
        let dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(dir.path());
        let storage = HistoryStorage::new(&config).unwrap();
        (dir, storage)
    }

    #[test]
    fn append_and_read_preserves_order() {
        let (_dir, storage) = storage();

        for i in 0..5 {
            let message = Message::new("session-1", Role::User, format!("message {}", i));
            storage.append(&message).unwrap();
        }

        let messages = storage.read_all("session-1").unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content, "message 0");
        assert_eq!(messages[4].content, "message 4");
    }

    #[test]
    fn read_last_n_keeps_original_order() {
        let (_dir, storage) = storage();

        for i in 0..15 {
            let message = Message::new("session-1", Role::User, format!("message {}", i));
            storage.append(&message).unwrap();
        }

        let window = storage.read_last_n("session-1", 10).unwrap();
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].content, "message 5");
        assert_eq!(window[9].content, "message 14");
    }

    #[test]
    fn missing_session_is_empty() {
        let (_dir, storage) = storage();
        assert!(storage.read_all("nope").unwrap().is_empty());
        assert_eq!(storage.count("nope").unwrap(), 0);
    }

    #[test]
    fn list_sessions_covers_every_stored_log() {
        let (_dir, storage) = storage();

        for session in ["session-a", "session-b"] {
            for i in 0..2 {
                let message = Message::new(session, Role::User, format!("message {}", i));
                storage.append(&message).unwrap();
            }
        }

        let mut sessions = storage.list_sessions().unwrap();
        sessions.sort();
        assert_eq!(sessions, vec!["session-a", "session-b"]);
        assert_eq!(storage.count("session-a").unwrap(), 2);
    }

    #[test]
    fn metadata_round_trips() {
        let (_dir, storage) = storage();

        let message = Message::new("session-1", Role::Assistant, "jawaban")
            .with_metadata(serde_json::json!({ "confidence_score": 0.8 }));
        storage.append(&message).unwrap();

        let messages = storage.read_all("session-1").unwrap();
        assert_eq!(
            messages[0].metadata.as_ref().unwrap()["confidence_score"],
            0.8
        );
    }
}
