//! Persisted session transcripts: one JSON-lines file per session key.
//!
//! The store itself is lock-agnostic; callers guard writes with the
//! session write lock. Corrupt lines are skipped on read — malformed
//! persisted state is treated as absence, never as a fatal error.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use relay_core::messages::Message;
use relay_core::session::SessionKey;

use crate::error::StoreError;

pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Transcript file path for a session key. The slug is guaranteed free
    /// of path separators, so keys can never escape the base directory.
    pub fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", key.storage_slug()))
    }

    pub fn exists(&self, key: &SessionKey) -> bool {
        self.path_for(key).exists()
    }

    /// Read the full transcript. A missing file is an empty transcript;
    /// unparseable lines are skipped with a warning.
    pub fn read(&self, key: &SessionKey) -> Result<Vec<Message>, StoreError> {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(msg) => messages.push(msg),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(
                session_key = %key,
                path = %path.display(),
                skipped,
                "skipped unparseable transcript lines"
            );
        }
        Ok(messages)
    }

    /// Append turns to the transcript in order.
    pub fn append(&self, key: &SessionKey, messages: &[Message]) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }
        let path = self.path_for(key);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        for msg in messages {
            let line = serde_json::to_string(msg)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Replace the transcript wholesale. Atomic: written to a temp file in
    /// the same directory, then renamed over the target.
    pub fn write_all(&self, key: &SessionKey, messages: &[Message]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let mut body = String::new();
        for msg in messages {
            body.push_str(&serde_json::to_string(msg)?);
            body.push('\n');
        }
        atomic_write(&path, body.as_bytes())
    }

    pub fn remove(&self, key: &SessionKey) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io(format!("no parent directory for {}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path)
        .map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(())
}
