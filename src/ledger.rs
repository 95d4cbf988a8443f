//! Durable dedup ledger of processed item identifiers.
//!
//! The ledger is a plain text file holding one item id per line. It is read
//! in full at open so [`Ledger::seen`] is an in-memory lookup; [`Ledger::mark`]
//! appends and syncs the line before the id becomes visible to `seen`.
//!
//! Membership alone decides skip-on-revisit. Entries are never removed.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::Ledger;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Ledger::open(Path::new("downloads/download_log.txt")).await?;
//! if !ledger.seen("12345") {
//!     // ... process the item ...
//!     ledger.mark("12345").await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use dashmap::DashSet;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Errors raised by ledger persistence.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file could not be read, created, or appended.
    #[error("ledger IO error at {path}: {source}")]
    Io {
        /// Ledger file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Item ids must be a single non-empty line.
    #[error("invalid ledger id {id:?}")]
    InvalidId {
        /// The rejected id.
        id: String,
    },
}

impl LedgerError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Append-only set of processed item ids.
///
/// `Ledger` is `Send + Sync`; share it across workers behind an `Arc`.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    ids: DashSet<String>,
    /// Serializes appends; held only around the write of a single line.
    writer: Mutex<File>,
}

impl Ledger {
    /// Opens the ledger at `path`, creating the file (and its parent directory)
    /// if missing, and loads every recorded id into memory.
    ///
    /// Blank lines and surrounding whitespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the file cannot be read or opened for append.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::io(parent, e))?;
        }

        let ids = DashSet::new();
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                for line in contents.lines() {
                    let id = line.trim();
                    if !id.is_empty() {
                        ids.insert(id.to_string());
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(LedgerError::io(path, e)),
        }

        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| LedgerError::io(path, e))?;

        // A previous run may have been killed mid-line; start on a fresh line.
        let len = writer
            .metadata()
            .await
            .map_err(|e| LedgerError::io(path, e))?
            .len();
        if len > 0 && !ends_with_newline(path).await? {
            writer
                .write_all(b"\n")
                .await
                .map_err(|e| LedgerError::io(path, e))?;
            writer.flush().await.map_err(|e| LedgerError::io(path, e))?;
        }

        info!(entries = ids.len(), "ledger loaded");

        Ok(Self {
            path: path.to_path_buf(),
            ids,
            writer: Mutex::new(writer),
        })
    }

    /// Returns true if `id` has a ledger entry.
    #[must_use]
    pub fn seen(&self, id: &str) -> bool {
        self.ids.contains(id.trim())
    }

    /// Records `id` durably.
    ///
    /// Returns `Ok(true)` if a new entry was written, `Ok(false)` if the id was
    /// already present. Safe to call concurrently; the id becomes visible to
    /// [`Ledger::seen`] only after the line has been synced to disk.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidId`] for empty or multi-line ids and
    /// [`LedgerError::Io`] if the append fails.
    #[instrument(skip(self))]
    pub async fn mark(&self, id: &str) -> Result<bool, LedgerError> {
        let id = id.trim();
        if id.is_empty() || id.contains(['\n', '\r']) {
            return Err(LedgerError::InvalidId { id: id.to_string() });
        }

        if self.ids.contains(id) {
            return Ok(false);
        }

        let mut writer = self.writer.lock().await;
        // Re-check under the lock: another worker may have appended meanwhile.
        if self.ids.contains(id) {
            return Ok(false);
        }

        let line = format!("{id}\n");
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LedgerError::io(&self.path, e))?;
        writer
            .flush()
            .await
            .map_err(|e| LedgerError::io(&self.path, e))?;
        if let Err(e) = writer.sync_data().await {
            warn!(error = %e, "ledger sync failed");
            return Err(LedgerError::io(&self.path, e));
        }

        self.ids.insert(id.to_string());
        debug!(id, "ledger entry written");
        Ok(true)
    }

    /// Number of recorded ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no id has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn ends_with_newline(path: &Path) -> Result<bool, LedgerError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| LedgerError::io(path, e))?;
    Ok(bytes.last().is_none_or(|b| *b == b'\n'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("download_log.txt");

        let ledger = Ledger::open(&path).await.unwrap();
        assert!(ledger.is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_open_loads_existing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_log.txt");
        std::fs::write(&path, "1\n2\n\n  3  \n").unwrap();

        let ledger = Ledger::open(&path).await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger.seen("1"));
        assert!(ledger.seen("3"));
        assert!(!ledger.seen("4"));
    }

    #[tokio::test]
    async fn test_mark_is_idempotent_and_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_log.txt");

        let ledger = Ledger::open(&path).await.unwrap();
        assert!(ledger.mark("42").await.unwrap());
        assert!(!ledger.mark("42").await.unwrap());
        assert!(ledger.seen("42"));
        drop(ledger);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "42\n");

        let reopened = Ledger::open(&path).await.unwrap();
        assert!(reopened.seen("42"));
    }

    #[tokio::test]
    async fn test_open_repairs_truncated_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_log.txt");
        std::fs::write(&path, "1\n2").unwrap();

        let ledger = Ledger::open(&path).await.unwrap();
        ledger.mark("3").await.unwrap();
        drop(ledger);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "1\n2\n3\n");
    }

    #[tokio::test]
    async fn test_mark_rejects_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("log.txt")).await.unwrap();

        assert!(matches!(
            ledger.mark("").await,
            Err(LedgerError::InvalidId { .. })
        ));
        assert!(matches!(
            ledger.mark("a\nb").await,
            Err(LedgerError::InvalidId { .. })
        ));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_marks_write_each_id_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download_log.txt");
        let ledger = Arc::new(Ledger::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for worker in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    // Every worker marks the same ids plus its own.
                    ledger.mark(&format!("shared-{i}")).await.unwrap();
                    ledger.mark(&format!("w{worker}-{i}")).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.len(), 25 + 8 * 25);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 25 + 8 * 25);
    }
}
