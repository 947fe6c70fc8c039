//! Durable storage for ledger entries.

use std::fmt;
use std::fs::OpenOptions as StdOpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::entry::LedgerEntry;
use crate::error::{IntegrityError, LedgerError, PersistenceError};

/// Where entries are durably written. One instance per ledger.
#[async_trait]
pub trait LedgerBackend: Send + Sync + fmt::Debug {
    /// Durably persist one entry. Returns only once the entry is durable.
    async fn persist(&self, entry: &LedgerEntry) -> Result<(), PersistenceError>;

    /// Read every stored entry in write order. Malformed records surface as
    /// an `IntegrityError` at the position they occupy.
    async fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Short description for logs.
    fn label(&self) -> String;
}

/// Volatile backend for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with pre-existing entries, e.g. to replay a captured ledger.
    pub fn with_entries(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    async fn persist(&self, entry: &LedgerEntry) -> Result<(), PersistenceError> {
        let mut entries = self.entries.write();
        let expected = entries.last().map_or(1, |last| last.sequence_number + 1);
        if entry.sequence_number != expected {
            return Err(PersistenceError::OutOfOrder {
                expected,
                got: entry.sequence_number,
            });
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries.read().clone())
    }

    fn label(&self) -> String {
        "memory".to_string()
    }
}

/// Append-only JSON-lines file.
///
/// Holds an exclusive advisory lock on `<path>.lock` for its lifetime so a
/// second process cannot open the same ledger for writing.
pub struct FileBackend {
    path: PathBuf,
    writer: Mutex<Writer>,
    _lock: std::fs::File,
    failed: AtomicBool,
}

/// Append handle plus the last sequence known to be on disk. The sequence
/// is unknown until the first `load` or `persist`.
struct Writer {
    file: File,
    last_sequence: Option<u64>,
}

impl fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl FileBackend {
    /// Open (or create) the ledger file and take the writer lock.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let io_err = |source| PersistenceError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let lock_path = lock_path(&path);
        let lock = StdOpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| PersistenceError::Io {
                path: lock_path.clone(),
                source,
            })?;
        lock.try_lock_exclusive()
            .map_err(|_| PersistenceError::Locked { path: path.clone() })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;

        debug!(path = %path.display(), "opened ledger file");
        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                last_sequence: None,
            }),
            _lock: lock,
            failed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

#[async_trait]
impl LedgerBackend for FileBackend {
    async fn persist(&self, entry: &LedgerEntry) -> Result<(), PersistenceError> {
        // After a failed write the file may end in a torn line; appending
        // behind it would bury the damage mid-chain.
        if self.failed.load(Ordering::Acquire) {
            return Err(PersistenceError::Unavailable(format!(
                "{} had a failed write; reopen to verify",
                self.path.display()
            )));
        }

        let mut line =
            serde_json::to_string(entry).map_err(|e| PersistenceError::Serialize {
                sequence: entry.sequence_number,
                message: e.to_string(),
            })?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        if let Some(last) = writer.last_sequence {
            if entry.sequence_number != last + 1 {
                return Err(PersistenceError::OutOfOrder {
                    expected: last + 1,
                    got: entry.sequence_number,
                });
            }
        }

        let file = &mut writer.file;
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;

        if let Err(source) = written {
            self.failed.store(true, Ordering::Release);
            error!(
                path = %self.path.display(),
                sequence = entry.sequence_number,
                error = %source,
                "ledger write failed"
            );
            return Err(self.io_error(source));
        }
        writer.last_sequence = Some(entry.sequence_number);
        Ok(())
    }

    async fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(self.io_error(e).into()),
        };

        let mut entries: Vec<LedgerEntry> = Vec::new();
        for line in raw.split(|b| *b == b'\n') {
            if line.trim_ascii().is_empty() {
                continue;
            }
            let position = entries.len() as u64 + 1;
            let line = std::str::from_utf8(line).map_err(|e| {
                IntegrityError::new(position, format!("ledger record is not UTF-8: {e}"))
            })?;
            let entry: LedgerEntry = serde_json::from_str(line).map_err(|e| {
                IntegrityError::new(position, format!("malformed ledger record: {e}"))
            })?;
            entries.push(entry);
        }

        self.writer.lock().await.last_sequence =
            Some(entries.last().map_or(0, |last| last.sequence_number));
        Ok(entries)
    }

    fn label(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::FieldsBuilder;
    use crate::ledger::entry::{LedgerEvent, RedactedRecord};
    use crate::signer::ChainDigest;
    use chrono::Utc;

    fn entry(sequence: u64) -> LedgerEntry {
        LedgerEntry {
            sequence_number: sequence,
            timestamp: Utc::now(),
            prev_chain_digest: ChainDigest::genesis(),
            chain_digest: ChainDigest::genesis(),
            event: LedgerEvent::RedactedRecord(RedactedRecord {
                agent: None,
                fields: FieldsBuilder::new().field("n", sequence as i64).build(),
                tokens: vec![],
            }),
        }
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        backend.persist(&entry(1)).await.unwrap();
        backend.persist(&entry(2)).await.unwrap();

        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].sequence_number, 2);
    }

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/consent.jsonl");

        {
            let backend = FileBackend::open(&path).await.unwrap();
            backend.persist(&entry(1)).await.unwrap();
            backend.persist(&entry(2)).await.unwrap();
        }

        let backend = FileBackend::open(&path).await.unwrap();
        let loaded = backend.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], entry_with_time(1, loaded[0].timestamp));
    }

    fn entry_with_time(sequence: u64, at: chrono::DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            timestamp: at,
            ..entry(sequence)
        }
    }

    #[tokio::test]
    async fn test_file_backend_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consent.jsonl");

        let _held = FileBackend::open(&path).await.unwrap();
        let err = FileBackend::open(&path).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Locked { .. }));
    }

    #[tokio::test]
    async fn test_malformed_line_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consent.jsonl");

        let backend = FileBackend::open(&path).await.unwrap();
        backend.persist(&entry(1)).await.unwrap();
        drop(backend);

        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{\"sequence_number\": 2, \"trunc");
        std::fs::write(&path, raw).unwrap();

        let backend = FileBackend::open(&path).await.unwrap();
        match backend.load().await.unwrap_err() {
            LedgerError::Integrity(err) => assert_eq!(err.sequence, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_memory_backend_rejects_out_of_order() {
        let backend = MemoryBackend::new();
        backend.persist(&entry(1)).await.unwrap();

        let err = backend.persist(&entry(1)).await.unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::OutOfOrder {
                expected: 2,
                got: 1
            }
        ));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_file_backend_rejects_stale_sequence_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consent.jsonl");

        let backend = FileBackend::open(&path).await.unwrap();
        backend.persist(&entry(1)).await.unwrap();
        backend.persist(&entry(2)).await.unwrap();
        assert_eq!(backend.load().await.unwrap().len(), 2);

        let err = backend.persist(&entry(2)).await.unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::OutOfOrder {
                expected: 3,
                got: 2
            }
        ));
        backend.persist(&entry(3)).await.unwrap();
        assert_eq!(backend.load().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consent.jsonl");

        let backend = FileBackend::open(&path).await.unwrap();
        backend.persist(&entry(1)).await.unwrap();
        drop(backend);

        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(b"{\"sequence_number\": 2, \"x\": \"\xff\xfe\"}\n");
        std::fs::write(&path, raw).unwrap();

        let backend = FileBackend::open(&path).await.unwrap();
        match backend.load().await.unwrap_err() {
            LedgerError::Integrity(err) => {
                assert_eq!(err.sequence, 2);
                assert!(err.reason.contains("UTF-8"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
