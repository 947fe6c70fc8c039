//! Single-writer, hash-chained ledger store.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::backend::LedgerBackend;
use super::entry::{LedgerEntry, LedgerEvent};
use super::integrity::{ChainTail, ChainVerifier};
use super::query::AuditQuery;
use crate::clock::Clock;
use crate::error::{IntegrityError, LedgerError, Result};
use crate::signer::{ChainDigest, ChainSigner};

/// Append-only ledger over a durable backend.
///
/// `append` holds the writer lock from reading the tail until the entry is
/// durable, so entries are signed in their true global order. Readers see a
/// snapshot that only ever grows by fully committed entries.
#[derive(Debug)]
pub struct LedgerStore {
    backend: Arc<dyn LedgerBackend>,
    signer: ChainSigner,
    clock: Arc<dyn Clock>,
    writer: Mutex<ChainTail>,
    snapshot: RwLock<Vec<LedgerEntry>>,
    sealed: RwLock<Option<IntegrityError>>,
}

impl LedgerStore {
    /// Load and verify the backend's entries, then open for appends.
    pub async fn open(backend: Arc<dyn LedgerBackend>, clock: Arc<dyn Clock>) -> Result<Self> {
        let signer = ChainSigner::new();
        let entries = backend.load().await?;
        let report = ChainVerifier::new(signer).verify_chain(&entries).map_err(|err| {
            error!(
                backend = %backend.label(),
                sequence = err.sequence,
                reason = %err.reason,
                "ledger failed verification on open"
            );
            err
        })?;

        info!(
            backend = %backend.label(),
            entries = report.verified_entries,
            tail = %report.tail.digest().short(),
            "ledger opened"
        );

        Ok(Self {
            backend,
            signer,
            clock,
            writer: Mutex::new(report.tail),
            snapshot: RwLock::new(entries),
            sealed: RwLock::new(None),
        })
    }

    /// Append one event as the next entry.
    ///
    /// On a persistence failure nothing is committed: the tail and the reader
    /// snapshot stay where they were.
    pub async fn append(&self, event: LedgerEvent) -> Result<LedgerEntry> {
        self.ensure_unsealed()?;
        let mut tail = self.writer.lock().await;
        self.ensure_unsealed()?;

        let sequence = tail.next_sequence();
        let timestamp = self.clock.now();
        let bytes = LedgerEntry::envelope_bytes(sequence, &timestamp, &event)?;
        let entry = LedgerEntry {
            sequence_number: sequence,
            timestamp,
            prev_chain_digest: tail.digest(),
            chain_digest: self.signer.sign(&tail.digest(), &bytes),
            event,
        };

        if let Err(err) = self.backend.persist(&entry).await {
            error!(
                sequence,
                kind = %entry.kind(),
                error = %err,
                "ledger append not persisted"
            );
            return Err(err.into());
        }

        self.snapshot.write().push(entry.clone());
        tail.advance(&entry);
        debug!(
            sequence,
            kind = %entry.kind(),
            digest = %entry.chain_digest.short(),
            "ledger entry appended"
        );
        Ok(entry)
    }

    /// Re-read durable storage and recompute every digest from genesis.
    ///
    /// Any failure, including a durable chain that no longer matches what
    /// this store committed, seals the store: later appends fail with the
    /// same `IntegrityError`.
    pub async fn load_and_verify(&self) -> Result<Vec<LedgerEntry>> {
        let tail = self.writer.lock().await;

        let verified = match self.backend.load().await {
            Ok(entries) => ChainVerifier::new(self.signer)
                .verify_chain(&entries)
                .and_then(|report| {
                    if report.tail == *tail {
                        Ok(entries)
                    } else {
                        Err(IntegrityError::new(
                            report.tail.sequence().min(tail.sequence()) + 1,
                            format!(
                                "durable chain ends at seq {} ({}) but the store committed seq {} ({})",
                                report.tail.sequence(),
                                report.tail.digest().short(),
                                tail.sequence(),
                                tail.digest().short()
                            ),
                        ))
                    }
                }),
            Err(LedgerError::Integrity(err)) => Err(err),
            Err(other) => return Err(other),
        };

        match verified {
            Ok(entries) => {
                *self.snapshot.write() = entries.clone();
                Ok(entries)
            }
            Err(err) => {
                error!(
                    sequence = err.sequence,
                    reason = %err.reason,
                    "ledger integrity violation, sealing store"
                );
                *self.sealed.write() = Some(err.clone());
                Err(err.into())
            }
        }
    }

    /// Digest of the last committed entry, genesis when empty.
    pub fn tail_digest(&self) -> ChainDigest {
        self.snapshot
            .read()
            .last()
            .map(|entry| entry.chain_digest)
            .unwrap_or_else(ChainDigest::genesis)
    }

    /// Sequence number of the last committed entry, 0 when empty.
    pub fn tail_sequence(&self) -> u64 {
        self.snapshot
            .read()
            .last()
            .map(|entry| entry.sequence_number)
            .unwrap_or(0)
    }

    /// Snapshot of all committed entries.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.snapshot.read().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<LedgerEntry> {
        query.apply(&self.snapshot.read())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.read().is_some()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn backend_label(&self) -> String {
        self.backend.label()
    }

    fn ensure_unsealed(&self) -> Result<()> {
        match self.sealed.read().as_ref() {
            Some(err) => Err(LedgerError::Integrity(err.clone())),
            None => Ok(()),
        }
    }
}
