//! Chain tail tracking and full-chain verification.

use super::entry::LedgerEntry;
use crate::error::IntegrityError;
use crate::signer::{ChainDigest, ChainSigner};

/// Position of the last committed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTail {
    sequence: u64,
    digest: ChainDigest,
}

impl ChainTail {
    /// Empty chain: sequence 0, genesis digest.
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            digest: ChainDigest::genesis(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn digest(&self) -> ChainDigest {
        self.digest
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence + 1
    }

    /// Move the tail onto a committed entry.
    pub fn advance(&mut self, entry: &LedgerEntry) {
        self.sequence = entry.sequence_number;
        self.digest = entry.chain_digest;
    }
}

impl Default for ChainTail {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Outcome of a successful verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub verified_entries: usize,
    pub tail: ChainTail,
}

/// Recomputes every digest from genesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainVerifier {
    signer: ChainSigner,
}

impl ChainVerifier {
    pub fn new(signer: ChainSigner) -> Self {
        Self { signer }
    }

    /// Check one entry against the tail it must extend.
    pub fn verify_entry(&self, tail: &ChainTail, entry: &LedgerEntry) -> Result<(), IntegrityError> {
        let expected = tail.next_sequence();
        if entry.sequence_number != expected {
            return Err(IntegrityError::new(
                expected,
                format!("expected sequence {expected}, found {}", entry.sequence_number),
            ));
        }
        if entry.prev_chain_digest != tail.digest() {
            return Err(IntegrityError::new(
                expected,
                format!(
                    "broken link: prev digest {} does not match {}",
                    entry.prev_chain_digest.short(),
                    tail.digest().short()
                ),
            ));
        }
        let bytes = entry
            .canonical_bytes()
            .map_err(|e| IntegrityError::new(expected, format!("payload not encodable: {e}")))?;
        if !self.signer.verify(&tail.digest(), &bytes, &entry.chain_digest) {
            return Err(IntegrityError::new(expected, "chain digest mismatch"));
        }
        Ok(())
    }

    /// Verify a whole chain. Stops at the first offending entry.
    pub fn verify_chain(&self, entries: &[LedgerEntry]) -> Result<ChainReport, IntegrityError> {
        let mut tail = ChainTail::genesis();
        for entry in entries {
            self.verify_entry(&tail, entry)?;
            tail.advance(entry);
        }
        Ok(ChainReport {
            verified_entries: entries.len(),
            tail,
        })
    }
}
