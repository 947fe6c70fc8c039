//! Hash-chained, append-only ledger.
//!
//! Every entry is signed over the canonical bytes of its envelope and the
//! previous entry's digest. The store is the single writer; backends only
//! make entries durable.

pub mod backend;
pub mod entry;
pub mod integrity;
pub mod query;
pub mod store;

pub use backend::{FileBackend, LedgerBackend, MemoryBackend};
pub use entry::{
    EventKind, GrantRevocation, LedgerEntry, LedgerEvent, RedactedRecord, RevocationCause,
};
pub use integrity::{ChainReport, ChainTail, ChainVerifier};
pub use query::{AuditQuery, AuditQueryBuilder};
pub use store::LedgerStore;
