//! Consent-gated, tamper-evident ledger.
//!
//! Agents request consent from each other, grants are issued, revoked or
//! lazily expired, and every decision lands in a hash-chained append-only
//! ledger that is verified from genesis on every open. Memory and audit
//! payloads go through the same chain after PII redaction.
//!
//! ```no_run
//! use std::sync::Arc;
//! use consent_ledger::{ConsentRegistry, ConsentType, LedgerConfig, SystemClock};
//!
//! # async fn run() -> consent_ledger::Result<()> {
//! let registry = ConsentRegistry::open(&LedgerConfig::in_memory(), Arc::new(SystemClock)).await?;
//! let req = registry
//!     .request_consent("SupplyChainBOT", "SOpLead", ConsentType::DataAccess, "inventory:*", "reconcile", None)
//!     .await?;
//! registry.grant_consent(&req.id, None, None, true, vec![]).await?;
//! registry
//!     .validate("SupplyChainBOT", &ConsentType::DataAccess, "inventory:SKU123")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod projection;
pub mod redaction;
pub mod registry;
pub mod signer;
pub mod telemetry;

pub use canonical::{encode, CanonicalFields, FieldValue, Fields, FieldsBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConsentConfig, LedgerConfig, LoggingConfig, RedactionConfig, StorageConfig};
pub use error::{
    ConsentError, DenialReason, EncodingError, IntegrityError, LedgerError, PersistenceError,
    RejectedError, Result,
};
pub use ledger::{
    AuditQuery, EventKind, FileBackend, LedgerBackend, LedgerEntry, LedgerEvent, LedgerStore,
    MemoryBackend,
};
pub use model::{
    format_duration, parse_duration, ConsentGrant, ConsentRequest, ConsentType, GrantId,
    GrantStatus, RequestId, Scope,
};
pub use redaction::{RedactionToken, Redactor, SensitiveKind};
pub use registry::ConsentRegistry;
pub use signer::{ChainDigest, ChainSigner};
