use std::path::PathBuf;

use thiserror::Error;

/// Payload could not be turned into canonical bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("field '{field}' holds a non-finite float")]
    NonFiniteFloat { field: String },

    #[error("empty field name inside '{parent}'")]
    EmptyFieldName { parent: String },

    #[error("payload nesting exceeds depth {max_depth}")]
    TooDeep { max_depth: usize },
}

/// Durable write (or durable read) failed. Nothing was committed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("ledger I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger at {} is locked by another writer", path.display())]
    Locked { path: PathBuf },

    #[error("failed to serialize ledger entry {sequence}: {message}")]
    Serialize { sequence: u64, message: String },

    #[error("ledger backend unavailable: {0}")]
    Unavailable(String),

    #[error("out-of-order append: expected seq {expected}, got {got}; another writer advanced the ledger")]
    OutOfOrder { expected: u64, got: u64 },
}

/// Chain verification failed. The ledger must not be trusted or written to.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("ledger integrity violation at seq {sequence}: {reason}")]
pub struct IntegrityError {
    pub sequence: u64,
    pub reason: String,
}

impl IntegrityError {
    pub fn new(sequence: u64, reason: impl Into<String>) -> Self {
        Self {
            sequence,
            reason: reason.into(),
        }
    }
}

/// Structural or business-rule rejection of a request/grant/revoke.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RejectedError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("unknown consent type '{0}'")]
    UnknownConsentType(String),

    #[error("malformed scope '{scope}': {reason}")]
    MalformedScope { scope: String, reason: String },

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("grant scope '{proposed}' widens request scope '{requested}'")]
    ScopeWidening { requested: String, proposed: String },

    #[error("grant expiry {expires_at} exceeds the requested duration bound {bound}")]
    ExpiryBeyondDuration { expires_at: String, bound: String },

    #[error("grant expiry {expires_at} is not after grant time {granted_at}")]
    ExpiryInPast {
        expires_at: String,
        granted_at: String,
    },

    #[error("active grant already exists for request '{request_id}' ({grant_id})")]
    ActiveGrantExists { request_id: String, grant_id: String },

    #[error("grant '{0}' is not revocable")]
    NotRevocable(String),

    #[error("grant '{0}' is already revoked")]
    AlreadyRevoked(String),

    #[error("grant '{0}' has already expired")]
    AlreadyExpired(String),

    #[error("field '{field}' appears twice once sensitive names are redacted")]
    RedactedFieldCollision { field: String },
}

/// Why an authorization was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    NotFound,
    Expired,
    Revoked,
    ScopeMismatch,
}

impl DenialReason {
    /// Stable reason code surfaced verbatim to operators.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::ScopeMismatch => "scope_mismatch",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Authorization denial. Enforcement points must abort the guarded action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("consent denied ({reason}): {detail}")]
pub struct ConsentError {
    pub reason: DenialReason,
    pub detail: String,
}

impl ConsentError {
    pub fn new(reason: DenialReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(DenialReason::NotFound, detail)
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("rejected: {0}")]
    Rejected(#[from] RejectedError),

    #[error(transparent)]
    Consent(#[from] ConsentError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Integrity failures invalidate the whole ledger, everything else only
    /// the single operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::Consent(err) => Some(err.reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_codes_are_stable() {
        assert_eq!(DenialReason::NotFound.code(), "not_found");
        assert_eq!(DenialReason::Expired.code(), "expired");
        assert_eq!(DenialReason::Revoked.code(), "revoked");
        assert_eq!(DenialReason::ScopeMismatch.code(), "scope_mismatch");
    }

    #[test]
    fn consent_error_display_carries_code() {
        let err = ConsentError::new(DenialReason::Revoked, "grant_abc");
        assert_eq!(err.to_string(), "consent denied (revoked): grant_abc");
    }

    #[test]
    fn only_integrity_is_fatal() {
        let integrity: LedgerError = IntegrityError::new(3, "digest mismatch").into();
        assert!(integrity.is_fatal());

        let rejected: LedgerError = RejectedError::NotRevocable("g".into()).into();
        assert!(!rejected.is_fatal());
        assert_eq!(rejected.denial_reason(), None);

        let denied: LedgerError = ConsentError::not_found("nothing").into();
        assert_eq!(denied.denial_reason(), Some(DenialReason::NotFound));
    }
}
