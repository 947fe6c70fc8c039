use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{self, CanonicalFields, FieldValue, Fields, FieldsBuilder};
use crate::error::EncodingError;
use crate::model::{ConsentGrant, ConsentRequest, ConsentType, GrantId, RequestId};
use crate::redaction::RedactionToken;
use crate::signer::ChainDigest;

/// Why a grant stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationCause {
    /// `revoke_consent` was called.
    Explicit,
    /// Validation observed the grant past its expiry.
    Expired,
}

impl RevocationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Expired => "expired",
        }
    }
}

/// Terminal transition of a grant, explicit or by expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRevocation {
    pub grant_id: GrantId,
    pub request_id: RequestId,
    pub from_agent: String,
    pub to_agent: String,
    pub consent_type: ConsentType,
    pub cause: RevocationCause,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub revoked_at: DateTime<Utc>,
}

impl GrantRevocation {
    pub fn for_grant(
        grant: &ConsentGrant,
        cause: RevocationCause,
        reason: Option<String>,
        revoked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            grant_id: grant.id.clone(),
            request_id: grant.request_id.clone(),
            from_agent: grant.from_agent.clone(),
            to_agent: grant.to_agent.clone(),
            consent_type: grant.consent_type.clone(),
            cause,
            reason,
            revoked_at,
        }
    }
}

impl CanonicalFields for GrantRevocation {
    fn canonical_fields(&self) -> Fields {
        FieldsBuilder::new()
            .field("grant_id", self.grant_id.as_str())
            .field("request_id", self.request_id.as_str())
            .field("from_agent", self.from_agent.as_str())
            .field("to_agent", self.to_agent.as_str())
            .field("consent_type", self.consent_type.as_str())
            .field("cause", self.cause.as_str())
            .optional("reason", self.reason.clone())
            .field("revoked_at", FieldValue::timestamp(&self.revoked_at))
            .build()
    }
}

/// Memory or audit payload after redaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub fields: Fields,
    #[serde(default)]
    pub tokens: Vec<RedactionToken>,
}

impl CanonicalFields for RedactedRecord {
    fn canonical_fields(&self) -> Fields {
        let tokens = self
            .tokens
            .iter()
            .map(|t| {
                FieldValue::Map(
                    FieldsBuilder::new()
                        .field("kind", t.kind.as_str())
                        .field("field", t.field.as_str())
                        .field("token", t.token.as_str())
                        .build(),
                )
            })
            .collect();
        FieldsBuilder::new()
            .optional("agent", self.agent.clone())
            .field("fields", FieldValue::Map(self.fields.clone()))
            .field("tokens", FieldValue::List(tokens))
            .build()
    }
}

/// Kind tag of a ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestCreated,
    GrantIssued,
    GrantRevoked,
    RedactedRecord,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::GrantIssued => "grant_issued",
            Self::GrantRevoked => "grant_revoked",
            Self::RedactedRecord => "redacted_record",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain event carried by one ledger entry. The set is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    RequestCreated(ConsentRequest),
    GrantIssued(ConsentGrant),
    GrantRevoked(GrantRevocation),
    RedactedRecord(RedactedRecord),
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RequestCreated(_) => EventKind::RequestCreated,
            Self::GrantIssued(_) => EventKind::GrantIssued,
            Self::GrantRevoked(_) => EventKind::GrantRevoked,
            Self::RedactedRecord(_) => EventKind::RedactedRecord,
        }
    }

    /// True when `agent` is a party to the event.
    pub fn references_agent(&self, agent: &str) -> bool {
        match self {
            Self::RequestCreated(req) => req.involves(agent),
            Self::GrantIssued(grant) => grant.involves(agent),
            Self::GrantRevoked(rev) => rev.from_agent == agent || rev.to_agent == agent,
            Self::RedactedRecord(record) => record.agent.as_deref() == Some(agent),
        }
    }
}

impl CanonicalFields for LedgerEvent {
    fn canonical_fields(&self) -> Fields {
        match self {
            Self::RequestCreated(req) => req.canonical_fields(),
            Self::GrantIssued(grant) => grant.canonical_fields(),
            Self::GrantRevoked(rev) => rev.canonical_fields(),
            Self::RedactedRecord(record) => record.canonical_fields(),
        }
    }
}

/// Signed, sequenced entry. One JSON object per line on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub prev_chain_digest: ChainDigest,
    pub chain_digest: ChainDigest,
    pub event: LedgerEvent,
}

impl LedgerEntry {
    /// Canonical bytes of the signed envelope.
    pub fn envelope_bytes(
        sequence: u64,
        timestamp: &DateTime<Utc>,
        event: &LedgerEvent,
    ) -> Result<Vec<u8>, EncodingError> {
        let envelope = FieldsBuilder::new()
            .field("kind", event.kind().as_str())
            .field("payload", FieldValue::Map(event.canonical_fields()))
            .field("sequence", FieldValue::Int(sequence as i64))
            .field("timestamp", FieldValue::timestamp(timestamp))
            .build();
        canonical::encode(&envelope)
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        Self::envelope_bytes(self.sequence_number, &self.timestamp, &self.event)
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
