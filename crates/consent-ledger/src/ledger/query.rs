//! Audit query support

use chrono::{DateTime, Utc};

use super::entry::{EventKind, LedgerEntry};

/// Query over ledger entries
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Filter to entries the agent is a party to
    pub agent: Option<String>,

    /// Redacted form of `agent`, also accepted when set
    pub agent_alias: Option<String>,

    /// Filter by event kind
    pub kind: Option<EventKind>,

    /// Filter by time range start (inclusive)
    pub from: Option<DateTime<Utc>>,

    /// Filter by time range end (exclusive)
    pub to: Option<DateTime<Utc>>,

    /// Filter by minimum sequence number (inclusive)
    pub after_sequence: Option<u64>,

    /// Maximum number of results
    pub limit: Option<usize>,

    /// Offset for pagination
    pub offset: Option<usize>,

    /// Sort order (true = newest first)
    pub descending: bool,
}

impl AuditQuery {
    /// Create a new query builder
    pub fn builder() -> AuditQueryBuilder {
        AuditQueryBuilder::default()
    }

    /// Check if an entry matches this query
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(ref agent) = self.agent {
            let aliased = self
                .agent_alias
                .as_deref()
                .is_some_and(|alias| entry.event.references_agent(alias));
            if !aliased && !entry.event.references_agent(agent) {
                return false;
            }
        }

        if let Some(kind) = self.kind {
            if entry.kind() != kind {
                return false;
            }
        }

        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }

        if let Some(to) = self.to {
            if entry.timestamp >= to {
                return false;
            }
        }

        if let Some(after) = self.after_sequence {
            if entry.sequence_number < after {
                return false;
            }
        }

        true
    }

    /// Apply query to a list of entries
    pub fn apply(&self, entries: &[LedgerEntry]) -> Vec<LedgerEntry> {
        let mut results: Vec<LedgerEntry> = entries
            .iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();

        // Ledger order is sequence order.
        if self.descending {
            results.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        } else {
            results.sort_by(|a, b| a.sequence_number.cmp(&b.sequence_number));
        }

        let offset = self.offset.unwrap_or(0);
        if offset > 0 {
            results = results.into_iter().skip(offset).collect();
        }

        if let Some(limit) = self.limit {
            results.truncate(limit);
        }

        results
    }
}

/// Builder for audit queries
#[derive(Debug, Default)]
pub struct AuditQueryBuilder {
    query: AuditQuery,
}

impl AuditQueryBuilder {
    /// Filter by agent
    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.query.agent = Some(agent.into());
        self
    }

    /// Also match entries that carry this form of the agent
    pub fn agent_alias(mut self, alias: impl Into<String>) -> Self {
        self.query.agent_alias = Some(alias.into());
        self
    }

    /// Filter by event kind
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.query.kind = Some(kind);
        self
    }

    /// Filter by time range start
    pub fn from(mut self, time: DateTime<Utc>) -> Self {
        self.query.from = Some(time);
        self
    }

    /// Filter by time range end
    pub fn to(mut self, time: DateTime<Utc>) -> Self {
        self.query.to = Some(time);
        self
    }

    /// Only entries at or after this sequence number
    pub fn after_sequence(mut self, sequence: u64) -> Self {
        self.query.after_sequence = Some(sequence);
        self
    }

    /// Set limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Set offset
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Sort descending (newest first)
    pub fn descending(mut self) -> Self {
        self.query.descending = true;
        self
    }

    /// Build the query
    pub fn build(self) -> AuditQuery {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::FieldsBuilder;
    use crate::ledger::entry::{LedgerEvent, RedactedRecord};
    use crate::signer::ChainDigest;
    use chrono::{Duration, TimeZone};

    fn entry(sequence: u64, agent: &str) -> LedgerEntry {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        LedgerEntry {
            sequence_number: sequence,
            timestamp: start + Duration::minutes(sequence as i64),
            prev_chain_digest: ChainDigest::genesis(),
            chain_digest: ChainDigest::genesis(),
            event: LedgerEvent::RedactedRecord(RedactedRecord {
                agent: Some(agent.to_string()),
                fields: FieldsBuilder::new().field("n", sequence as i64).build(),
                tokens: vec![],
            }),
        }
    }

    fn sample() -> Vec<LedgerEntry> {
        vec![
            entry(1, "alpha"),
            entry(2, "beta"),
            entry(3, "alpha"),
            entry(4, "alpha"),
        ]
    }

    #[test]
    fn test_query_by_agent() {
        let query = AuditQuery::builder().agent("alpha").build();
        let results = query.apply(&sample());
        let seqs: Vec<u64> = results.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 3, 4]);
    }

    #[test]
    fn test_query_by_kind() {
        let query = AuditQuery::builder().kind(EventKind::GrantIssued).build();
        assert!(query.apply(&sample()).is_empty());

        let query = AuditQuery::builder().kind(EventKind::RedactedRecord).build();
        assert_eq!(query.apply(&sample()).len(), 4);
    }

    #[test]
    fn test_query_time_range() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let query = AuditQuery::builder()
            .from(start + Duration::minutes(2))
            .to(start + Duration::minutes(4))
            .build();
        let seqs: Vec<u64> = query
            .apply(&sample())
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_pagination_and_order() {
        let query = AuditQuery::builder().descending().offset(1).limit(2).build();
        let seqs: Vec<u64> = query
            .apply(&sample())
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(seqs, vec![3, 2]);
    }
}
