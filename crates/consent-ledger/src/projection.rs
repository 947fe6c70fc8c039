//! In-memory consent state, rebuilt from the ledger.
//!
//! Replay enforces the domain invariants a verified chain must also satisfy:
//! grants reference known requests and stay inside their scope, a request has
//! at most one active grant, and a terminated grant never changes again.

use std::collections::HashMap;

use crate::error::IntegrityError;
use crate::ledger::{LedgerEntry, LedgerEvent, RevocationCause};
use crate::model::rules::{mark_expired, mark_revoked};
use crate::model::{ConsentGrant, ConsentRequest, GrantId, GrantStatus, RequestId};

#[derive(Debug, Clone, Default)]
pub struct ConsentState {
    requests: HashMap<RequestId, ConsentRequest>,
    request_order: Vec<RequestId>,
    grants: HashMap<GrantId, ConsentGrant>,
    grant_order: Vec<GrantId>,
    latest_grant: HashMap<RequestId, GrantId>,
}

impl ConsentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay a verified chain.
    pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Result<Self, IntegrityError> {
        let mut state = Self::new();
        for entry in entries {
            state.apply(entry)?;
        }
        Ok(state)
    }

    /// Fold one entry into the state.
    pub fn apply(&mut self, entry: &LedgerEntry) -> Result<(), IntegrityError> {
        let seq = entry.sequence_number;
        match &entry.event {
            LedgerEvent::RequestCreated(req) => {
                if self.requests.contains_key(&req.id) {
                    return Err(IntegrityError::new(
                        seq,
                        format!("request {} created twice", req.id),
                    ));
                }
                self.request_order.push(req.id.clone());
                self.requests.insert(req.id.clone(), req.clone());
            }
            LedgerEvent::GrantIssued(grant) => {
                let Some(req) = self.requests.get(&grant.request_id) else {
                    return Err(IntegrityError::new(
                        seq,
                        format!("grant {} references unknown request {}", grant.id, grant.request_id),
                    ));
                };
                if self.grants.contains_key(&grant.id) {
                    return Err(IntegrityError::new(seq, format!("grant {} issued twice", grant.id)));
                }
                if grant.status != GrantStatus::Active {
                    return Err(IntegrityError::new(
                        seq,
                        format!("grant {} issued with status {}", grant.id, grant.status),
                    ));
                }
                if !req.scope.contains(&grant.scope) {
                    return Err(IntegrityError::new(
                        seq,
                        format!("grant {} scope {} exceeds request scope {}", grant.id, grant.scope, req.scope),
                    ));
                }
                if let Some(previous) = self.current_grant(&grant.request_id) {
                    if previous.is_active() {
                        return Err(IntegrityError::new(
                            seq,
                            format!(
                                "request {} already has active grant {}",
                                grant.request_id, previous.id
                            ),
                        ));
                    }
                }
                self.latest_grant.insert(grant.request_id.clone(), grant.id.clone());
                self.grant_order.push(grant.id.clone());
                self.grants.insert(grant.id.clone(), grant.clone());
            }
            LedgerEvent::GrantRevoked(rev) => {
                let Some(grant) = self.grants.get_mut(&rev.grant_id) else {
                    return Err(IntegrityError::new(
                        seq,
                        format!("revocation references unknown grant {}", rev.grant_id),
                    ));
                };
                if grant.status != GrantStatus::Active {
                    return Err(IntegrityError::new(
                        seq,
                        format!("grant {} is already {}", grant.id, grant.status),
                    ));
                }
                match rev.cause {
                    RevocationCause::Explicit => {
                        mark_revoked(grant, rev.revoked_at, rev.reason.clone())
                    }
                    RevocationCause::Expired => mark_expired(grant),
                }
            }
            LedgerEvent::RedactedRecord(_) => {}
        }
        Ok(())
    }

    pub fn request(&self, id: &RequestId) -> Option<&ConsentRequest> {
        self.requests.get(id)
    }

    pub fn grant(&self, id: &GrantId) -> Option<&ConsentGrant> {
        self.grants.get(id)
    }

    /// Most recent grant issued for a request.
    pub fn current_grant(&self, request_id: &RequestId) -> Option<&ConsentGrant> {
        self.latest_grant
            .get(request_id)
            .and_then(|id| self.grants.get(id))
    }

    /// Requests in creation order.
    pub fn requests(&self) -> impl Iterator<Item = &ConsentRequest> {
        self.request_order.iter().filter_map(|id| self.requests.get(id))
    }

    /// Grants newest first.
    pub fn grants_newest_first(&self) -> impl Iterator<Item = &ConsentGrant> {
        self.grant_order
            .iter()
            .rev()
            .filter_map(|id| self.grants.get(id))
    }

    /// Grants whose recorded status is active, in issue order.
    pub fn active_grants(&self) -> impl Iterator<Item = &ConsentGrant> {
        self.grant_order
            .iter()
            .filter_map(|id| self.grants.get(id))
            .filter(|grant| grant.is_active())
    }
}
