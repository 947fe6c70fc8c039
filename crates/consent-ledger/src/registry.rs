//! Consent registry: the surface enforcement points and operators call.
//!
//! Every mutation runs under one write gate: check the rules against the
//! projection, append the event, then fold it into the projection. The
//! projection is only ever changed by entries that are already durable.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::canonical::Fields;
use crate::clock::Clock;
use crate::config::{ConsentConfig, LedgerConfig, StorageConfig};
use crate::error::{ConsentError, DenialReason, LedgerError, RejectedError, Result};
use crate::ledger::{
    AuditQuery, FileBackend, GrantRevocation, LedgerBackend, LedgerEntry, LedgerEvent,
    LedgerStore, MemoryBackend, RedactedRecord, RevocationCause,
};
use crate::model::rules::{self, Validity};
use crate::model::{
    ConsentGrant, ConsentRequest, ConsentType, GrantId, GrantStatus, RequestId, Scope,
};
use crate::projection::ConsentState;
use crate::redaction::Redactor;

pub struct ConsentRegistry {
    store: Arc<LedgerStore>,
    state: RwLock<ConsentState>,
    gate: Mutex<()>,
    redactor: Redactor,
    consent: ConsentConfig,
}

impl std::fmt::Debug for ConsentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentRegistry")
            .field("store", &self.store)
            .field("redactor", &self.redactor)
            .finish_non_exhaustive()
    }
}

/// Outcome of matching grants for one validation, before any expiry is
/// recorded.
struct Decision {
    outcome: std::result::Result<ConsentGrant, ConsentError>,
    newly_expired: Vec<GrantId>,
}

impl ConsentRegistry {
    /// Open the configured backend, verify the chain and rebuild state.
    pub async fn open(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let backend: Arc<dyn LedgerBackend> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryBackend::new()),
            StorageConfig::File { path } => Arc::new(FileBackend::open(path.clone()).await?),
        };
        Self::with_backend(backend, clock, config).await
    }

    /// Open a registry over a caller-supplied backend. A backend shared with
    /// another registry rejects whichever writer falls behind as out of order.
    pub async fn with_backend(
        backend: Arc<dyn LedgerBackend>,
        clock: Arc<dyn Clock>,
        config: &LedgerConfig,
    ) -> Result<Self> {
        let store = LedgerStore::open(backend, clock).await?;
        Self::from_store(Arc::new(store), config)
    }

    /// Build a registry over a store it owns exclusively: the projection and
    /// write gate are per registry.
    pub(crate) fn from_store(store: Arc<LedgerStore>, config: &LedgerConfig) -> Result<Self> {
        let state = ConsentState::replay(&store.entries()).map_err(|err| {
            error!(
                sequence = err.sequence,
                reason = %err.reason,
                "ledger replay violated consent invariants"
            );
            err
        })?;

        Ok(Self {
            store,
            state: RwLock::new(state),
            gate: Mutex::new(()),
            redactor: Redactor::new(&config.redaction),
            consent: config.consent.clone(),
        })
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }

    /// Record a new consent request.
    pub async fn request_consent(
        &self,
        from_agent: &str,
        to_agent: &str,
        consent_type: ConsentType,
        scope: &str,
        purpose: &str,
        duration: Option<Duration>,
    ) -> Result<ConsentRequest> {
        let req = ConsentRequest {
            id: RequestId::generate(),
            from_agent: from_agent.trim().to_string(),
            to_agent: to_agent.trim().to_string(),
            consent_type,
            scope: Scope::parse(scope)?,
            purpose: purpose.to_string(),
            requested_duration_secs: duration.map(|d| d.num_seconds()),
            created_at: self.now(),
        };
        rules::can_request(&req, &self.consent).inspect_err(|err| {
            warn!(from_agent, to_agent, reason = %err, "consent request rejected");
        })?;

        let _gate = self.gate.lock().await;
        let entry = self
            .commit(LedgerEvent::RequestCreated(req.clone()))
            .await?;

        info!(
            sequence = entry.sequence_number,
            request_id = %req.id,
            from_agent = %req.from_agent,
            to_agent = %req.to_agent,
            consent_type = %req.consent_type,
            scope = %req.scope,
            "consent requested"
        );
        Ok(req)
    }

    /// Grant a stored request, optionally narrowing its scope.
    ///
    /// Without `expires_at` the grant expires at the request's duration
    /// bound, or never when the request had no duration.
    pub async fn grant_consent(
        &self,
        request_id: &RequestId,
        scope: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        revocable: bool,
        conditions: Vec<String>,
    ) -> Result<ConsentGrant> {
        let _gate = self.gate.lock().await;
        let now = self.now();

        let (req, existing) = {
            let state = self.state.read();
            let req = state.request(request_id).cloned().ok_or_else(|| {
                ConsentError::not_found(format!("request {request_id} does not exist"))
            })?;
            (req, state.current_grant(request_id).cloned())
        };

        if let Some(previous) = existing.as_ref() {
            if previous.is_active() && previous.is_past_expiry(now) {
                self.record_expiry(previous, now).await?;
            }
        }

        let proposed_scope = match scope {
            Some(raw) => Scope::parse(raw)?,
            None => req.scope.clone(),
        };
        let expires_at =
            rules::can_grant(&req, existing.as_ref(), &proposed_scope, expires_at, now)
                .inspect_err(|err| {
                    warn!(request_id = %request_id, reason = %err, "consent grant rejected");
                })?;

        let grant = ConsentGrant {
            id: GrantId::generate(),
            request_id: req.id.clone(),
            from_agent: req.from_agent.clone(),
            to_agent: req.to_agent.clone(),
            consent_type: req.consent_type.clone(),
            scope: proposed_scope,
            expires_at,
            revocable,
            conditions,
            granted_at: now,
            status: GrantStatus::Active,
            revoked_at: None,
            revocation_reason: None,
        };
        let entry = self.commit(LedgerEvent::GrantIssued(grant.clone())).await?;

        info!(
            sequence = entry.sequence_number,
            grant_id = %grant.id,
            request_id = %grant.request_id,
            scope = %grant.scope,
            expires_at = ?grant.expires_at,
            revocable,
            "consent granted"
        );
        Ok(grant)
    }

    /// Revoke an active, revocable grant. Returns the revoked grant.
    pub async fn revoke_consent(
        &self,
        grant_id: &GrantId,
        reason: Option<String>,
    ) -> Result<ConsentGrant> {
        let _gate = self.gate.lock().await;
        let now = self.now();

        let grant = self.state.read().grant(grant_id).cloned().ok_or_else(|| {
            ConsentError::not_found(format!("grant {grant_id} does not exist"))
        })?;

        if grant.is_active() && grant.is_past_expiry(now) {
            self.record_expiry(&grant, now).await?;
        }
        rules::can_revoke(&grant, now).inspect_err(|err| {
            warn!(grant_id = %grant_id, reason = %err, "consent revocation rejected");
        })?;

        let revocation =
            GrantRevocation::for_grant(&grant, RevocationCause::Explicit, reason, now);
        let entry = self.commit(LedgerEvent::GrantRevoked(revocation)).await?;

        info!(
            sequence = entry.sequence_number,
            grant_id = %grant.id,
            request_id = %grant.request_id,
            "consent revoked"
        );
        self.state
            .read()
            .grant(grant_id)
            .cloned()
            .ok_or_else(|| ConsentError::not_found(format!("grant {grant_id} does not exist")).into())
    }

    /// Authorization gate. `agent` must hold a valid grant of
    /// `consent_type` covering `scope`; returns the authorizing grant.
    ///
    /// Any error is a denial.
    pub async fn validate(
        &self,
        agent: &str,
        consent_type: &ConsentType,
        scope: &str,
    ) -> Result<ConsentGrant> {
        self.check(agent, None, consent_type, scope).await
    }

    /// Like [`validate`](Self::validate) but only grants given by
    /// `counterparty` count.
    pub async fn validate_between(
        &self,
        agent: &str,
        counterparty: &str,
        consent_type: &ConsentType,
        scope: &str,
    ) -> Result<ConsentGrant> {
        self.check(agent, Some(counterparty), consent_type, scope)
            .await
    }

    async fn check(
        &self,
        agent: &str,
        counterparty: Option<&str>,
        consent_type: &ConsentType,
        scope: &str,
    ) -> Result<ConsentGrant> {
        let required = Scope::parse(scope)?;
        let now = self.now();

        let decision = decide(
            &self.state.read(),
            agent,
            counterparty,
            consent_type,
            &required,
            now,
        );

        if !decision.newly_expired.is_empty() {
            self.observe_expiry(&decision.newly_expired, now).await?;
        }

        match decision.outcome {
            Ok(grant) => {
                debug!(
                    agent,
                    consent_type = %consent_type,
                    scope = %required,
                    grant_id = %grant.id,
                    "consent valid"
                );
                Ok(grant)
            }
            Err(denied) => {
                warn!(
                    agent,
                    consent_type = %consent_type,
                    scope = %required,
                    reason = %denied.reason,
                    detail = %denied.detail,
                    "consent denied"
                );
                Err(denied.into())
            }
        }
    }

    /// Record expiry of grants observed past their expiry. Re-checked under
    /// the gate so racing validators write exactly one entry per grant.
    async fn observe_expiry(&self, grant_ids: &[GrantId], now: DateTime<Utc>) -> Result<()> {
        let _gate = self.gate.lock().await;
        for grant_id in grant_ids {
            let grant = self.state.read().grant(grant_id).cloned();
            if let Some(grant) = grant {
                if grant.is_active() && grant.is_past_expiry(now) {
                    self.record_expiry(&grant, now).await?;
                }
            }
        }
        Ok(())
    }

    /// Append the expiry transition. Caller holds the gate.
    async fn record_expiry(&self, grant: &ConsentGrant, now: DateTime<Utc>) -> Result<LedgerEntry> {
        let revocation = GrantRevocation::for_grant(grant, RevocationCause::Expired, None, now);
        let entry = self.commit(LedgerEvent::GrantRevoked(revocation)).await?;
        info!(
            sequence = entry.sequence_number,
            grant_id = %grant.id,
            request_id = %grant.request_id,
            expires_at = ?grant.expires_at,
            "consent expired"
        );
        Ok(entry)
    }

    /// Append then project. Caller holds the gate.
    async fn commit(&self, event: LedgerEvent) -> Result<LedgerEntry> {
        let entry = self.store.append(event).await?;
        self.state.write().apply(&entry)?;
        Ok(entry)
    }

    /// Entries referencing `agent` in chronological order; with a limit,
    /// the most recent `limit` of them.
    ///
    /// Redacted records store the agent in redacted form, so a sensitive
    /// agent name is matched through its token as well.
    pub fn audit(&self, agent: &str, limit: Option<usize>) -> Vec<LedgerEntry> {
        let mut builder = AuditQuery::builder().agent(agent);
        let (redacted, tokens) = self.redactor.redact_text(agent, "agent");
        if !tokens.is_empty() {
            builder = builder.agent_alias(redacted);
        }
        match limit {
            Some(limit) => {
                let mut entries = self.store.query(&builder.descending().limit(limit).build());
                entries.reverse();
                entries
            }
            None => self.store.query(&builder.build()),
        }
    }

    pub fn audit_query(&self, query: &AuditQuery) -> Vec<LedgerEntry> {
        self.store.query(query)
    }

    /// Redact and append a memory/audit payload.
    pub async fn append_redacted_record(&self, raw: &Fields) -> Result<LedgerEntry> {
        self.append_record(None, raw).await
    }

    /// Redact and append a payload attributed to `agent`, so `audit(agent)`
    /// returns it.
    pub async fn append_redacted_record_for(&self, agent: &str, raw: &Fields) -> Result<LedgerEntry> {
        if agent.trim().is_empty() {
            return Err(RejectedError::EmptyField { field: "agent" }.into());
        }
        self.append_record(Some(agent.trim().to_string()), raw).await
    }

    async fn append_record(&self, agent: Option<String>, raw: &Fields) -> Result<LedgerEntry> {
        let (fields, mut tokens) = self.redactor.redact(raw)?;
        let agent = agent.map(|agent| {
            let (agent, found) = self.redactor.redact_text(&agent, "agent");
            tokens.extend(found);
            agent
        });
        let substitutions = tokens.len();
        let entry = self
            .store
            .append(LedgerEvent::RedactedRecord(RedactedRecord {
                agent,
                fields,
                tokens,
            }))
            .await?;
        info!(
            sequence = entry.sequence_number,
            substitutions,
            "redacted record appended"
        );
        Ok(entry)
    }

    /// Re-verify durable storage and rebuild the projection from it.
    pub async fn verify(&self) -> Result<usize> {
        let _gate = self.gate.lock().await;
        let entries = self.store.load_and_verify().await?;
        let state = ConsentState::replay(&entries).map_err(|err| {
            error!(
                sequence = err.sequence,
                reason = %err.reason,
                "ledger replay violated consent invariants"
            );
            LedgerError::from(err)
        })?;
        *self.state.write() = state;
        Ok(entries.len())
    }

    pub fn get_request(&self, id: &RequestId) -> Option<ConsentRequest> {
        self.state.read().request(id).cloned()
    }

    pub fn get_grant(&self, id: &GrantId) -> Option<ConsentGrant> {
        self.state.read().grant(id).cloned()
    }

    /// Requests in creation order.
    pub fn requests(&self) -> Vec<ConsentRequest> {
        self.state.read().requests().cloned().collect()
    }

    /// Grants that are active and not past their expiry right now.
    pub fn active_grants(&self) -> Vec<ConsentGrant> {
        let now = self.now();
        self.state
            .read()
            .active_grants()
            .filter(|grant| !grant.is_past_expiry(now))
            .cloned()
            .collect()
    }
}

/// Pick the authorizing grant or the denial reason.
///
/// No grant of the type from `agent` is `not_found`; grants that exist but
/// none covering the scope is `scope_mismatch`. Otherwise the newest valid
/// covering grant wins, and without one the newest covering grant's state
/// (revoked or expired) is the reason.
fn decide(
    state: &ConsentState,
    agent: &str,
    counterparty: Option<&str>,
    consent_type: &ConsentType,
    required: &Scope,
    now: DateTime<Utc>,
) -> Decision {
    let candidates: Vec<&ConsentGrant> = state
        .grants_newest_first()
        .filter(|grant| grant.from_agent == agent && &grant.consent_type == consent_type)
        .filter(|grant| counterparty.map_or(true, |c| grant.to_agent == c))
        .collect();

    let mut newly_expired = Vec::new();

    if candidates.is_empty() {
        let detail = match counterparty {
            Some(c) => format!("no {consent_type} grant from {c} to {agent}"),
            None => format!("no {consent_type} grant for {agent}"),
        };
        return Decision {
            outcome: Err(ConsentError::not_found(detail)),
            newly_expired,
        };
    }

    let covering: Vec<&ConsentGrant> = candidates
        .into_iter()
        .filter(|grant| grant.scope.contains(required))
        .collect();
    if covering.is_empty() {
        return Decision {
            outcome: Err(ConsentError::new(
                DenialReason::ScopeMismatch,
                format!("no {consent_type} grant for {agent} covers {required}"),
            )),
            newly_expired,
        };
    }

    let mut valid = None;
    let mut denial: Option<ConsentError> = None;
    for grant in covering {
        let validity = rules::evaluate(grant, now, required);
        if let Validity::Expired {
            newly_observed: true,
        } = validity
        {
            newly_expired.push(grant.id.clone());
        }
        match validity {
            Validity::Valid => {
                if valid.is_none() {
                    valid = Some(grant.clone());
                }
            }
            Validity::Revoked if denial.is_none() => {
                denial = Some(ConsentError::new(
                    DenialReason::Revoked,
                    format!("grant {} was revoked", grant.id),
                ));
            }
            Validity::Expired { .. } if denial.is_none() => {
                let at = grant
                    .expires_at
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default();
                denial = Some(ConsentError::new(
                    DenialReason::Expired,
                    format!("grant {} expired at {at}", grant.id),
                ));
            }
            _ => {}
        }
    }

    let outcome = match (valid, denial) {
        (Some(grant), _) => Ok(grant),
        (None, Some(denial)) => Err(denial),
        (None, None) => Err(ConsentError::new(
            DenialReason::ScopeMismatch,
            format!("no {consent_type} grant for {agent} covers {required}"),
        )),
    };
    Decision {
        outcome,
        newly_expired,
    }
}
