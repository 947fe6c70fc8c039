//! Pure consent rules over projected state.
//!
//! Nothing here touches the ledger. The registry evaluates these against its
//! projection and then records whatever transition they call for.

use chrono::{DateTime, SecondsFormat, Utc};

use super::scope::Scope;
use super::types::{ConsentGrant, ConsentRequest, ConsentType, GrantStatus};
use crate::config::ConsentConfig;
use crate::error::{DenialReason, RejectedError};

fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// True for built-in types and for custom names listed in configuration.
pub fn is_known_type(consent_type: &ConsentType, config: &ConsentConfig) -> bool {
    match consent_type {
        ConsentType::Custom(name) => config.custom_types.iter().any(|known| known == name),
        _ => true,
    }
}

/// Structural validation of a new request.
pub fn can_request(req: &ConsentRequest, config: &ConsentConfig) -> Result<(), RejectedError> {
    if req.from_agent.trim().is_empty() {
        return Err(RejectedError::EmptyField { field: "from_agent" });
    }
    if req.to_agent.trim().is_empty() {
        return Err(RejectedError::EmptyField { field: "to_agent" });
    }
    if req.consent_type.as_str().is_empty() || !is_known_type(&req.consent_type, config) {
        return Err(RejectedError::UnknownConsentType(
            req.consent_type.as_str().to_string(),
        ));
    }
    req.scope.validate()?;
    if let Some(secs) = req.requested_duration_secs {
        if secs <= 0 {
            return Err(RejectedError::InvalidDuration(format!("{secs}s")));
        }
    }
    Ok(())
}

/// Check a proposed grant against its request and return the effective
/// expiry.
///
/// `existing` is the request's current grant, if any. It blocks the new grant
/// while active and not past its expiry. When the request carries a duration
/// and no expiry is proposed, the grant expires at the duration bound.
pub fn can_grant(
    req: &ConsentRequest,
    existing: Option<&ConsentGrant>,
    proposed_scope: &Scope,
    proposed_expiry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, RejectedError> {
    if let Some(grant) = existing {
        if grant.is_active() && !grant.is_past_expiry(now) {
            return Err(RejectedError::ActiveGrantExists {
                request_id: req.id.to_string(),
                grant_id: grant.id.to_string(),
            });
        }
    }

    proposed_scope.validate()?;
    if !req.scope.contains(proposed_scope) {
        return Err(RejectedError::ScopeWidening {
            requested: req.scope.to_string(),
            proposed: proposed_scope.to_string(),
        });
    }

    let bound = req.expiry_bound();
    let expires_at = match (proposed_expiry, bound) {
        (Some(expires_at), Some(bound)) if expires_at > bound => {
            return Err(RejectedError::ExpiryBeyondDuration {
                expires_at: rfc3339(&expires_at),
                bound: rfc3339(&bound),
            });
        }
        (Some(expires_at), _) => Some(expires_at),
        (None, bound) => bound,
    };

    if let Some(expires_at) = expires_at {
        if expires_at <= now {
            return Err(RejectedError::ExpiryInPast {
                expires_at: rfc3339(&expires_at),
                granted_at: rfc3339(&now),
            });
        }
    }

    Ok(expires_at)
}

/// Outcome of evaluating one grant for one required scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Revoked,
    /// `newly_observed` is set when the recorded status is still active and
    /// the expiry transition has not been recorded yet.
    Expired { newly_observed: bool },
    ScopeMismatch,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            Self::Valid => None,
            Self::Revoked => Some(DenialReason::Revoked),
            Self::Expired { .. } => Some(DenialReason::Expired),
            Self::ScopeMismatch => Some(DenialReason::ScopeMismatch),
        }
    }
}

/// Evaluate a grant without mutating it.
pub fn evaluate(grant: &ConsentGrant, now: DateTime<Utc>, required_scope: &Scope) -> Validity {
    match grant.status {
        GrantStatus::Revoked => Validity::Revoked,
        GrantStatus::Expired => Validity::Expired {
            newly_observed: false,
        },
        GrantStatus::Active if grant.is_past_expiry(now) => Validity::Expired {
            newly_observed: true,
        },
        GrantStatus::Active if !grant.scope.contains(required_scope) => Validity::ScopeMismatch,
        GrantStatus::Active => Validity::Valid,
    }
}

/// Validity predicate. Flips an active grant to `expired` the first time it
/// is observed past its expiry; the caller records that transition.
pub fn is_valid(grant: &mut ConsentGrant, now: DateTime<Utc>, required_scope: &Scope) -> bool {
    let validity = evaluate(grant, now, required_scope);
    if let Validity::Expired {
        newly_observed: true,
    } = validity
    {
        mark_expired(grant);
    }
    validity.is_valid()
}

pub fn can_revoke(grant: &ConsentGrant, now: DateTime<Utc>) -> Result<(), RejectedError> {
    match grant.status {
        GrantStatus::Revoked => Err(RejectedError::AlreadyRevoked(grant.id.to_string())),
        GrantStatus::Expired => Err(RejectedError::AlreadyExpired(grant.id.to_string())),
        GrantStatus::Active if grant.is_past_expiry(now) => {
            Err(RejectedError::AlreadyExpired(grant.id.to_string()))
        }
        GrantStatus::Active if !grant.revocable => {
            Err(RejectedError::NotRevocable(grant.id.to_string()))
        }
        GrantStatus::Active => Ok(()),
    }
}

pub fn mark_expired(grant: &mut ConsentGrant) {
    if grant.status == GrantStatus::Active {
        grant.status = GrantStatus::Expired;
    }
}

pub fn mark_revoked(grant: &mut ConsentGrant, at: DateTime<Utc>, reason: Option<String>) {
    if grant.status == GrantStatus::Active {
        grant.status = GrantStatus::Revoked;
        grant.revoked_at = Some(at);
        grant.revocation_reason = reason;
    }
}
