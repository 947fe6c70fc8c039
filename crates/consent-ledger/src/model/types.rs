use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::duration::format_duration;
use super::scope::Scope;
use crate::canonical::{CanonicalFields, FieldValue, Fields, FieldsBuilder};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a consent request (`req_<uuid>`).
    RequestId,
    "req"
);
string_id!(
    /// Identifier of a consent grant (`grant_<uuid>`).
    GrantId,
    "grant"
);

/// Category of consent.
///
/// Names outside the built-in set are carried as `Custom` and are only
/// accepted when listed in `consent.custom_types`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConsentType {
    TaskAssignment,
    DataAccess,
    Collaboration,
    Representation,
    Attribution,
    Learning,
    Custom(String),
}

impl ConsentType {
    pub const BUILT_IN: [ConsentType; 6] = [
        ConsentType::TaskAssignment,
        ConsentType::DataAccess,
        ConsentType::Collaboration,
        ConsentType::Representation,
        ConsentType::Attribution,
        ConsentType::Learning,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "task_assignment" => Self::TaskAssignment,
            "data_access" => Self::DataAccess,
            "collaboration" => Self::Collaboration,
            "representation" => Self::Representation,
            "attribution" => Self::Attribution,
            "learning" => Self::Learning,
            _ => Self::Custom(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskAssignment => "task_assignment",
            Self::DataAccess => "data_access",
            Self::Collaboration => "collaboration",
            Self::Representation => "representation",
            Self::Attribution => "attribution",
            Self::Learning => "learning",
            Self::Custom(name) => name,
        }
    }

    pub fn is_built_in(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl From<String> for ConsentType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for ConsentType {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<ConsentType> for String {
    fn from(value: ConsentType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ConsentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from one agent for another agent's consent. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub id: RequestId,
    pub from_agent: String,
    pub to_agent: String,
    pub consent_type: ConsentType,
    pub scope: Scope,
    pub purpose: String,
    /// Whole seconds; `None` leaves the expiry to the grantor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_duration_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ConsentRequest {
    pub fn requested_duration(&self) -> Option<Duration> {
        self.requested_duration_secs.and_then(Duration::try_seconds)
    }

    /// Latest expiry a grant for this request may carry.
    pub fn expiry_bound(&self) -> Option<DateTime<Utc>> {
        self.requested_duration()
            .and_then(|duration| self.created_at.checked_add_signed(duration))
    }

    /// Operator-facing summary of the request.
    pub fn describe(&self) -> String {
        let duration = match self.requested_duration() {
            Some(duration) => format!("for {}", format_duration(duration)),
            None => "until revoked".to_string(),
        };
        format!(
            "{} requests {} consent from {} to {} within {} {}.",
            self.from_agent,
            self.consent_type.as_str().replace('_', " "),
            self.to_agent,
            self.purpose,
            self.scope,
            duration
        )
    }

    pub fn involves(&self, agent: &str) -> bool {
        self.from_agent == agent || self.to_agent == agent
    }
}

impl CanonicalFields for ConsentRequest {
    fn canonical_fields(&self) -> Fields {
        FieldsBuilder::new()
            .field("id", self.id.as_str())
            .field("from_agent", self.from_agent.as_str())
            .field("to_agent", self.to_agent.as_str())
            .field("consent_type", self.consent_type.as_str())
            .field("scope", self.scope.as_str())
            .field("purpose", self.purpose.as_str())
            .optional("requested_duration_secs", self.requested_duration_secs)
            .field("created_at", FieldValue::timestamp(&self.created_at))
            .build()
    }
}

/// Lifecycle state of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Revoked,
    Expired,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consent given in answer to a request.
///
/// `from_agent`, `to_agent` and `consent_type` are copied from the owning
/// request so validation never needs a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub id: GrantId,
    pub request_id: RequestId,
    pub from_agent: String,
    pub to_agent: String,
    pub consent_type: ConsentType,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub revocable: bool,
    /// Free-text annotations. Recorded, never enforced.
    #[serde(default)]
    pub conditions: Vec<String>,
    pub granted_at: DateTime<Utc>,
    pub status: GrantStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
}

impl ConsentGrant {
    pub fn is_active(&self) -> bool {
        self.status == GrantStatus::Active
    }

    /// True once `now` is past the expiry, regardless of recorded status.
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    pub fn involves(&self, agent: &str) -> bool {
        self.from_agent == agent || self.to_agent == agent
    }
}

impl CanonicalFields for ConsentGrant {
    fn canonical_fields(&self) -> Fields {
        let conditions = self
            .conditions
            .iter()
            .map(|c| FieldValue::text(c.as_str()))
            .collect();
        FieldsBuilder::new()
            .field("id", self.id.as_str())
            .field("request_id", self.request_id.as_str())
            .field("from_agent", self.from_agent.as_str())
            .field("to_agent", self.to_agent.as_str())
            .field("consent_type", self.consent_type.as_str())
            .field("scope", self.scope.as_str())
            .optional("expires_at", self.expires_at.as_ref().map(FieldValue::timestamp))
            .field("revocable", self.revocable)
            .field("conditions", FieldValue::List(conditions))
            .field("granted_at", FieldValue::timestamp(&self.granted_at))
            .field("status", self.status.as_str())
            .optional("revoked_at", self.revoked_at.as_ref().map(FieldValue::timestamp))
            .optional("revocation_reason", self.revocation_reason.clone())
            .build()
    }
}
