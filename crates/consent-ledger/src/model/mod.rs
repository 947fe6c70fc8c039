//! Consent model: requests, grants and the rules that govern them.

pub mod duration;
pub mod rules;
pub mod scope;
pub mod types;

pub use duration::{format_duration, parse_duration};
pub use rules::{can_grant, can_request, can_revoke, evaluate, is_valid, Validity};
pub use scope::Scope;
pub use types::{ConsentGrant, ConsentRequest, ConsentType, GrantId, GrantStatus, RequestId};
