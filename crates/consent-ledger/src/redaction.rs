//! Deterministic PII tokenization.
//!
//! Emails and phone numbers are replaced by `{{REDACTED:<kind>:<hex>}}` where
//! the hex is a salted SHA-256 prefix of the matched text. Equal inputs yield
//! equal tokens under the same salt; the raw text is not recoverable.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::{FieldValue, Fields};
use crate::config::RedactionConfig;
use crate::error::RejectedError;

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const PHONE_PATTERN: &str = r"\+?[0-9][0-9\-]{8,}[0-9]";
const TOKEN_PATTERN: &str = r"\{\{REDACTED:(?:email|phone):[0-9a-f]{24}\}\}";

/// Number of digest bytes kept in a token.
const TOKEN_BYTES: usize = 12;

/// Category of sensitive substring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    Email,
    Phone,
}

impl SensitiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }
}

impl fmt::Display for SensitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One substitution performed during redaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionToken {
    pub kind: SensitiveKind,
    /// Dotted path of the field the match was found in.
    pub field: String,
    pub token: String,
}

/// Pattern-based redactor with a fixed salt.
#[derive(Clone)]
pub struct Redactor {
    pattern: Regex,
    salt: Vec<u8>,
    redact_emails: bool,
    redact_phones: bool,
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("redact_emails", &self.redact_emails)
            .field("redact_phones", &self.redact_phones)
            .finish_non_exhaustive()
    }
}

impl Redactor {
    pub fn new(config: &RedactionConfig) -> Self {
        // Single alternation so tokens inserted for one kind are never
        // rescanned by the other. Existing tokens match first and are kept.
        let combined = format!(
            "(?P<token>{TOKEN_PATTERN})|(?P<email>{EMAIL_PATTERN})|(?P<phone>{PHONE_PATTERN})"
        );
        let pattern = Regex::new(&combined).expect("built-in redaction patterns compile");
        Self {
            pattern,
            salt: config.salt.as_bytes().to_vec(),
            redact_emails: config.emails,
            redact_phones: config.phones,
        }
    }

    /// Token for a single sensitive value.
    pub fn tokenize(&self, kind: SensitiveKind, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        let digest = hasher.finalize();
        format!(
            "{{{{REDACTED:{}:{}}}}}",
            kind,
            hex::encode(&digest[..TOKEN_BYTES])
        )
    }

    /// Redact one string; returns the rewritten text and the substitutions.
    pub fn redact_text(&self, text: &str, field: &str) -> (String, Vec<RedactionToken>) {
        let mut tokens = Vec::new();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in self.pattern.captures_iter(text) {
            let (kind, m) = match (caps.name("email"), caps.name("phone")) {
                (Some(m), _) => (SensitiveKind::Email, m),
                (None, Some(m)) => (SensitiveKind::Phone, m),
                (None, None) => continue,
            };
            let enabled = match kind {
                SensitiveKind::Email => self.redact_emails,
                SensitiveKind::Phone => self.redact_phones,
            };
            if !enabled {
                continue;
            }
            let token = self.tokenize(kind, m.as_str());
            out.push_str(&text[last..m.start()]);
            out.push_str(&token);
            last = m.end();
            tokens.push(RedactionToken {
                kind,
                field: field.to_string(),
                token,
            });
        }
        out.push_str(&text[last..]);
        (out, tokens)
    }

    /// Redact every text value and field name in a payload, recursing into
    /// lists and maps.
    ///
    /// Fails if two distinct field names in one map redact to the same name.
    pub fn redact(&self, raw: &Fields) -> Result<(Fields, Vec<RedactionToken>), RejectedError> {
        let mut tokens = Vec::new();
        let redacted = self.redact_fields(raw, "", &mut tokens)?;
        if !tokens.is_empty() {
            debug!(substitutions = tokens.len(), "redacted sensitive substrings");
        }
        Ok((redacted, tokens))
    }

    fn redact_fields(
        &self,
        fields: &Fields,
        path: &str,
        tokens: &mut Vec<RedactionToken>,
    ) -> Result<Fields, RejectedError> {
        let mut out = Fields::new();
        for (name, value) in fields {
            let (name, mut found) = self.redact_text(name, path);
            let child = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };
            for token in &mut found {
                token.field.clone_from(&child);
            }
            tokens.extend(found);

            let value = self.redact_value(value, &child, tokens)?;
            if out.insert(name, value).is_some() {
                return Err(RejectedError::RedactedFieldCollision { field: child });
            }
        }
        Ok(out)
    }

    fn redact_value(
        &self,
        value: &FieldValue,
        path: &str,
        tokens: &mut Vec<RedactionToken>,
    ) -> Result<FieldValue, RejectedError> {
        Ok(match value {
            FieldValue::Text(text) => {
                let (redacted, found) = self.redact_text(text, path);
                tokens.extend(found);
                FieldValue::Text(redacted)
            }
            FieldValue::List(items) => FieldValue::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.redact_value(item, &format!("{path}[{i}]"), tokens))
                    .collect::<Result<_, _>>()?,
            ),
            FieldValue::Map(fields) => FieldValue::Map(self.redact_fields(fields, path, tokens)?),
            other => other.clone(),
        })
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(&RedactionConfig::default())
    }
}
