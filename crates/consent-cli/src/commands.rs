//! Subcommands mapping onto the consent registry

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use consent_ledger::{
    parse_duration, Clock, ConsentRegistry, ConsentType, GrantId, RequestId, SystemClock,
};

use crate::output::{self, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Request consent from another agent
    Request {
        /// Requesting agent
        #[arg(long)]
        from: String,

        /// Agent whose consent is requested
        #[arg(long)]
        to: String,

        /// Consent type (task_assignment, data_access, collaboration, ...)
        #[arg(long = "type", value_name = "TYPE")]
        consent_type: String,

        /// Scope pattern, e.g. `inventory:*`
        #[arg(long)]
        scope: String,

        /// Why consent is needed
        #[arg(long, default_value = "")]
        purpose: String,

        /// Requested duration, e.g. `4h` or `1w2d`
        #[arg(long)]
        duration: Option<String>,
    },

    /// Grant a pending request
    Grant {
        /// Request to grant
        request_id: String,

        /// Narrower scope than requested
        #[arg(long)]
        scope: Option<String>,

        /// Absolute expiry (RFC 3339)
        #[arg(long, conflicts_with = "expires_in")]
        expires_at: Option<DateTime<Utc>>,

        /// Relative expiry, e.g. `30m`
        #[arg(long)]
        expires_in: Option<String>,

        /// Grant cannot be revoked
        #[arg(long)]
        irrevocable: bool,

        /// Free-text condition (repeatable)
        #[arg(long = "condition")]
        conditions: Vec<String>,
    },

    /// Revoke a grant
    Revoke {
        /// Grant to revoke
        grant_id: String,

        /// Reason recorded in the ledger
        #[arg(long)]
        reason: Option<String>,
    },

    /// Check whether an agent holds consent for a scope
    Validate {
        /// Agent that wants to act
        agent: String,

        /// Consent type
        #[arg(long = "type", value_name = "TYPE")]
        consent_type: String,

        /// Required scope
        #[arg(long)]
        scope: String,

        /// Only count grants from this agent
        #[arg(long)]
        counterparty: Option<String>,
    },

    /// Show ledger entries involving an agent
    Audit {
        /// Agent to audit
        agent: String,

        /// Show only the most recent N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Re-verify the whole chain from genesis
    Verify,
}

pub async fn execute(
    command: Command,
    registry: &ConsentRegistry,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Command::Request {
            from,
            to,
            consent_type,
            scope,
            purpose,
            duration,
        } => {
            let duration = duration.as_deref().map(parse_duration).transpose()?;
            let req = registry
                .request_consent(
                    &from,
                    &to,
                    ConsentType::parse(&consent_type),
                    &scope,
                    &purpose,
                    duration,
                )
                .await?;
            let summary = format!("{} {}", req.id, req.describe());
            output::print_single(&req, format, &summary)
        }

        Command::Grant {
            request_id,
            scope,
            expires_at,
            expires_in,
            irrevocable,
            conditions,
        } => {
            let expires_at = match expires_in {
                Some(raw) => {
                    let span = parse_duration(&raw)?;
                    Some(
                        SystemClock
                            .now()
                            .checked_add_signed(span)
                            .context("expiry is out of range")?,
                    )
                }
                None => expires_at,
            };
            let grant = registry
                .grant_consent(
                    &RequestId::from(request_id),
                    scope.as_deref(),
                    expires_at,
                    !irrevocable,
                    conditions,
                )
                .await?;
            output::print_single(&grant, format, &output::grant_summary(&grant))
        }

        Command::Revoke { grant_id, reason } => {
            let grant = registry
                .revoke_consent(&GrantId::from(grant_id), reason)
                .await?;
            output::print_single(&grant, format, &output::grant_summary(&grant))
        }

        Command::Validate {
            agent,
            consent_type,
            scope,
            counterparty,
        } => {
            let consent_type = ConsentType::parse(&consent_type);
            let grant = match counterparty {
                Some(counterparty) => {
                    registry
                        .validate_between(&agent, &counterparty, &consent_type, &scope)
                        .await?
                }
                None => registry.validate(&agent, &consent_type, &scope).await?,
            };
            let summary = format!("allowed by {}", output::grant_summary(&grant));
            output::print_single(&grant, format, &summary)
        }

        Command::Audit { agent, limit } => {
            let entries = registry.audit(&agent, limit);
            output::print_entries(&entries, format)
        }

        Command::Verify => {
            let count = registry.verify().await?;
            let tail = registry.store().tail_digest();
            let report = serde_json::json!({
                "verified_entries": count,
                "tail_digest": tail,
            });
            output::print_single(
                &report,
                format,
                &format!("{count} entries verified, tail {tail}"),
            )
        }
    }
}
