//! Output formatting utilities

use colored::*;
use consent_ledger::{ConsentGrant, LedgerEntry, LedgerEvent};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable
    #[default]
    Table,
    /// JSON format
    Json,
}

/// One ledger entry as an audit table row
#[derive(Debug, Tabled)]
pub struct AuditRow {
    #[tabled(rename = "SEQ")]
    pub sequence: u64,
    #[tabled(rename = "TIME")]
    pub timestamp: String,
    #[tabled(rename = "KIND")]
    pub kind: String,
    #[tabled(rename = "DETAIL")]
    pub detail: String,
    #[tabled(rename = "DIGEST")]
    pub digest: String,
}

impl From<&LedgerEntry> for AuditRow {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            sequence: entry.sequence_number,
            timestamp: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            kind: entry.kind().to_string(),
            detail: describe_event(&entry.event),
            digest: entry.chain_digest.short(),
        }
    }
}

fn describe_event(event: &LedgerEvent) -> String {
    match event {
        LedgerEvent::RequestCreated(req) => format!(
            "{} {} -> {} {} ({})",
            req.id, req.from_agent, req.to_agent, req.consent_type, req.scope
        ),
        LedgerEvent::GrantIssued(grant) => format!(
            "{} for {} scope {}{}",
            grant.id,
            grant.request_id,
            grant.scope,
            grant
                .expires_at
                .map(|at| format!(" until {}", at.format("%Y-%m-%d %H:%M")))
                .unwrap_or_default()
        ),
        LedgerEvent::GrantRevoked(rev) => format!(
            "{} {}{}",
            rev.grant_id,
            rev.cause.as_str(),
            rev.reason
                .as_deref()
                .map(|r| format!(": {r}"))
                .unwrap_or_default()
        ),
        LedgerEvent::RedactedRecord(record) => format!(
            "{} fields, {} redacted{}",
            record.fields.len(),
            record.tokens.len(),
            record
                .agent
                .as_deref()
                .map(|a| format!(" ({a})"))
                .unwrap_or_default()
        ),
    }
}

/// Print audit entries in the specified format
pub fn print_entries(entries: &[LedgerEntry], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("{}", "No entries".dimmed());
            } else {
                let rows: Vec<AuditRow> = entries.iter().map(AuditRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(entries)?),
    }
    Ok(())
}

/// Print a single item in the specified format
pub fn print_single<T: Serialize>(data: &T, format: OutputFormat, summary: &str) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => print_success(summary),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
    }
    Ok(())
}

pub fn grant_summary(grant: &ConsentGrant) -> String {
    let expiry = grant
        .expires_at
        .map(|at| format!("expires {}", at.to_rfc3339()))
        .unwrap_or_else(|| "no expiry".to_string());
    format!(
        "{} [{}] {} -> {} {} ({}, {})",
        grant.id,
        grant.status,
        grant.from_agent,
        grant.to_agent,
        grant.consent_type,
        grant.scope,
        expiry
    )
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}
