//! Configuration for the consent ledger.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Where ledger entries are persisted
    #[serde(default)]
    pub storage: StorageConfig,

    /// Redaction of sensitive substrings in memory/audit records
    #[serde(default)]
    pub redaction: RedactionConfig,

    /// Consent model settings
    #[serde(default)]
    pub consent: ConsentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    Memory,

    /// Append-only JSON-lines file
    File {
        /// Ledger file path
        #[serde(default = "default_ledger_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: default_ledger_path(),
        }
    }
}

impl StorageConfig {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }
}

/// Redaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Salt mixed into every redaction token. Changing it breaks correlation
    /// with tokens already in the ledger.
    #[serde(default = "default_salt")]
    pub salt: String,

    /// Redact email addresses
    #[serde(default = "default_true")]
    pub emails: bool,

    /// Redact phone numbers
    #[serde(default = "default_true")]
    pub phones: bool,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            salt: default_salt(),
            emails: true,
            phones: true,
        }
    }
}

/// Consent model configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentConfig {
    /// Additional consent type names accepted besides the built-in ones
    #[serde(default)]
    pub custom_types: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("consent.jsonl")
}

fn default_salt() -> String {
    "development-consent-redaction-salt".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LedgerConfig {
    /// Load configuration: defaults, then an optional file, then
    /// `CONSENT_LEDGER__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&LedgerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONSENT_LEDGER")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("consent.custom_types")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// In-memory configuration for tests and embedding.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig::Memory,
            ..Default::default()
        }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::File { path: path.into() },
            ..Default::default()
        }
    }
}
