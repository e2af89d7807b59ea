use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegenError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to fetch eligible accounts: {0}")]
    FetchEligibleAccounts(String),

    #[error("Failed to update account {account_id}: {reason}")]
    AccountUpdate { account_id: String, reason: String },

    #[error("Failed to write audit record: {0}")]
    AuditWrite(String),

    #[error("Datastore call `{operation}` timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RegenError>;
