use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{RegenError, Result},
    period::WeeklyCadence,
    regen::{eligibility::EligibilityPolicy, policy::BalancePolicy},
};

/// Environment variable holding the scheduler trigger secret.
pub const SECRET_ENV: &str = "BOOST_CRON_SECRET";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub regen: RegenConfig,
    pub schedule: WeeklyCadence,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// File containing the trigger secret, e.g. a mounted container secret.
    pub secret_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8787".to_string(),
            secret_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RegenConfig {
    /// Action name written to every audit record.
    pub action: String,
    pub base_grant: u32,
    pub bonus_amount: u32,
    pub bonus_threshold: u32,
    pub balance_policy: BalancePolicy,
    pub max_balance: Option<u32>,
    pub eligibility: EligibilityPolicy,
    pub skip_if_current_period: bool,
    pub max_concurrency: usize,
    pub call_timeout_ms: u64,
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self {
            action: "golden_boost_regeneration".to_string(),
            base_grant: 1,
            bonus_amount: 1,
            bonus_threshold: 5,
            balance_policy: BalancePolicy::Reset,
            max_balance: None,
            eligibility: EligibilityPolicy::ActiveOnly,
            skip_if_current_period: true,
            max_concurrency: 8,
            call_timeout_ms: 10_000,
        }
    }
}

impl RegenConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "boost_regen.db".to_string(),
        }
    }
}

impl Config {
    /// Load layered configuration: `.env`, then the optional file at `path`,
    /// then `BOOST_*` environment variables (`__` separates sections).
    pub fn load(path: &str) -> Result<Self> {
        dotenv::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("BOOST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let regen = &self.regen;
        if regen.max_concurrency == 0 {
            return Err(RegenError::Config("regen.max_concurrency must be at least 1".into()));
        }
        if regen.call_timeout_ms == 0 {
            return Err(RegenError::Config("regen.call_timeout_ms must be positive".into()));
        }
        if regen.base_grant == 0 {
            return Err(RegenError::Config("regen.base_grant must be at least 1".into()));
        }
        if let Some(max) = regen.max_balance {
            if max < regen.base_grant {
                return Err(RegenError::Config(format!(
                    "regen.max_balance ({}) is below regen.base_grant ({})",
                    max, regen.base_grant
                )));
            }
        }
        self.schedule.validate()
    }

    /// Resolve the trigger secret from the environment, falling back to
    /// `server.secret_file`. Never read from the config file itself.
    pub fn trigger_secret(&self) -> Result<Option<String>> {
        resolve_secret(
            std::env::var(SECRET_ENV).ok(),
            self.server.secret_file.as_deref().map(Path::new),
        )
    }
}

fn resolve_secret(env_value: Option<String>, secret_file: Option<&Path>) -> Result<Option<String>> {
    if let Some(value) = env_value.map(|v| v.trim().to_string()) {
        if !value.is_empty() {
            info!("Trigger secret loaded from {}", SECRET_ENV);
            return Ok(Some(value));
        }
        warn!("{} is set but empty, ignoring", SECRET_ENV);
    }

    let Some(path) = secret_file else {
        return Ok(None);
    };

    let contents = std::fs::read_to_string(path).map_err(|e| {
        RegenError::Config(format!("failed to read secret file {}: {}", path.display(), e))
    })?;
    let secret = contents.trim();

    if secret.is_empty() {
        warn!("Secret file {} is empty, treating trigger as unauthenticated", path.display());
        Ok(None)
    } else {
        info!("Trigger secret loaded from {}", path.display());
        Ok(Some(secret.to_string()))
    }
}
