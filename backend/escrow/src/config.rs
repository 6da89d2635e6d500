//! Application configuration loaded from environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PlatformError, Result};

/// Which wallet pays for an approved expense.
///
/// Stamped on each expense at submission; review pays from that wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseFundingSource {
    /// The creator's personal wallet is debited (reimbursement in arrears).
    #[default]
    CreatorWallet,
    /// The project escrow wallet is debited.
    Escrow,
}

impl ExpenseFundingSource {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "creator_wallet" | "creator" => Some(Self::CreatorWallet),
            "escrow" | "project" => Some(Self::Escrow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Maximum pooled SQLite connections
    pub max_connections: u32,
    /// Port for the read-only REST API
    pub api_port: u16,
    /// How often (in seconds) the trust worker sweeps expired projects
    pub trust_worker_interval_secs: u64,
    pub expense_funding_source: ExpenseFundingSource,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./escrow.db".to_string()),
            max_connections: env_var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| PlatformError::Config("Invalid DB_MAX_CONNECTIONS".to_string()))?,
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| PlatformError::Config("Invalid API_PORT".to_string()))?,
            trust_worker_interval_secs: env_var("TRUST_WORKER_INTERVAL_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .map_err(|_| {
                    PlatformError::Config("Invalid TRUST_WORKER_INTERVAL_SECS".to_string())
                })?,
            expense_funding_source: match env_var("EXPENSE_FUNDING_SOURCE") {
                Ok(raw) => ExpenseFundingSource::parse(&raw).ok_or_else(|| {
                    PlatformError::Config(format!("Invalid EXPENSE_FUNDING_SOURCE: {raw}"))
                })?,
                Err(_) => ExpenseFundingSource::default(),
            },
        })
    }

    pub fn trust_worker_interval(&self) -> Duration {
        Duration::from_secs(self.trust_worker_interval_secs.max(1))
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| PlatformError::Config(format!("Missing env var: {key}")))
}
