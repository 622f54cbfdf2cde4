use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Duration;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub settlement: SettlementConfig,
}

/// Timing of the simulated on-chain confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettlementConfig {
    pub delay_secs: i64,
    pub poll_secs: u64,
    pub batch_size: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay_secs: 3,
            poll_secs: 5,
            batch_size: 50,
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            delay_secs: env_or("SETTLEMENT_DELAY_SECS", defaults.delay_secs)?,
            poll_secs: env_or("SETTLEMENT_POLL_SECS", defaults.poll_secs)?,
            batch_size: env_or("SETTLEMENT_BATCH_SIZE", defaults.batch_size)?,
        })
    }

    pub fn delay(&self) -> Duration {
        Duration::seconds(self.delay_secs.max(0))
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_secs.max(1))
    }
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
            settlement: SettlementConfig::from_env()?,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
            settlement: SettlementConfig::from_env()?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got `{raw}`")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_timings() {
        let config = SettlementConfig::default();
        assert_eq!(config.delay(), Duration::seconds(3));
        assert_eq!(config.poll_interval(), std::time::Duration::from_secs(5));
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn poll_interval_never_spins() {
        let config = SettlementConfig {
            poll_secs: 0,
            ..SettlementConfig::default()
        };
        assert_eq!(config.poll_interval(), std::time::Duration::from_secs(1));
    }
}
