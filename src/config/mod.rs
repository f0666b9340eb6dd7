//! # Tack Market Configuration
//!
//! Layered configuration loaded by [`ConfigManager`]:
//!
//! 1. Built-in defaults (the `Default` impls below)
//! 2. `config/tack-market.toml`
//! 3. `config/<environment>.toml`
//! 4. Environment variables `TACK_MARKET__<SECTION>__<KEY>`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tack_market::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let lifetime = manager.config().offers.default_lifetime_seconds;
//! # let _ = lifetime;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Where marketplace state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    /// Connection URL, falls back to `DATABASE_URL`
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Upper bound on any tack or offer price, in minor units
    pub max_price: i64,
    /// CREATED tacks untouched for this long are swept
    pub inactivity_window_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: usize,
    /// Fraction of the estimate after which the runner is warned
    pub expiry_warning_ratio: f64,
    /// Re-plans after a version conflict with an unrelated writer
    pub conflict_retries: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_price: 100_000_000,
            inactivity_window_seconds: 48 * 60 * 60,
            sweep_interval_seconds: 300,
            sweep_batch_size: 100,
            expiry_warning_ratio: 0.9,
            conflict_retries: 3,
        }
    }
}

impl LifecycleConfig {
    pub fn inactivity_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.inactivity_window_seconds).unwrap_or(i64::MAX))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferConfig {
    pub default_lifetime_seconds: i64,
    pub max_lifetime_seconds: i64,
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            default_lifetime_seconds: 3600,
            max_lifetime_seconds: 7 * 24 * 60 * 60,
        }
    }
}

/// How an auto-accepted tack settles, since nothing is escrowed at acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutoAcceptSettlement {
    /// Debit the tacker and credit the runner when the tack finishes
    #[default]
    TransferOnFinish,
    /// Settle outside the ledger; the tack is only marked paid
    Skip,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub auto_accept_settlement: AutoAcceptSettlement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-delivery timeout
    pub timeout_ms: u64,
    pub broadcast_capacity: usize,
    pub push_enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            broadcast_capacity: 1024,
            push_enabled: true,
        }
    }
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            retry_backoff_ms: 500,
            queue_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Linear backoff before the given retry attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub database: DatabaseConfig,
    pub lifecycle: LifecycleConfig,
    pub offers: OfferConfig,
    pub ledger: LedgerConfig,
    pub notifications: NotificationConfig,
    pub scheduler: SchedulerConfig,
}

impl MarketplaceConfig {
    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.backend == StoreBackend::Postgres && self.database.database_url().is_none()
        {
            return Err(ConfigurationError::missing_required_field(
                "database.url",
                "postgres backend (or set DATABASE_URL)",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                0,
                "pool size must be greater than 0",
            ));
        }

        if self.lifecycle.max_price <= 0 {
            return Err(ConfigurationError::invalid_value(
                "lifecycle.max_price",
                self.lifecycle.max_price,
                "must be positive",
            ));
        }

        let ratio = self.lifecycle.expiry_warning_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "lifecycle.expiry_warning_ratio",
                ratio,
                "must be in (0, 1]",
            ));
        }

        if self.lifecycle.sweep_interval_seconds == 0 || self.lifecycle.sweep_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "lifecycle.sweep_interval_seconds",
                self.lifecycle.sweep_interval_seconds,
                "sweep interval and batch size must be greater than 0",
            ));
        }

        if self.offers.default_lifetime_seconds <= 0
            || self.offers.default_lifetime_seconds > self.offers.max_lifetime_seconds
        {
            return Err(ConfigurationError::invalid_value(
                "offers.default_lifetime_seconds",
                self.offers.default_lifetime_seconds,
                "must be positive and not exceed offers.max_lifetime_seconds",
            ));
        }

        if self.notifications.broadcast_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "notifications.broadcast_capacity",
                0,
                "must be greater than 0",
            ));
        }

        if self.scheduler.workers == 0 || self.scheduler.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.workers",
                self.scheduler.workers,
                "workers and max_attempts must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MarketplaceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.offers.default_lifetime_seconds, 3600);
        assert_eq!(config.lifecycle.inactivity_window(), chrono::Duration::hours(48));
        assert_eq!(
            config.ledger.auto_accept_settlement,
            AutoAcceptSettlement::TransferOnFinish
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = MarketplaceConfig::default();
        config.lifecycle.expiry_warning_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));

        let mut config = MarketplaceConfig::default();
        config.offers.default_lifetime_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = MarketplaceConfig::default();
        config.database.backend = StoreBackend::Postgres;
        config.database.url = Some("postgresql://localhost/tack_market".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheduler_backoff() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.backoff_for(2), Duration::from_millis(1000));
    }
}
