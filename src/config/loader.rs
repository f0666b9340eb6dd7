//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate. The base file and the environment
//! file are both optional; environment variables always win.

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ConfigResult;
use super::MarketplaceConfig;

pub const ENV_VAR: &str = "TACK_MARKET_ENV";
pub const ENV_PREFIX: &str = "TACK_MARKET";
pub const BASE_FILE: &str = "tack-market";

pub struct ConfigManager {
    config: MarketplaceConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            backend = ?config.database.backend,
            settlement = ?config.ledger.auto_accept_settlement,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration, validating it
    pub fn from_config(config: MarketplaceConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<MarketplaceConfig> {
        let settings = Config::builder()
            .add_source(File::from(config_directory.join(BASE_FILE)).required(false))
            .add_source(File::from(config_directory.join(environment)).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn detect_environment() -> String {
        env::var(ENV_VAR)
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoAcceptSettlement, ConfigurationError};
    use std::fs;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config(), &MarketplaceConfig::default());
        assert_eq!(manager.environment(), "test");
        assert!(!manager.is_production());
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tack-market.toml"),
            r#"
[offers]
default_lifetime_seconds = 120

[lifecycle]
inactivity_window_seconds = 600
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("production.toml"),
            r#"
[offers]
default_lifetime_seconds = 900

[ledger]
auto_accept_settlement = "skip"
"#,
        )
        .unwrap();

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "production",
        )
        .unwrap();
        let config = manager.config();
        assert_eq!(config.offers.default_lifetime_seconds, 900);
        assert_eq!(config.lifecycle.inactivity_window_seconds, 600);
        assert_eq!(config.ledger.auto_accept_settlement, AutoAcceptSettlement::Skip);
        assert_eq!(config.scheduler.workers, 4);
        assert!(manager.is_production());
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tack-market.toml"),
            "[lifecycle]\nexpiry_warning_ratio = 0.0\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }
}
