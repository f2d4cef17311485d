use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub reaper: ReaperSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Optional database URL. If not provided, defaults to a per-user path
    pub url: Option<String>,
    /// Maximum number of database connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReaperSettings {
    /// Live-disconnect grace in seconds before in-flight work is released
    pub grace_seconds: u64,
    /// Startup orphan-scan grace in seconds
    pub startup_grace_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl Config {
    /// Load configuration from environment variables and config files
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Start with default configuration
        builder = builder.add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        // Add config file if specified
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(
                File::with_name(&config_file)
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        // Add environment variable overrides with DISPATCH_ prefix
        builder = builder.add_source(
            Environment::with_prefix("DISPATCH")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Standard variables used by deployments without the DISPATCH_ prefix
        Self::apply_standard_env_vars(&mut result)?;

        Ok(result)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("DISPATCH")
                    .separator("_")
                    .try_parsing(true),
            );

        let config = builder
            .build()
            .context("Failed to build configuration from file")?;

        let mut result: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration from file")?;

        Self::apply_standard_env_vars(&mut result)?;

        Ok(result)
    }

    /// Apply the standard environment variables: DATABASE_URL, LOG_LEVEL,
    /// REAPER_GRACE_SECONDS, STARTUP_REAPER_GRACE_SECONDS.
    fn apply_standard_env_vars(config: &mut Config) -> Result<()> {
        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database.url = Some(database_url);
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }

        if let Ok(grace) = env::var("REAPER_GRACE_SECONDS") {
            config.reaper.grace_seconds = grace
                .parse()
                .context("REAPER_GRACE_SECONDS must be a whole number of seconds")?;
        }

        if let Ok(grace) = env::var("STARTUP_REAPER_GRACE_SECONDS") {
            config.reaper.startup_grace_seconds = grace
                .parse()
                .context("STARTUP_REAPER_GRACE_SECONDS must be a whole number of seconds")?;
        }

        Ok(())
    }

    /// Get the database URL with a per-user default fallback
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => Self::default_database_url(),
        }
    }

    /// Get the default database URL
    pub fn default_database_url() -> String {
        // Use XDG_DATA_HOME if available (better for containers/production)
        if let Ok(xdg_data) = env::var("XDG_DATA_HOME") {
            return format!("sqlite://{xdg_data}/dispatchd/dispatch.sqlite");
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        format!("sqlite://{home}/dispatch.sqlite")
    }

    /// Reaper grace periods as durations
    pub fn reaper_config(&self) -> scheduler::ReaperConfig {
        scheduler::ReaperConfig {
            grace: Duration::from_secs(self.reaper.grace_seconds),
            startup_grace: Duration::from_secs(self.reaper.startup_grace_seconds),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ));
            }
        }

        let database_url = self.database_url();
        if !database_url.starts_with("sqlite://") && !database_url.contains(":memory:") {
            return Err(anyhow::anyhow!(
                "Only SQLite databases are supported. URL must start with 'sqlite://'. Got: {}",
                database_url
            ));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!(
                "Database max_connections must be greater than 0"
            ));
        }

        if self.reaper.grace_seconds == 0 {
            return Err(anyhow::anyhow!(
                "Reaper grace_seconds must be greater than 0; released work needs a window to reconnect"
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                connection_timeout: 30,
            },
            reaper: ReaperSettings {
                grace_seconds: 300,
                startup_grace_seconds: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
