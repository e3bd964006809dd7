//! Configuration management for the Commvault exporter.
//!
//! Supports loading configuration from:
//! - TOML configuration files
//! - Environment variables (with `COMMVAULT_EXPORTER_` prefix)
//!
//! Unlike a single-backend exporter, configuration here is a map of named
//! targets; each probe request selects one target by name.

use crate::error::{CvError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Connection settings for one Commvault backend ("target").
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the CommServe REST API (e.g., "https://cs.example.com/webconsole/api")
    pub api_url: String,

    /// API username
    #[serde(default)]
    pub username: String,

    /// API password (sent base64-encoded on login)
    #[serde(default)]
    pub password: String,

    /// Verify TLS certificates (set to false for self-signed certs)
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum number of finished jobs requested per probe
    #[serde(default = "default_job_history_limit")]
    pub job_history_limit: u64,

    /// Reported Commvault version, exposed as an info label
    #[serde(default = "default_version")]
    pub version: String,

    /// CommServe display name, exposed as an info label (defaults to the target name)
    #[serde(default)]
    pub commserve_name: Option<String>,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("verify_tls", &self.verify_tls)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("job_history_limit", &self.job_history_limit)
            .field("version", &self.version)
            .field("commserve_name", &self.commserve_name)
            .finish()
    }
}

/// Exporter specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Address to listen on for the probe endpoint
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Main configuration structure for the Commvault exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Named Commvault targets available for probing
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,

    /// Exporter server configuration
    #[serde(default = "default_exporter")]
    pub exporter: ExporterConfig,
}

fn default_verify_tls() -> bool {
    false
}

fn default_timeout() -> u64 {
    30
}

fn default_job_history_limit() -> u64 {
    1000
}

fn default_version() -> String {
    "unknown".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:9657".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_exporter() -> ExporterConfig {
    ExporterConfig {
        listen_address: default_listen_address(),
        log_level: default_log_level(),
    }
}

impl Settings {
    /// Load configuration from a file and environment variables.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to configuration file
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use commvault_exporter::config::Settings;
    ///
    /// let settings = Settings::load(Some("config/default.toml")).unwrap();
    /// ```
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Add config file if provided
        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        // Add environment variables with COMMVAULT_EXPORTER_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("COMMVAULT_EXPORTER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings.
    fn validate(&self) -> Result<()> {
        for (name, target) in &self.targets {
            if target.api_url.is_empty() {
                return Err(CvError::Config(config::ConfigError::Message(format!(
                    "target '{}': api_url cannot be empty",
                    name
                ))));
            }
            if target.username.is_empty() || target.password.is_empty() {
                return Err(CvError::Config(config::ConfigError::Message(format!(
                    "target '{}': username and password are required",
                    name
                ))));
            }
        }

        Ok(())
    }

    /// Look up a single target's configuration by name.
    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.get(name)
    }

    /// Look up a target, failing with [`CvError::UnknownTarget`] when absent.
    pub fn require_target(&self, name: &str) -> Result<&TargetConfig> {
        self.targets
            .get(name)
            .ok_or_else(|| CvError::UnknownTarget(name.to_string()))
    }
}

impl TargetConfig {
    /// CommServe display name for the info metric, falling back to the target name.
    pub fn commserve_name_or<'a>(&'a self, target_name: &'a str) -> &'a str {
        self.commserve_name.as_deref().unwrap_or(target_name)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            targets: HashMap::new(),
            exporter: default_exporter(),
        }
    }
}
