//! Connection Configuration
//!
//! Loads the connection config for ocitables from a YAML or JSON file.

use crate::oci::regions::is_valid_ocid;
use crate::oci::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_MIN_DELAY};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of matrix items fetched concurrently
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// How requests are authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    ApiKey,
    SecurityToken,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Regions to query; glob patterns such as `us-*` or `*` are allowed
    pub regions: Vec<String>,
    pub tenancy_ocid: Option<String>,
    pub user_ocid: Option<String>,
    pub fingerprint: Option<String>,
    /// Inline PEM private key
    pub private_key: Option<String>,
    pub private_key_path: Option<String>,
    pub private_key_password: Option<String>,
    /// OCI CLI config file (default `~/.oci/config`)
    pub config_path: Option<String>,
    pub config_file_profile: Option<String>,
    pub auth: AuthType,
    pub max_error_retry_attempts: Option<u32>,
    /// Milliseconds
    pub min_error_retry_delay: Option<u64>,
    /// Service error codes (or HTTP statuses) that skip a region/compartment
    /// instead of failing the query
    pub ignore_error_codes: Vec<String>,
    pub max_concurrency: Option<usize>,
    /// Base URL replacing every service endpoint (private endpoints, tests)
    pub endpoint_override: Option<String>,
}

impl ConnectionConfig {
    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ocitables").join("connection.yaml"))
    }

    /// Parse config content; JSON is valid YAML so one parser serves both
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content).context("Failed to parse connection config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location. A missing default
    /// file yields the default config; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                bail!("Connection config {} does not exist", path.display());
            }
            tracing::debug!("No connection config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read connection config {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("tenancy_ocid", &self.tenancy_ocid), ("user_ocid", &self.user_ocid)] {
            if let Some(ocid) = value {
                if !is_valid_ocid(ocid) {
                    bail!("{} is not a valid OCID: {}", name, ocid);
                }
            }
        }
        if self.max_error_retry_attempts == Some(0) {
            bail!("max_error_retry_attempts must be at least 1");
        }
        if self.max_concurrency == Some(0) {
            bail!("max_concurrency must be at least 1");
        }
        for pattern in &self.regions {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid region pattern: {}", pattern))?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_error_retry_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            self.min_error_retry_delay
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MIN_DELAY),
        )
    }

    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY)
    }
}
