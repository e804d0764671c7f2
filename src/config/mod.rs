//! Server configuration loading
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default per-file upload ceiling: 10 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default upper bound of the `limit` pagination parameter
pub const DEFAULT_MAX_LIMIT: i64 = 100;

/// Complete configuration for a server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub upload: UploadConfig,
    pub pagination: PaginationConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
}

/// Multipart intake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Where uploaded files are staged; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,

    /// Maximum size of a single uploaded file, in bytes
    pub max_file_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl UploadConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub max_limit: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }
}

/// Allowed CORS origins; empty means any origin
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Names of the headers the authorization step reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub credential_header: String,
    pub impersonation_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_header: "authorization".to_string(),
            impersonation_header: "x-impersonate".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path))?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pagination.max_limit < 1 {
            anyhow::bail!("pagination.max_limit must be at least 1");
        }
        if self.upload.max_file_size == 0 {
            anyhow::bail!("upload.max_file_size must be positive");
        }
        for header in [&self.auth.credential_header, &self.auth.impersonation_header] {
            axum::http::HeaderName::try_from(header.as_str())
                .with_context(|| format!("invalid header name '{}'", header))?;
        }
        Ok(())
    }
}
