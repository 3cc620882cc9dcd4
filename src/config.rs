//! Configuration for the content store client

use crate::error::{ClientError, Result};
use crate::pack::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the endpoint
pub const ENV_ENDPOINT: &str = "CONTENT_STORE_ENDPOINT";

/// Environment variable holding the API token
pub const ENV_TOKEN: &str = "CONTENT_STORE_TOKEN";

/// Environment variable overriding the request timeout
pub const ENV_TIMEOUT_SECS: &str = "CONTENT_STORE_TIMEOUT_SECS";

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("content-store")
        .join("config.toml")
}

/// Client configuration
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Service base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// API token sent as a bearer credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Leaf chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum links per file node
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Maximum size of one uploaded CAR
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// CAR uploads in flight at once
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
}

fn default_endpoint() -> String {
    "https://api.web3.storage".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_links() -> usize {
    DEFAULT_MAX_LINKS
}

fn default_max_chunk_size() -> usize {
    10 * 1024 * 1024
}

fn default_max_concurrent_uploads() -> usize {
    3
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            timeout_secs: default_timeout_secs(),
            chunk_size: default_chunk_size(),
            max_links: default_max_links(),
            max_chunk_size: default_max_chunk_size(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("chunk_size", &self.chunk_size)
            .field("max_links", &self.max_links)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("max_concurrent_uploads", &self.max_concurrent_uploads)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Drop the saved token and return to the default endpoint
    pub fn forget_credentials(&mut self) {
        self.token = None;
        self.endpoint = default_endpoint();
    }

    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load config from file, or defaults if the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// Override fields from `CONTENT_STORE_*` variables
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(endpoint) = get(ENV_ENDPOINT).filter(|v| !v.is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(token) = get(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.token = Some(token);
        }
        if let Some(timeout) = get(ENV_TIMEOUT_SECS).filter(|v| !v.is_empty()) {
            self.timeout_secs = timeout
                .parse()
                .map_err(|_| ClientError::Config(format!("{} must be an integer: {:?}", ENV_TIMEOUT_SECS, timeout)))?;
        }
        Ok(self)
    }

    /// Check limits and the endpoint URL
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.endpoint)
            .map_err(|e| ClientError::Config(format!("invalid endpoint {:?}: {}", self.endpoint, e)))?;
        if self.timeout_secs == 0 {
            return Err(ClientError::Config("timeout_secs must be positive".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(ClientError::Config("chunk_size must be positive".to_string()));
        }
        if self.max_links < 2 {
            return Err(ClientError::Config("max_links must be at least 2".to_string()));
        }
        if self.max_chunk_size == 0 {
            return Err(ClientError::Config("max_chunk_size must be positive".to_string()));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(ClientError::Config(
                "max_concurrent_uploads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Endpoint without a trailing slash
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}
