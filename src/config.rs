//! Configuration management for rormatch
//!
//! Configuration is read from `./config/rormatch.toml` (or the path given with
//! `--config`). When no file exists the embedded template is used as-is, so the
//! template is the single place defaults live.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/rormatch.toml";

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = include_str!("../config/rormatch.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid URL in '{field}': {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Invalid address in '{field}': {address} (expected ip:port format)")]
    InvalidAddress { field: String, address: String },

    #[error("Query template '{field}' must contain {placeholder}: {template}")]
    InvalidTemplate {
        field: String,
        placeholder: String,
        template: String,
    },

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub registry: RegistryConfig,
    pub funder: FunderConfig,
    pub dns: DnsConfig,
    pub whois: WhoisConfig,
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub suffixes: SuffixConfig,
}

/// HTTP client configuration shared by the registry and funder clients
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_delay_ms: u64,
    pub backoff_max_delay_ms: u64,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Research organization registry endpoint and query templates
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    pub country_query_template: String,
    pub generic_query_template: String,
}

/// Funder metadata endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FunderConfig {
    pub base_url: String,
}

/// DNS resolution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    pub timeout_secs: u64,
    #[serde(default = "default_dns_attempts")]
    pub attempts: usize,
    /// Upstream servers; the system resolver is used when empty
    #[serde(default)]
    pub servers: Vec<DnsServerConfig>,
}

fn default_dns_attempts() -> usize {
    2
}

/// Traditional DNS server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DnsServerConfig {
    pub name: String,
    pub address: String,
}

/// WHOIS lookup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WhoisConfig {
    pub timeout_secs: u64,
    #[serde(default)]
    pub system_fallback: bool,
    /// TLD -> WHOIS server host
    #[serde(default)]
    pub servers: BTreeMap<String, String>,
}

impl WhoisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Candidate evaluation concurrency and per-service request rates
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub concurrency: usize,
    /// Requests per second, 0 = unlimited
    pub dns_queries_per_second: u32,
    pub whois_queries_per_second: u32,
    pub http_requests_per_second: u32,
}

/// Public suffix data sources
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuffixConfig {
    /// PSL-format file replacing the bundled Public Suffix List
    pub public_suffix_list: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded default configuration
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Explicit path if given (must exist), else the default path if present, else the embedded template
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None if Path::new(CONFIG_PATH).exists() => Self::load(),
            None => Self::embedded(),
        }
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.user_agent.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "http.user_agent".to_string(),
            });
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "http.request_timeout_secs".to_string(),
            });
        }

        validate_url("registry.base_url", &self.registry.base_url)?;
        validate_url("funder.base_url", &self.funder.base_url)?;

        validate_template(
            "registry.country_query_template",
            &self.registry.country_query_template,
            &["{variant}", "{country}"],
        )?;
        validate_template(
            "registry.generic_query_template",
            &self.registry.generic_query_template,
            &["{variant}"],
        )?;

        if self.dns.timeout_secs == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "dns.timeout_secs".to_string(),
            });
        }

        // Basic ip:port check
        for (i, server) in self.dns.servers.iter().enumerate() {
            if server.address.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::InvalidAddress {
                    field: format!("dns.servers[{}].address", i),
                    address: server.address.clone(),
                });
            }
        }

        if self.whois.timeout_secs == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "whois.timeout_secs".to_string(),
            });
        }
        for (tld, server) in &self.whois.servers {
            if server.trim().is_empty() {
                return Err(ConfigError::EmptyRequired {
                    field: format!("whois.servers.{}", tld),
                });
            }
        }

        if self.analysis.concurrency == 0 {
            return Err(ConfigError::EmptyRequired {
                field: "analysis.concurrency".to_string(),
            });
        }

        Ok(())
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        Self::create_default_config_at(Path::new(CONFIG_PATH))
    }

    pub fn create_default_config_at(path: &Path) -> Result<PathBuf, ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field: field.to_string(),
            url: value.to_string(),
        }),
    }
}

fn validate_template(field: &str, template: &str, placeholders: &[&str]) -> Result<(), ConfigError> {
    for placeholder in placeholders {
        if !template.contains(placeholder) {
            return Err(ConfigError::InvalidTemplate {
                field: field.to_string(),
                placeholder: placeholder.to_string(),
                template: template.to_string(),
            });
        }
    }
    Ok(())
}
