//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration management for the digest pipeline, supporting
//! TOML files with environment variable overrides, validation, and
//! type-safe access to all system settings.
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (highest priority)
//! 2. Configuration file
//! 3. Default values (lowest priority)
//!
//! ## Usage
//! ```rust,no_run
//! use paper_digest::config::Config;
//!
//! # fn main() -> paper_digest::Result<()> {
//! let config = Config::from_file("config.toml")?;
//! println!("Server port: {}", config.server.port);
//! # Ok(())
//! # }
//! ```

use crate::errors::{DigestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server and API configuration
    pub server: ServerConfig,
    /// Topic keywords driving the filter stage
    pub keywords: Vec<KeywordConfig>,
    /// Feed sources to poll
    pub feeds: FeedsConfig,
    /// Backend configuration per pipeline role
    pub backends: BackendsConfig,
    /// Persistent store settings
    pub store: StoreConfig,
    /// Pipeline behavior
    pub pipeline: PipelineConfig,
    /// Report output settings
    pub report: ReportConfig,
    /// Logging and monitoring
    pub logging: LoggingConfig,
}

/// Server and API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Enable CORS for web frontends
    pub enable_cors: bool,
}

/// One topic keyword with its description for the filter backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Keyword name, used as the report group key
    pub name: String,
    /// Free-text description of the topic
    #[serde(default)]
    pub description: String,
    /// Example paper titles illustrating the topic
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Feed polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// Only accept records published within this many days
    pub fetch_window_days: u32,
    /// Configured feed sources
    pub sources: Vec<FeedConfig>,
}

/// A single RSS/Atom feed source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Display name (e.g. "Nature Medicine")
    pub name: String,
    /// Stable key used in identity fallbacks (e.g. "nature_medicine")
    pub key: String,
    /// Feed URL
    pub url: String,
    /// Source type of records from this feed
    pub kind: crate::SourceKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum entries to take per poll
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

/// Backend configuration for the three pipeline roles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub filter: BackendConfig,
    pub analysis: BackendConfig,
    pub narrative: BackendConfig,
}

/// Capability variant of a backend, selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendCapability {
    /// Works from title + abstract only
    TextOnly,
    /// Retrieves and inspects the full document content
    ContentCapable,
}

/// Configuration for a single backend, including its gateway limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,
    /// API key (usually injected via environment)
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Capability variant
    pub capability: BackendCapability,
    /// Maximum concurrent in-flight calls
    pub max_concurrent: usize,
    /// Request ceiling per rolling 60-second window (0 = unlimited)
    pub requests_per_minute: u32,
    /// Per-call timeout in seconds
    pub timeout_seconds: u64,
    /// Retry policy for transient failures
    pub retry: RetryConfig,
}

/// Retry policy parameters, injected into the gateway as an explicit value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Maximum random jitter added to each backoff, in milliseconds
    pub jitter_ms: u64,
}

/// Persistent store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database directory
    pub db_path: PathBuf,
    /// History retention window in days; entries older than this are pruned
    pub retention_days: u32,
    /// Compress persisted reports
    pub enable_compression: bool,
}

/// Pipeline behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Optional run deadline in seconds. When exceeded, no new backend work
    /// is admitted; in-flight calls complete and a partial report is built.
    pub run_deadline_seconds: Option<u64>,
    /// Cap on content bytes forwarded to a content-capable backend
    pub max_content_chars: usize,
}

/// Report output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Summary text used for keyword groups with no papers
    pub placeholder_summary: String,
    /// Directory for rendered Markdown reports (None = skip rendering)
    pub markdown_dir: Option<PathBuf>,
}

/// Logging and monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_items() -> usize {
    50
}

impl Config {
    /// Load configuration from a specific file, falling back to defaults
    /// when the file does not exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| DigestError::Config {
                message: format!("Failed to read config file {:?}: {}", path, e),
            })?;
            toml::from_str(&content)?
        } else {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("PAPER_DIGEST_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PAPER_DIGEST_PORT") {
            self.server.port = port.parse().map_err(|_| DigestError::Config {
                message: "Invalid port number in PAPER_DIGEST_PORT".to_string(),
            })?;
        }
        if let Ok(db_path) = std::env::var("PAPER_DIGEST_DB_PATH") {
            self.store.db_path = PathBuf::from(db_path);
        }
        if let Ok(key) = std::env::var("PAPER_DIGEST_FILTER_API_KEY") {
            self.backends.filter.api_key = key;
        }
        if let Ok(key) = std::env::var("PAPER_DIGEST_ANALYSIS_API_KEY") {
            self.backends.analysis.api_key = key;
        }
        if let Ok(key) = std::env::var("PAPER_DIGEST_NARRATIVE_API_KEY") {
            self.backends.narrative.api_key = key;
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(DigestError::ValidationFailed {
                field: "server.port".to_string(),
                reason: "Port cannot be zero".to_string(),
            });
        }

        if self.store.retention_days == 0 {
            return Err(DigestError::ValidationFailed {
                field: "store.retention_days".to_string(),
                reason: "Retention window must be at least one day".to_string(),
            });
        }

        for (role, backend) in [
            ("filter", &self.backends.filter),
            ("analysis", &self.backends.analysis),
            ("narrative", &self.backends.narrative),
        ] {
            if backend.max_concurrent == 0 {
                return Err(DigestError::ValidationFailed {
                    field: format!("backends.{}.max_concurrent", role),
                    reason: "Concurrency bound must be at least 1".to_string(),
                });
            }
            if backend.retry.max_attempts == 0 {
                return Err(DigestError::ValidationFailed {
                    field: format!("backends.{}.retry.max_attempts", role),
                    reason: "At least one attempt is required".to_string(),
                });
            }
            if backend.timeout_seconds == 0 {
                return Err(DigestError::ValidationFailed {
                    field: format!("backends.{}.timeout_seconds", role),
                    reason: "Timeout must be non-zero".to_string(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for kw in &self.keywords {
            if kw.name.trim().is_empty() {
                return Err(DigestError::ValidationFailed {
                    field: "keywords".to_string(),
                    reason: "Keyword name cannot be empty".to_string(),
                });
            }
            if !seen.insert(kw.name.clone()) {
                return Err(DigestError::ValidationFailed {
                    field: "keywords".to_string(),
                    reason: format!("Duplicate keyword: {}", kw.name),
                });
            }
        }

        Ok(())
    }

    /// Names of all configured keywords, in configuration order
    pub fn keyword_names(&self) -> Vec<String> {
        self.keywords.iter().map(|k| k.name.clone()).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            keywords: Vec::new(),
            feeds: FeedsConfig::default(),
            backends: BackendsConfig::default(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            fetch_window_days: 7,
            sources: Vec::new(),
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            filter: BackendConfig {
                model: "gpt-4o-mini".to_string(),
                max_concurrent: 5,
                requests_per_minute: 60,
                ..BackendConfig::default()
            },
            analysis: BackendConfig {
                model: "gemini-2.0-flash".to_string(),
                capability: BackendCapability::ContentCapable,
                max_concurrent: 2,
                requests_per_minute: 10,
                timeout_seconds: 120,
                ..BackendConfig::default()
            },
            narrative: BackendConfig {
                model: "gpt-4o".to_string(),
                max_concurrent: 2,
                requests_per_minute: 20,
                ..BackendConfig::default()
            },
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            capability: BackendCapability::TextOnly,
            max_concurrent: 4,
            requests_per_minute: 30,
            timeout_seconds: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter_ms: 1_000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/paper_digest.db"),
            retention_days: 30,
            enable_compression: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_deadline_seconds: None,
            max_content_chars: 60_000,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            placeholder_summary: "No new papers in this area today.".to_string(),
            markdown_dir: Some(PathBuf::from("./reports")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}
