//! Configuration file loading and management
//!
//! This module handles loading and parsing the daemon configuration from
//! `$XDG_CONFIG_HOME/lectern/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use lectern_pipeline::StageTimeouts;
use lectern_runtime::{PoolConfig, RuntimeConfig, RuntimeSetConfig, TrustThresholds};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Source definitions file (TOML or JSON)
    /// If None, uses XDG_CONFIG_HOME/lectern/sources.toml
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_path: Option<PathBuf>,
    /// Daemon-specific configuration
    pub daemon: DaemonConfig,
    /// Worker pool sizing per runtime role
    pub pools: PoolsConfig,
    /// Trust rating thresholds
    pub policy: TrustThresholds,
    /// Rule pipeline settings
    pub pipeline: PipelineConfig,
    /// Debug session settings
    pub debug: DebugConfig,
    /// Interpreter settings
    pub runtime: RuntimeConfig,
}

/// Daemon server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Bind address for the JSON-RPC server
    /// Default: "127.0.0.1:3131"
    pub bind_address: String,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Seconds running executions get to finish on shutdown
    /// Default: 5
    pub shutdown_grace_secs: u64,
}

/// One pool per runtime role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolsConfig {
    pub search: PoolConfig,
    pub execution: PoolConfig,
    pub debug: PoolConfig,
}

/// Rule pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// User agent sent with every fetch
    pub user_agent: String,
    /// Per-request HTTP timeout in milliseconds
    /// Default: 30000
    pub fetch_timeout_ms: u64,
    /// Wall-clock budget per stage
    pub timeouts: StageTimeouts,
}

/// Debug session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log lines kept per session
    /// Default: 1000
    pub log_capacity: usize,
    /// Sessions idle for longer than this are removed
    /// Default: 1800
    pub idle_expiry_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3131".to_string(),
            log_level: "info".to_string(),
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        let roles = RuntimeSetConfig::default();
        Self {
            search: roles.search,
            execution: roles.execution,
            debug: roles.debug,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: lectern_pipeline::http::DEFAULT_USER_AGENT.to_string(),
            fetch_timeout_ms: 30_000,
            timeouts: StageTimeouts::default(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_capacity: lectern_extension::DEFAULT_LOG_CAPACITY,
            idle_expiry_secs: 1_800,
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    fn project_dirs() -> Result<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "raibid-labs", "lectern")
            .context("Failed to determine project directories")
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/lectern/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    pub fn default_config_content() -> String {
        r#"# Lectern Daemon Configuration
# This file configures the lectern-daemon behavior.

# Source definitions (TOML `[[source]]` tables or a JSON array)
# If not specified, defaults to $XDG_CONFIG_HOME/lectern/sources.toml
# sources_path = "/path/to/sources.toml"

[daemon]
# Bind address for the JSON-RPC debug API
# Default: "127.0.0.1:3131"
bind_address = "127.0.0.1:3131"

# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
# Default: "info"
log_level = "info"

# Seconds running scripts get to finish before shutdown cancels them
shutdown_grace_secs = 5

# Worker pools, one per runtime role. A full queue either rejects the
# execution (overflow = "reject") or runs it on the caller (overflow = "caller_runs").
[pools.search]
core_workers = 2
max_workers = 4
queue_capacity = 32
keep_alive_ms = 30000
overflow = "caller_runs"

[pools.execution]
core_workers = 2
max_workers = 4
queue_capacity = 32
keep_alive_ms = 30000
overflow = "reject"

[pools.debug]
core_workers = 1
max_workers = 2
queue_capacity = 8
keep_alive_ms = 30000
overflow = "reject"

# Trust ratings 1..=trusted_max run trusted, up to compatible_max compatible,
# everything else standard.
[policy]
trusted_max = 2
compatible_max = 4

[pipeline]
user_agent = "Lectern/0.1.0"
fetch_timeout_ms = 30000

# Wall-clock budget per stage, fetch included
[pipeline.timeouts]
search_ms = 15000
item_info_ms = 20000
toc_ms = 30000
content_ms = 45000

[debug]
# Log lines kept per debug session; the oldest are dropped first
log_capacity = 1000

# Idle debug sessions are removed after this many seconds
idle_expiry_secs = 1800

[runtime]
# Allocation cap per interpreter, 0 disables it
memory_limit_bytes = 67108864

# Log lines kept per execution
log_capacity = 1000
"#
        .to_string()
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are valid and within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        self.daemon
            .bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid bind_address: {}", self.daemon.bind_address))?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.daemon.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.daemon.log_level,
                valid_log_levels.join(", ")
            );
        }

        for (role, pool) in self.pool_roles() {
            if pool.core_workers == 0 {
                anyhow::bail!("pools.{}.core_workers must be greater than 0", role);
            }
            if pool.max_workers < pool.core_workers {
                anyhow::bail!("pools.{}.max_workers must be at least core_workers", role);
            }
            if pool.queue_capacity == 0 {
                anyhow::bail!("pools.{}.queue_capacity must be greater than 0", role);
            }
        }

        let timeouts = &self.pipeline.timeouts;
        for (stage, ms) in [
            ("search_ms", timeouts.search_ms),
            ("item_info_ms", timeouts.item_info_ms),
            ("toc_ms", timeouts.toc_ms),
            ("content_ms", timeouts.content_ms),
        ] {
            if ms == 0 {
                anyhow::bail!("pipeline.timeouts.{} must be greater than 0", stage);
            }
        }
        if self.pipeline.fetch_timeout_ms == 0 {
            anyhow::bail!("pipeline.fetch_timeout_ms must be greater than 0");
        }
        if self.pipeline.user_agent.trim().is_empty() {
            anyhow::bail!("pipeline.user_agent must not be empty");
        }

        if self.debug.log_capacity == 0 {
            anyhow::bail!("debug.log_capacity must be greater than 0");
        }
        if self.debug.idle_expiry_secs == 0 {
            anyhow::bail!("debug.idle_expiry_secs must be greater than 0");
        }
        if self.runtime.log_capacity == 0 {
            anyhow::bail!("runtime.log_capacity must be greater than 0");
        }

        Ok(())
    }

    fn pool_roles(&self) -> [(&'static str, &PoolConfig); 3] {
        [
            ("search", &self.pools.search),
            ("execution", &self.pools.execution),
            ("debug", &self.pools.debug),
        ]
    }

    /// Runtime set configuration with each pool named after its role.
    pub fn runtime_set(&self) -> RuntimeSetConfig {
        let named = |pool: &PoolConfig, role: &str| PoolConfig {
            name: role.to_string(),
            ..pool.clone()
        };
        RuntimeSetConfig {
            search: named(&self.pools.search, "search"),
            execution: named(&self.pools.execution, "execution"),
            debug: named(&self.pools.debug, "debug"),
            runtime: self.runtime.clone(),
        }
    }

    /// Get the source definitions path
    ///
    /// Returns the configured path or the default XDG config directory path
    pub fn sources_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.sources_path {
            return Ok(path.clone());
        }
        Ok(Self::project_dirs()?.config_dir().join("sources.toml"))
    }
}
