//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration lives in a TOML file (default
//! `~/.config/skinlens/<module>.toml`). A missing or unreadable file never
//! terminates startup: a warning is logged and compiled defaults are used.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SKINLENS_ROOT_FOLDER` environment variable
//! 3. TOML config file `root_folder`
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "SKINLENS_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML file
///
/// Every section is optional; absent sections take their compiled defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder for the database and other service data
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider credentials and service endpoints
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Timeouts, fan-out and circuit breaker policy
    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    /// Result cache sizing
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            providers: ProvidersConfig::default(),
            orchestration: OrchestrationConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Provider credentials and endpoints
///
/// A provider whose credential or endpoint is missing is registered but
/// reports itself unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Base URL of the local computer-vision metrics service
    #[serde(default)]
    pub cv_service_url: Option<String>,

    /// Hugging Face inference API key
    #[serde(default)]
    pub huggingface_api_key: Option<String>,

    /// Override for the Hugging Face inference endpoint
    #[serde(default)]
    pub huggingface_base_url: Option<String>,

    /// Gemini API key (clinical-grade model)
    #[serde(default)]
    pub gemini_api_key: Option<String>,

    /// Override for the Gemini endpoint
    #[serde(default)]
    pub gemini_base_url: Option<String>,

    /// Base URL of the enrichment service (lighting simulation, depth estimation)
    #[serde(default)]
    pub enrichment_service_url: Option<String>,
}

/// Orchestration policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Per-provider invocation timeout
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Overall deadline for the provider phase of one request
    #[serde(default = "default_overall_deadline_ms")]
    pub overall_deadline_ms: u64,

    /// Per-enrichment-phase timeout
    #[serde(default = "default_enrichment_timeout_ms")]
    pub enrichment_timeout_ms: u64,

    /// Maximum number of providers invoked concurrently for the clinical tier
    #[serde(default = "default_clinical_fanout")]
    pub clinical_fanout: usize,

    /// Confidence multiplier applied when fewer providers than requested succeeded
    #[serde(default = "default_partial_ensemble_penalty")]
    pub partial_ensemble_penalty: f64,

    /// Consecutive failures that open a provider's circuit
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Rolling window in which consecutive failures are counted
    #[serde(default = "default_breaker_window_ms")]
    pub breaker_window_ms: u64,

    /// How long an open circuit excludes its provider
    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout_ms(),
            overall_deadline_ms: default_overall_deadline_ms(),
            enrichment_timeout_ms: default_enrichment_timeout_ms(),
            clinical_fanout: default_clinical_fanout(),
            partial_ensemble_penalty: default_partial_ensemble_penalty(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_window_ms: default_breaker_window_ms(),
            breaker_cooldown_ms: default_breaker_cooldown_ms(),
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live of a cached analysis
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Time-to-live of a fallback analysis (no provider succeeded)
    #[serde(default = "default_fallback_ttl_seconds")]
    pub fallback_ttl_seconds: u64,

    /// Maximum number of cached analyses before LRU eviction
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Interval of the background expired-entry sweep
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl_seconds(),
            fallback_ttl_seconds: default_fallback_ttl_seconds(),
            capacity: default_cache_capacity(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

fn default_port() -> u16 {
    5740
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    8_000
}

fn default_overall_deadline_ms() -> u64 {
    20_000
}

fn default_enrichment_timeout_ms() -> u64 {
    3_000
}

fn default_clinical_fanout() -> usize {
    3
}

fn default_partial_ensemble_penalty() -> f64 {
    0.85
}

fn default_breaker_failure_threshold() -> u32 {
    3
}

fn default_breaker_window_ms() -> u64 {
    60_000
}

fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

fn default_cache_ttl_seconds() -> u64 {
    300
}

fn default_fallback_ttl_seconds() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    100
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

/// Default config file path for a module: `<config_dir>/skinlens/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("skinlens").join(format!("{}.toml", module_name)))
}

/// Load TOML configuration with graceful degradation
///
/// A missing file yields the compiled defaults with a warning. A file that
/// exists but fails to parse is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
///
/// On Unix the file is restricted to 0600 since it may hold API keys.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    debug!("Wrote configuration to {}", path.display());
    Ok(())
}

/// Resolves the root folder following the documented priority order
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Command-line override (priority 1)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Root folder from the loaded TOML config (priority 3)
    pub fn with_toml_root(mut self, path: Option<PathBuf>) -> Self {
        self.toml_root = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("[{}] Root folder from command line: {}", self.module_name, path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("[{}] Root folder from {}: {}", self.module_name, ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!("[{}] Root folder from TOML config: {}", self.module_name, path.display());
            return path.clone();
        }

        let path = default_root_folder();
        info!("[{}] Root folder from compiled default: {}", self.module_name, path.display());
        path
    }
}

/// Creates the root folder and derives paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder {}", self.root_folder.display());
        }
        Ok(())
    }

    /// Path of the SQLite database holding persisted analysis records
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("skinlens.db")
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("skinlens"))
        .unwrap_or_else(|| PathBuf::from("./skinlens_data"))
}

/// Standard User-Agent for outbound HTTP requests
pub fn get_user_agent() -> String {
    format!("SkinLens/{}", env!("CARGO_PKG_VERSION"))
}
