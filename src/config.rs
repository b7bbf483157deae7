use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Manages config directory and config file operations
#[derive(Clone)]
pub struct ConfigManager {
    pub(crate) config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a ConfigManager with a custom config directory (primarily for testing)
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Create a new ConfigManager for the given app name
    pub fn new(app_name: &str) -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine config directory"))?
            .join(app_name);

        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get path to a specific config file within the config directory
    pub fn config_path(&self, path: &str) -> PathBuf {
        self.config_dir.join(path)
    }

    pub fn ensure_config_dir(&self) -> Result<()> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;
        }
        Ok(())
    }

    /// Generate default configuration template as a string
    pub fn generate_default_config(&self) -> String {
        DEFAULT_CONFIG_TEMPLATE.to_string()
    }

    /// Write default configuration to config file
    pub fn write_default_config(&self, force: bool) -> Result<PathBuf> {
        let config_path = self.config_path("config.toml");

        if config_path.exists() && !force {
            return Err(eyre!(
                "Config file already exists at {}. Use --force to overwrite.",
                config_path.display()
            ));
        }

        self.ensure_config_dir()?;
        std::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE)?;

        Ok(config_path)
    }

    /// Read `config.toml` from this directory, or defaults if there is none.
    pub fn load_config(&self) -> Result<AppConfig> {
        let config_path = self.config_path("config.toml");

        if !config_path.exists() {
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            eyre!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            )
        })?;

        toml::from_str(&content).map_err(|e| {
            eyre!(
                "Failed to parse config file at {}: {}",
                config_path.display(),
                e
            )
        })
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration format version (for future compatibility)
    pub version: String,
    pub worker: WorkerConfig,
    pub sort: SortConfig,
    pub source: SourceConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub thread_name: String,
    pub progressive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub retry_failed_ranks: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub group_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window: usize,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.1".to_string(),
            worker: WorkerConfig::default(),
            sort: SortConfig::default(),
            source: SourceConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_name: "framecache-worker".to_string(),
            progressive: false,
        }
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            retry_failed_ranks: true,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { group_rows: 65536 }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window: 20,
            poll_interval_ms: 25,
            timeout_ms: 30_000,
        }
    }
}

// Configuration loading and merging
impl AppConfig {
    /// Load configuration from all layers (default → user)
    pub fn load(app_name: &str) -> Result<Self> {
        let manager = ConfigManager::new(app_name)?;
        Self::load_from(&manager)
    }

    /// Same as [`AppConfig::load`] with an explicit config directory.
    pub fn load_from(manager: &ConfigManager) -> Result<Self> {
        let mut config = AppConfig::default();
        config.merge(manager.load_config()?);
        config.validate()?;
        Ok(config)
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: AppConfig) {
        if other.version != AppConfig::default().version {
            self.version = other.version;
        }

        self.worker.merge(other.worker);
        self.sort.merge(other.sort);
        self.source.merge(other.source);
        self.display.merge(other.display);
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("0.1") {
            return Err(eyre!(
                "Unsupported config version: {}. Expected 0.1.x",
                self.version
            ));
        }

        if self.worker.thread_name.trim().is_empty() {
            return Err(eyre!("worker.thread_name must not be empty"));
        }

        if self.source.group_rows == 0 {
            return Err(eyre!("source.group_rows must be greater than 0"));
        }

        if self.display.poll_interval_ms == 0 {
            return Err(eyre!("display.poll_interval_ms must be greater than 0"));
        }

        if self.display.timeout_ms < self.display.poll_interval_ms {
            return Err(eyre!(
                "display.timeout_ms ({}) must be at least display.poll_interval_ms ({})",
                self.display.timeout_ms,
                self.display.poll_interval_ms
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.display.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.display.timeout_ms)
    }
}

// Merge implementations for each config section
impl WorkerConfig {
    pub fn merge(&mut self, other: Self) {
        let default = WorkerConfig::default();
        if other.thread_name != default.thread_name {
            self.thread_name = other.thread_name;
        }
        if other.progressive != default.progressive {
            self.progressive = other.progressive;
        }
    }
}

impl SortConfig {
    pub fn merge(&mut self, other: Self) {
        let default = SortConfig::default();
        if other.retry_failed_ranks != default.retry_failed_ranks {
            self.retry_failed_ranks = other.retry_failed_ranks;
        }
    }
}

impl SourceConfig {
    pub fn merge(&mut self, other: Self) {
        let default = SourceConfig::default();
        if other.group_rows != default.group_rows {
            self.group_rows = other.group_rows;
        }
    }
}

impl DisplayConfig {
    pub fn merge(&mut self, other: Self) {
        let default = DisplayConfig::default();
        if other.window != default.window {
            self.window = other.window;
        }
        if other.poll_interval_ms != default.poll_interval_ms {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.timeout_ms != default.timeout_ms {
            self.timeout_ms = other.timeout_ms;
        }
    }
}

/// Behaviour knobs for a [`crate::RowGroupFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOptions {
    pub worker_name: String,
    pub progressive: bool,
    pub retry_failed_ranks: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FrameOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker_name: config.worker.thread_name.clone(),
            progressive: config.worker.progressive,
            retry_failed_ranks: config.sort.retry_failed_ranks,
        }
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../config/default.toml");
