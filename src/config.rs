use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Maximum messages the worker takes from the queue per wake (0 = all)
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Cancel the in-flight sink write on an immediate stop
    #[serde(default)]
    pub abort_in_flight: bool,
}

fn default_max_batch() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            abort_in_flight: false,
        }
    }
}

/// Where persisted messages go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Console,
    Jsonl,
    Memory,
}

impl std::str::FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(SinkKind::Console),
            "jsonl" => Ok(SinkKind::Jsonl),
            "memory" => Ok(SinkKind::Memory),
            other => Err(format!("unknown sink kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    /// Output file for the `jsonl` sink
    #[serde(default = "default_sink_path")]
    pub path: PathBuf,
}

fn default_sink_path() -> PathBuf {
    PathBuf::from("data/messages.jsonl")
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            path: default_sink_path(),
        }
    }
}

/// One simulated message bus
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FeedConfig {
    /// Bus name, embedded in each message description
    pub name: String,
    /// Number of messages the feed emits before finishing
    pub messages: u32,
    /// Base inter-arrival interval; each delay is 1..10 times this
    pub interval_ms: u64,
    /// RNG seed; omitted = seeded from entropy
    #[serde(default)]
    pub seed: Option<u64>,
}

impl FeedConfig {
    pub fn new(name: &str, messages: u32, interval_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            messages,
            interval_ms,
            seed: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Feeds and timings for the demo scenarios
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Feeds used by the graceful-stop scenario
    pub graceful_feeds: Vec<FeedConfig>,
    /// Delay before `stop()` in the graceful scenario
    pub graceful_stop_after_ms: u64,
    /// How long feeds keep running after the graceful stop
    pub graceful_linger_ms: u64,
    /// Feeds used by the immediate-stop scenario
    pub immediate_feeds: Vec<FeedConfig>,
    /// Delay before `stop_immediately()` in the immediate scenario
    pub immediate_stop_after_ms: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            graceful_feeds: vec![FeedConfig::new("SOLACE.MESSAGEBUS.ONE", 10, 100)],
            graceful_stop_after_ms: 3000,
            graceful_linger_ms: 3000,
            immediate_feeds: vec![
                FeedConfig::new("SOLACE.MESSAGEBUS.ONE.SLOW", 30, 500),
                FeedConfig::new("SOLACE.MESSAGEBUS.ONE.HIGH", 100, 10),
                FeedConfig::new("SOLACE.MESSAGEBUS.ONE.MEDIUM", 79, 30),
            ],
            immediate_stop_after_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; unset = console only
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("engine.max_batch", 64)?
            .set_default("engine.abort_in_flight", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PERSISTER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PERSISTER__ENGINE__MAX_BATCH, etc.)
            .add_source(
                Environment::with_prefix("PERSISTER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config() -> Self {
        Self {
            engine: EngineConfig::default(),
            sink: SinkConfig::default(),
            scenario: ScenarioConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let feeds = self
            .scenario
            .graceful_feeds
            .iter()
            .chain(self.scenario.immediate_feeds.iter());
        for feed in feeds {
            if feed.name.trim().is_empty() {
                errors.push("feed name must not be empty".to_string());
            }
            if feed.interval_ms == 0 {
                errors.push(format!("feed {} interval_ms must be positive", feed.name));
            }
        }

        if self.scenario.graceful_feeds.is_empty() {
            errors.push("graceful scenario needs at least one feed".to_string());
        }
        if self.scenario.immediate_feeds.is_empty() {
            errors.push("immediate scenario needs at least one feed".to_string());
        }

        if self.sink.kind == SinkKind::Jsonl && self.sink.path.as_os_str().is_empty() {
            errors.push("jsonl sink requires a path".to_string());
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
            errors.push(format!("unknown log level: {}", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
