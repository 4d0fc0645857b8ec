//! Scenario configuration.
//!
//! Loaded from a TOML file; every key is optional and falls back to the
//! defaults of the standard recovery scenario (two workers, sequence 1..200,
//! one record every 50 ms, window of six even values).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rejoin_core::ExpectedWindow;

/// Root configuration for a recovery scenario.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioConfig {
    /// Worker process configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Cluster topology configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Delivery pacing configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Bounded wait configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Expected output configuration.
    #[serde(default)]
    pub expect: ExpectConfig,
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Worker command line: program followed by leading arguments,
    /// whitespace separated (e.g. `machida --application-module sequence_window`).
    #[serde(default = "default_command")]
    pub command: String,
    /// Extra environment variables for every worker.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Arguments appended after the topology flags.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Stdout line printed once a worker is ready.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
    /// Stdout line printed by a worker resuming from its resilience directory.
    #[serde(default = "default_reconnect_marker")]
    pub reconnect_marker: String,
    /// Grace period between SIGTERM and SIGKILL on stop (default: 2000).
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

/// Cluster topology configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Host every listener and worker binds to (default: 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: String,
    /// Number of workers including the initializer (default: 2).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of source (input) ports (default: 1).
    #[serde(default = "default_sources")]
    pub sources: usize,
    /// Resilience staging directory. A unique temp path is used if unset.
    pub resilience_dir: Option<PathBuf>,
}

/// Delivery pacing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Number of records in the sequence 1..=N (default: 200).
    #[serde(default = "default_sequence_length")]
    pub sequence_length: u64,
    /// Records written per interval (default: 1).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Interval between batches in milliseconds (default: 50).
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    /// Re-establish the connection if it drops (default: true).
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    /// Delay between the start of delivery and the crash (default: 200).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Bounded wait configuration, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Wait for the initializer's readiness marker (default: 30).
    #[serde(default = "default_wait_secs")]
    pub readiness_secs: u64,
    /// Wait for the sender to finish (default: 30).
    #[serde(default = "default_wait_secs")]
    pub delivery_secs: u64,
    /// Wait for the expected value in the sink (default: 30).
    #[serde(default = "default_wait_secs")]
    pub validation_secs: u64,
    /// Wait for the replacement's reconnection marker (default: 10).
    #[serde(default = "default_recovery_marker_secs")]
    pub recovery_marker_secs: u64,
}

/// Expected output configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpectConfig {
    /// Values in the final window (default: 6).
    #[serde(default = "default_window_width")]
    pub window_width: usize,
    /// Distance between window values (default: 2).
    #[serde(default = "default_stride")]
    pub stride: u64,
    /// Literal unframed payload overriding the computed window.
    pub output: Option<String>,
}

// Default value functions
fn default_command() -> String {
    "sequence_window".to_string()
}

fn default_ready_marker() -> String {
    "Application has successfully initialized".to_string()
}

fn default_reconnect_marker() -> String {
    "Restarting a listener ...".to_string()
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_sources() -> usize {
    1
}

fn default_sequence_length() -> u64 {
    200
}

fn default_batch_size() -> usize {
    1
}

fn default_send_interval_ms() -> u64 {
    50
}

fn default_reconnect() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    200
}

fn default_wait_secs() -> u64 {
    30
}

fn default_recovery_marker_secs() -> u64 {
    10
}

fn default_window_width() -> usize {
    6
}

fn default_stride() -> u64 {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            env: BTreeMap::new(),
            extra_args: Vec::new(),
            ready_marker: default_ready_marker(),
            reconnect_marker: default_reconnect_marker(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            workers: default_workers(),
            sources: default_sources(),
            resilience_dir: None,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            sequence_length: default_sequence_length(),
            batch_size: default_batch_size(),
            send_interval_ms: default_send_interval_ms(),
            reconnect: default_reconnect(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            readiness_secs: default_wait_secs(),
            delivery_secs: default_wait_secs(),
            validation_secs: default_wait_secs(),
            recovery_marker_secs: default_recovery_marker_secs(),
        }
    }
}

impl Default for ExpectConfig {
    fn default() -> Self {
        Self {
            window_width: default_window_width(),
            stride: default_stride(),
            output: None,
        }
    }
}

impl WorkerConfig {
    /// Split `command` into program and leading arguments.
    pub fn program_and_args(&self) -> Option<(String, Vec<String>)> {
        let mut parts = self.command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some((program, parts.collect()))
    }

    /// Stop grace period.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl DeliveryConfig {
    /// Interval between batches.
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// Delay before the crash is injected.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl TimeoutConfig {
    /// Readiness deadline.
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    /// Delivery deadline.
    pub fn delivery(&self) -> Duration {
        Duration::from_secs(self.delivery_secs)
    }

    /// Validation deadline.
    pub fn validation(&self) -> Duration {
        Duration::from_secs(self.validation_secs)
    }

    /// Reconnection marker deadline.
    pub fn recovery_marker(&self) -> Duration {
        Duration::from_secs(self.recovery_marker_secs)
    }
}

impl ScenarioConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check the configuration describes a runnable scenario.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.program_and_args().is_none() {
            return Err(ConfigError::Invalid("worker.command is empty".into()));
        }
        if self.cluster.workers < 2 {
            return Err(ConfigError::Invalid(format!(
                "cluster.workers must be at least 2 (got {})",
                self.cluster.workers
            )));
        }
        if self.cluster.sources == 0 {
            return Err(ConfigError::Invalid("cluster.sources must be non-zero".into()));
        }
        if self.delivery.batch_size == 0 {
            return Err(ConfigError::Invalid("delivery.batch_size must be non-zero".into()));
        }
        if self.delivery.send_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "delivery.send_interval_ms must be non-zero".into(),
            ));
        }
        if self.delivery.sequence_length == 0 {
            return Err(ConfigError::Invalid(
                "delivery.sequence_length must be non-zero".into(),
            ));
        }
        if self.expect.output.is_none() {
            let window = self.expected_window()?;
            if !window.is_full() {
                return Err(ConfigError::Invalid(format!(
                    "sequence of {} cannot fill a window of {} (stride {})",
                    self.delivery.sequence_length, self.expect.window_width, self.expect.stride
                )));
            }
        }
        Ok(())
    }

    /// Final window implied by the delivery and expect sections.
    pub fn expected_window(&self) -> Result<ExpectedWindow, ConfigError> {
        ExpectedWindow::for_sequence(
            self.delivery.sequence_length,
            self.expect.window_width,
            self.expect.stride,
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Unframed payload the sink must eventually receive.
    pub fn expected_payload(&self) -> Result<String, ConfigError> {
        match &self.expect.output {
            Some(literal) => Ok(literal.clone()),
            None => Ok(self.expected_window()?.payload()),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration values do not describe a runnable scenario.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_the_standard_scenario() {
        let config = ScenarioConfig::default();
        assert_eq!(config.cluster.workers, 2);
        assert_eq!(config.delivery.sequence_length, 200);
        assert_eq!(config.delivery.batch_size, 1);
        assert_eq!(config.delivery.send_interval(), Duration::from_millis(50));
        assert!(config.delivery.reconnect);
        assert_eq!(config.timeouts.validation(), Duration::from_secs(30));
        assert_eq!(
            config.expected_payload().unwrap(),
            "[200,198,196,194,192,190]"
        );
        config.validate().unwrap();
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[worker]
command = "machida --application-module sequence_window"
extra_args = ["--ponythreads=1"]

[worker.env]
PYTHONPATH = "/apps"

[cluster]
workers = 3
resilience_dir = "/tmp/res-data"

[delivery]
sequence_length = 40
send_interval_ms = 10

[timeouts]
readiness_secs = 5
"#;

        let config: ScenarioConfig = toml::from_str(toml).unwrap();
        let (program, args) = config.worker.program_and_args().unwrap();
        assert_eq!(program, "machida");
        assert_eq!(args, vec!["--application-module", "sequence_window"]);
        assert_eq!(config.worker.extra_args, vec!["--ponythreads=1"]);
        assert_eq!(config.worker.env.get("PYTHONPATH").unwrap(), "/apps");
        assert_eq!(config.cluster.workers, 3);
        assert_eq!(
            config.cluster.resilience_dir,
            Some(PathBuf::from("/tmp/res-data"))
        );
        assert_eq!(config.delivery.sequence_length, 40);
        assert_eq!(config.timeouts.readiness(), Duration::from_secs(5));
        assert_eq!(config.expected_payload().unwrap(), "[40,38,36,34,32,30]");
    }

    #[test]
    fn config_empty_file_uses_defaults() {
        let config: ScenarioConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker.ready_marker, "Application has successfully initialized");
        assert_eq!(config.worker.reconnect_marker, "Restarting a listener ...");
        assert_eq!(config.cluster.host, "127.0.0.1");
    }

    #[test]
    fn literal_output_overrides_window() {
        let toml = r#"
[expect]
output = "[194,196,198,200]"
"#;
        let config: ScenarioConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.expected_payload().unwrap(), "[194,196,198,200]");
    }

    #[test]
    fn validate_rejects_single_worker() {
        let mut config = ScenarioConfig::default();
        config.cluster.workers = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_empty_command_and_zero_batch() {
        let mut config = ScenarioConfig::default();
        config.worker.command = "   ".into();
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::default();
        config.delivery.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_send_interval() {
        let mut config = ScenarioConfig::default();
        config.delivery.send_interval_ms = 0;
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("send_interval_ms")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_window_longer_than_sequence() {
        let mut config = ScenarioConfig::default();
        config.delivery.sequence_length = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reports_path_on_missing_file() {
        let err = ScenarioConfig::from_file(Path::new("/nonexistent/scenario.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/scenario.toml"));
    }
}
