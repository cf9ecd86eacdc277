//! Configuration types for trialfarm

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{FarmError, FarmResult};

/// Default command used to start a trial on a worker
pub const DEFAULT_COMMAND_TEMPLATE: &str = "CUDA_VISIBLE_DEVICES={device} python {executable}";

/// Top-level farm configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    /// Pool selection and admission settings
    pub scheduler: SchedulerConfig,
    /// Device telemetry thresholds
    pub probe: ProbeConfig,
    /// How remote hosts are reached
    pub transport: TransportConfig,
    /// Requeue policy for failed trials
    pub retry: RetryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Worker slots, in pool order
    pub workers: Vec<WorkerSpec>,
}

impl FarmConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> FarmResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FarmError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FarmError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> FarmResult<()> {
        if self.scheduler.max_running_workers == 0 {
            return Err(FarmError::Config(
                "scheduler.max_running_workers must be at least 1".to_string(),
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(FarmError::Config(
                "scheduler.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.probe.samples == 0 {
            return Err(FarmError::Config(
                "probe.samples must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("probe.max_mem_fraction", self.probe.max_mem_fraction),
            ("probe.max_util_fraction", self.probe.max_util_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(FarmError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.retry.max_attempts == Some(0) {
            return Err(FarmError::Config(
                "retry.max_attempts must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool selection and admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of workers allowed to be occupied at once
    pub max_running_workers: usize,
    /// Upper bound on how long the pool waits before rescanning workers
    pub poll_interval_ms: u64,
    /// Command started on a worker; `{device}` and `{executable}` are substituted
    pub command_template: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_running_workers: 10,
            poll_interval_ms: 500,
            command_template: DEFAULT_COMMAND_TEMPLATE.to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Device telemetry thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Command that prints the device status table
    pub status_command: String,
    /// A device is busy once used/total memory reaches this fraction
    pub max_mem_fraction: f64,
    /// A device is busy once utilization reaches this fraction
    pub max_util_fraction: f64,
    /// Number of consecutive reads that must all be available
    pub samples: u32,
    /// Delay between reads
    pub sample_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            status_command: "nvidia-smi".to_string(),
            max_mem_fraction: 0.3,
            max_util_fraction: 0.3,
            samples: 3,
            sample_interval_ms: 500,
        }
    }
}

impl ProbeConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// How remote hosts are reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// SSH client binary
    pub ssh_program: String,
    /// Extra arguments passed to the SSH client before the host
    pub ssh_args: Vec<String>,
    /// Hosts that run commands through the local shell instead of SSH
    pub local_hosts: Vec<String>,
    /// Shell used for local commands
    pub shell: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            ssh_args: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            local_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            shell: "sh".to_string(),
        }
    }
}

impl TransportConfig {
    /// Whether commands for this host run locally
    pub fn is_local(&self, host: &str) -> bool {
        self.local_hosts.iter().any(|h| h == host)
    }
}

/// Requeue policy for failed trials
///
/// The default retries forever without delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Give up on a task after this many dispatches (unlimited when unset)
    pub max_attempts: Option<u32>,
    /// Base delay before re-dispatching a failed task; 0 disables backoff
    pub backoff_base_ms: u64,
    /// Cap on the exponential backoff delay
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_base_ms: 0,
            backoff_max_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Whether a task dispatched `attempts` times should not be dispatched again
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Delay before re-dispatching a task that has failed `attempts` times
    pub fn backoff(&self, attempts: u32) -> Option<Duration> {
        if self.backoff_base_ms == 0 || attempts == 0 {
            return None;
        }
        let factor = 2u64.saturating_pow(attempts - 1);
        let delay = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Some(Duration::from_millis(delay))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One worker slot: a host plus the accelerator device it exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Host address
    pub host: String,
    /// Device index on that host
    pub device: u32,
    /// Trial executable registered on the host
    pub executable: String,
    /// Per-worker override of `scheduler.command_template`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_template: Option<String>,
}

impl WorkerSpec {
    pub fn new(host: impl Into<String>, device: u32, executable: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            device,
            executable: executable.into(),
            command_template: None,
        }
    }

    /// Stable identifier used in logs
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.device)
    }

    /// Render the command that starts a trial on this worker
    pub fn render_command(&self, default_template: &str) -> String {
        self.command_template
            .as_deref()
            .unwrap_or(default_template)
            .replace("{device}", &self.device.to_string())
            .replace("{executable}", &self.executable)
    }
}

/// Parse a pool file holding `[host, device, executable]` triples
pub fn parse_pool_triples(content: &str) -> FarmResult<Vec<WorkerSpec>> {
    let triples: Vec<(String, u32, String)> = serde_json::from_str(content)?;
    Ok(triples
        .into_iter()
        .map(|(host, device, executable)| WorkerSpec::new(host, device, executable))
        .collect())
}

/// Load a pool file holding `[host, device, executable]` triples
pub fn load_pool_triples(path: &Path) -> FarmResult<Vec<WorkerSpec>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FarmError::Config(format!("Failed to read pool file: {}", e)))?;
    parse_pool_triples(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_farm_config() {
        let config = FarmConfig::default();
        assert_eq!(config.scheduler.max_running_workers, 10);
        assert_eq!(config.scheduler.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.probe.samples, 3);
        assert_eq!(config.probe.max_mem_fraction, 0.3);
        assert!(config.retry.max_attempts.is_none());
        assert!(config.workers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_farm_config_parse() {
        let toml_str = r#"
[scheduler]
max_running_workers = 2

[probe]
sample_interval_ms = 100

[retry]
max_attempts = 5

[[workers]]
host = "gpu-01"
device = 0
executable = "/opt/trials/run.py"

[[workers]]
host = "gpu-01"
device = 1
executable = "/opt/trials/run.py"
command_template = "python {executable} --gpu {device}"
"#;
        let config: FarmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.max_running_workers, 2);
        assert_eq!(config.scheduler.command_template, DEFAULT_COMMAND_TEMPLATE);
        assert_eq!(config.probe.sample_interval(), Duration::from_millis(100));
        assert_eq!(config.probe.samples, 3);
        assert_eq!(config.retry.max_attempts, Some(5));
        assert_eq!(config.workers.len(), 2);
        assert_eq!(
            config.workers[1].command_template.as_deref(),
            Some("python {executable} --gpu {device}")
        );
    }

    #[test]
    fn test_example_config_parses() {
        let config: FarmConfig = toml::from_str(include_str!("../../../farm.example.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.transport.shell, "sh");
    }

    #[test]
    fn test_from_file_rejects_zero_cap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nmax_running_workers = 0").unwrap();

        let result = FarmConfig::from_file(file.path());
        assert!(matches!(result, Err(FarmError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = FarmConfig::default();
        config.scheduler.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(FarmError::Config(_))));
    }

    #[test]
    fn test_validate_fraction_range() {
        let mut config = FarmConfig::default();
        config.probe.max_util_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_render_command() {
        let spec = WorkerSpec::new("gpu-02", 3, "/srv/trial.py");
        assert_eq!(
            spec.render_command(DEFAULT_COMMAND_TEMPLATE),
            "CUDA_VISIBLE_DEVICES=3 python /srv/trial.py"
        );
        assert_eq!(spec.id(), "gpu-02:3");
    }

    #[test]
    fn test_parse_pool_triples() {
        let specs = parse_pool_triples(
            r#"[["10.0.0.4", 0, "train.py"], ["10.0.0.4", 1, "train.py"]]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1], WorkerSpec::new("10.0.0.4", 1, "train.py"));
    }

    #[test]
    fn test_parse_pool_triples_malformed() {
        let result = parse_pool_triples(r#"[["10.0.0.4", "zero", "train.py"]]"#);
        assert!(matches!(result, Err(FarmError::Serialization(_))));
    }

    #[test]
    fn test_retry_unlimited_by_default() {
        let retry = RetryConfig::default();
        assert!(!retry.exhausted(u32::MAX));
        assert!(retry.backoff(4).is_none());
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: Some(3),
            backoff_base_ms: 100,
            backoff_max_ms: 350,
        };
        assert!(retry.backoff(0).is_none());
        assert_eq!(retry.backoff(1), Some(Duration::from_millis(100)));
        assert_eq!(retry.backoff(2), Some(Duration::from_millis(200)));
        assert_eq!(retry.backoff(3), Some(Duration::from_millis(350)));
        assert!(!retry.exhausted(2));
        assert!(retry.exhausted(3));
    }
}
