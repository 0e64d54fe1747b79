//! Configuration system: TOML file + env var overrides + command-line flags.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, VrlError};

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub relief: ReliefConfig,
    pub provider: ProviderConfig,
    pub cluster: ClusterConfig,
    pub host: HostConfig,
    pub logging: LoggingConfig,
}

/// Which pod, container and volumes to watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TargetConfig {
    pub container_name: String,
    pub pod_name: String,
    pub namespace: String,
    pub volumes: Vec<String>,
}

/// Escalation thresholds and timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReliefConfig {
    /// Usage percentage at or above which relief starts.
    pub threshold_pct: u8,
    /// Percentage of the current disk size added per resize.
    pub expand_by_pct: u32,
    pub poll_period_ms: u64,
    /// Wait between a finished disk resize and the filesystem grow.
    pub settle_delay_ms: u64,
}

/// Compute API addressing and resize-operation polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Discovered from the node's provider ID when unset.
    pub project_id: Option<String>,
    pub operation_poll_interval_ms: u64,
    /// Give up on a resize operation after this long. Unset waits forever.
    pub operation_max_wait_secs: Option<u64>,
    pub compute_endpoint: String,
    pub metadata_endpoint: String,
}

/// Cluster API access. Credentials come from the pod's service account (or a
/// kubeconfig when run outside the cluster).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ClusterConfig {
    /// Overrides the inferred API server address.
    pub api_server: Option<String>,
}

/// Host tooling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    pub resize_tool: String,
    pub mounts_file: PathBuf,
}

/// Activity log destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSONL file; stdout when unset.
    pub jsonl_path: Option<PathBuf>,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

impl Default for ReliefConfig {
    fn default() -> Self {
        Self {
            threshold_pct: 80,
            expand_by_pct: 20,
            poll_period_ms: 60_000,
            settle_delay_ms: 10_000,
        }
    }
}

impl ReliefConfig {
    #[must_use]
    pub const fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            operation_poll_interval_ms: 30_000,
            operation_max_wait_secs: None,
            compute_endpoint: "https://compute.googleapis.com/compute/v1".to_string(),
            metadata_endpoint: "http://metadata.google.internal/computeMetadata/v1".to_string(),
        }
    }
}

impl ProviderConfig {
    #[must_use]
    pub const fn operation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.operation_poll_interval_ms)
    }

    #[must_use]
    pub fn operation_max_wait(&self) -> Option<Duration> {
        self.operation_max_wait_secs.map(Duration::from_secs)
    }
}

impl ClusterConfig {
    /// Explicit API server without a trailing slash, if one is configured.
    #[must_use]
    pub fn api_server_override(&self) -> Option<&str> {
        self.api_server
            .as_deref()
            .map(|server| server.trim_end_matches('/'))
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            resize_tool: "resize2fs".to_string(),
            mounts_file: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            fallback_path: None,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

/// Values taken from the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub container_name: Option<String>,
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
    pub volumes: Option<String>,
    pub threshold_pct: Option<u8>,
    pub expand_by_pct: Option<u32>,
    pub poll_period: Option<Duration>,
}

impl Config {
    /// Load config: defaults, then an optional TOML file, then `VRL_*` env vars,
    /// then command-line flags, then validate.
    ///
    /// An explicitly named config file that does not exist is an error.
    pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<Self> {
        let mut cfg = match path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path).map_err(|source| VrlError::io(path, source))?;
                toml::from_str(&raw)?
            }
            Some(path) => {
                return Err(VrlError::MissingConfig {
                    path: path.to_path_buf(),
                });
            }
            None => Self::default(),
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.apply_cli_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the startup log line.
    ///
    /// FNV-1a over canonical JSON, stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // target
        if let Some(raw) = lookup("VRL_CONTAINER_NAME") {
            self.target.container_name = raw;
        }
        if let Some(raw) = lookup("VRL_POD_NAME") {
            self.target.pod_name = raw;
        }
        if let Some(raw) = lookup("VRL_NAMESPACE") {
            self.target.namespace = raw;
        }
        if let Some(raw) = lookup("VRL_VOLUMES") {
            self.target.volumes = split_volume_list(&raw);
        }

        // relief
        if let Some(raw) = lookup("VRL_THRESHOLD_PCT") {
            self.relief.threshold_pct = parse_env("VRL_THRESHOLD_PCT", &raw)?;
        }
        if let Some(raw) = lookup("VRL_EXPAND_BY_PCT") {
            self.relief.expand_by_pct = parse_env("VRL_EXPAND_BY_PCT", &raw)?;
        }
        if let Some(raw) = lookup("VRL_POLL_PERIOD") {
            self.relief.poll_period_ms = duration_ms(parse_duration("VRL_POLL_PERIOD", &raw)?);
        }
        if let Some(raw) = lookup("VRL_SETTLE_DELAY") {
            self.relief.settle_delay_ms = duration_ms(parse_duration("VRL_SETTLE_DELAY", &raw)?);
        }

        // provider
        if let Some(raw) = lookup("VRL_PROJECT_ID") {
            self.provider.project_id = Some(raw);
        }
        if let Some(raw) = lookup("VRL_OPERATION_POLL_INTERVAL") {
            self.provider.operation_poll_interval_ms =
                duration_ms(parse_duration("VRL_OPERATION_POLL_INTERVAL", &raw)?);
        }
        if let Some(raw) = lookup("VRL_OPERATION_MAX_WAIT") {
            self.provider.operation_max_wait_secs =
                Some(duration_secs_ceil(parse_duration("VRL_OPERATION_MAX_WAIT", &raw)?));
        }

        // cluster / host / logging
        if let Some(raw) = lookup("VRL_API_SERVER") {
            self.cluster.api_server = Some(raw);
        }
        if let Some(raw) = lookup("VRL_RESIZE_TOOL") {
            self.host.resize_tool = raw;
        }
        if let Some(raw) = lookup("VRL_JSONL_PATH") {
            self.logging.jsonl_path = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    fn apply_cli_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(value) = &overrides.container_name {
            self.target.container_name.clone_from(value);
        }
        if let Some(value) = &overrides.pod_name {
            self.target.pod_name.clone_from(value);
        }
        if let Some(value) = &overrides.namespace {
            self.target.namespace.clone_from(value);
        }
        if let Some(value) = &overrides.volumes {
            self.target.volumes = split_volume_list(value);
        }
        if let Some(value) = overrides.threshold_pct {
            self.relief.threshold_pct = value;
        }
        if let Some(value) = overrides.expand_by_pct {
            self.relief.expand_by_pct = value;
        }
        if let Some(value) = overrides.poll_period {
            self.relief.poll_period_ms = duration_ms(value);
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("target.container_name", &self.target.container_name),
            ("target.pod_name", &self.target.pod_name),
            ("target.namespace", &self.target.namespace),
        ] {
            if value.trim().is_empty() {
                return Err(VrlError::InvalidConfig {
                    details: format!("{name} is required"),
                });
            }
        }

        if self.target.volumes.is_empty() {
            return Err(VrlError::InvalidConfig {
                details: "target.volumes must name at least one volume".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for volume in &self.target.volumes {
            if volume.trim().is_empty() {
                return Err(VrlError::InvalidConfig {
                    details: "target.volumes contains an empty name".to_string(),
                });
            }
            if !seen.insert(volume.as_str()) {
                return Err(VrlError::InvalidConfig {
                    details: format!("target.volumes lists {volume} more than once"),
                });
            }
        }

        if !(1..=100).contains(&self.relief.threshold_pct) {
            return Err(VrlError::InvalidConfig {
                details: format!(
                    "relief.threshold_pct must be in [1, 100], got {}",
                    self.relief.threshold_pct
                ),
            });
        }
        if self.relief.expand_by_pct == 0 {
            return Err(VrlError::InvalidConfig {
                details: "relief.expand_by_pct must be >= 1".to_string(),
            });
        }
        if self.relief.poll_period_ms == 0 {
            return Err(VrlError::InvalidConfig {
                details: "relief.poll_period_ms must be > 0".to_string(),
            });
        }
        if self.provider.operation_poll_interval_ms == 0 {
            return Err(VrlError::InvalidConfig {
                details: "provider.operation_poll_interval_ms must be > 0".to_string(),
            });
        }
        if self.provider.operation_max_wait_secs == Some(0) {
            return Err(VrlError::InvalidConfig {
                details: "provider.operation_max_wait_secs must be > 0 when set".to_string(),
            });
        }
        if let Some(project) = &self.provider.project_id
            && project.trim().is_empty()
        {
            return Err(VrlError::InvalidConfig {
                details: "provider.project_id must not be blank when set".to_string(),
            });
        }
        if self.host.resize_tool.trim().is_empty() {
            return Err(VrlError::InvalidConfig {
                details: "host.resize_tool is required".to_string(),
            });
        }
        if self.logging.max_size_bytes == 0 {
            return Err(VrlError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Split a comma-separated volume list, dropping surrounding whitespace.
#[must_use]
pub fn split_volume_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a human-readable duration such as `60s` or `2m30s`.
pub fn parse_duration(name: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim()).map_err(|error| VrlError::ConfigParse {
        context: "duration",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn duration_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}

/// Whole seconds, rounding any fraction up so a short non-zero wait stays non-zero.
fn duration_secs_ceil(value: Duration) -> u64 {
    value
        .as_secs()
        .saturating_add(u64::from(value.subsec_nanos() > 0))
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| VrlError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{CliOverrides, Config, VrlError, split_volume_list};
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn targeted() -> Config {
        let mut cfg = Config::default();
        cfg.target.container_name = "app".to_string();
        cfg.target.pod_name = "app-0".to_string();
        cfg.target.namespace = "default".to_string();
        cfg.target.volumes = vec!["data".to_string()];
        cfg
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.relief.threshold_pct, 80);
        assert_eq!(cfg.relief.expand_by_pct, 20);
        assert_eq!(cfg.relief.poll_period(), Duration::from_secs(60));
        assert_eq!(cfg.relief.settle_delay(), Duration::from_secs(10));
        assert_eq!(
            cfg.provider.operation_poll_interval(),
            Duration::from_secs(30)
        );
        assert!(cfg.provider.operation_max_wait().is_none());
        assert_eq!(cfg.host.resize_tool, "resize2fs");
    }

    #[test]
    fn defaults_lack_required_target() {
        let err = Config::default().validate().expect_err("target required");
        assert!(err.to_string().contains("target.container_name"));
    }

    #[test]
    fn fully_targeted_config_is_valid() {
        assert!(targeted().validate().is_ok());
    }

    #[test]
    fn empty_volume_list_rejected() {
        let mut cfg = targeted();
        cfg.target.volumes.clear();
        let err = cfg.validate().expect_err("no volumes");
        assert!(matches!(err, VrlError::InvalidConfig { .. }));
    }

    #[test]
    fn duplicate_volume_names_rejected() {
        let mut cfg = targeted();
        cfg.target.volumes = vec!["data".to_string(), "data".to_string()];
        let err = cfg.validate().expect_err("duplicate");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut cfg = targeted();
        cfg.relief.threshold_pct = 0;
        assert!(cfg.validate().is_err());
        cfg.relief.threshold_pct = 101;
        assert!(cfg.validate().is_err());
        cfg.relief.threshold_pct = 100;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_expand_by_rejected() {
        let mut cfg = targeted();
        cfg.relief.expand_by_pct = 0;
        let err = cfg.validate().expect_err("zero growth");
        assert!(err.to_string().contains("expand_by_pct"));
    }

    #[test]
    fn zero_max_wait_rejected() {
        let mut cfg = targeted();
        cfg.provider.operation_max_wait_secs = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn volume_list_splits_and_trims() {
        assert_eq!(
            split_volume_list(" data , logs,,cache "),
            vec!["data", "logs", "cache"]
        );
        assert!(split_volume_list("").is_empty());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("VRL_VOLUMES", "data,logs"),
            ("VRL_THRESHOLD_PCT", "90"),
            ("VRL_POLL_PERIOD", "2m"),
            ("VRL_OPERATION_MAX_WAIT", "10m"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides parse");
        assert_eq!(cfg.target.volumes, vec!["data", "logs"]);
        assert_eq!(cfg.relief.threshold_pct, 90);
        assert_eq!(cfg.relief.poll_period_ms, 120_000);
        assert_eq!(cfg.provider.operation_max_wait_secs, Some(600));
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("VRL_THRESHOLD_PCT", "eighty")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("non-numeric threshold");
        match err {
            VrlError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("VRL_THRESHOLD_PCT"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_invalid_duration_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("VRL_POLL_PERIOD", "soon")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("bad duration");
        assert_eq!(err.code(), "VRL-1003");
    }

    #[test]
    fn cli_overrides_win_over_env() {
        let mut cfg = Config::default();
        let env = vars(&[("VRL_THRESHOLD_PCT", "90"), ("VRL_POD_NAME", "from-env")]);
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap();
        cfg.apply_cli_overrides(&CliOverrides {
            threshold_pct: Some(75),
            poll_period: Some(Duration::from_secs(5)),
            ..CliOverrides::default()
        });
        assert_eq!(cfg.relief.threshold_pct, 75);
        assert_eq!(cfg.relief.poll_period_ms, 5_000);
        assert_eq!(cfg.target.pod_name, "from-env");
    }

    #[test]
    fn toml_file_round_trips_through_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vrelief.toml");
        std::fs::write(
            &path,
            r#"
[target]
container_name = "db"
pod_name = "db-0"
namespace = "prod"
volumes = ["pgdata"]

[relief]
threshold_pct = 85
expand_by_pct = 25

[provider]
project_id = "my-project"
"#,
        )
        .expect("write config");

        let cfg = Config::load(Some(&path), &CliOverrides::default()).expect("config loads");
        assert_eq!(cfg.target.volumes, vec!["pgdata"]);
        assert_eq!(cfg.relief.threshold_pct, 85);
        assert_eq!(cfg.relief.expand_by_pct, 25);
        assert_eq!(cfg.relief.poll_period_ms, 60_000);
        assert_eq!(cfg.provider.project_id.as_deref(), Some("my-project"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(
            Some(Path::new("/nonexistent/vrelief/config.toml")),
            &CliOverrides::default(),
        )
        .expect_err("missing file");
        assert!(matches!(err, VrlError::MissingConfig { .. }));
    }

    #[test]
    fn explicit_api_server_is_trimmed() {
        let mut cfg = Config::default();
        assert_eq!(cfg.cluster.api_server_override(), None);
        cfg.cluster.api_server = Some("https://10.0.0.1:443/".to_string());
        assert_eq!(
            cfg.cluster.api_server_override(),
            Some("https://10.0.0.1:443")
        );
    }

    #[test]
    fn sub_second_max_wait_rounds_up() {
        let mut cfg = targeted();
        let overrides = vars(&[("VRL_OPERATION_MAX_WAIT", "500ms")]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides parse");
        assert_eq!(cfg.provider.operation_max_wait_secs, Some(1));
        assert!(cfg.validate().is_ok());

        let overrides = vars(&[("VRL_OPERATION_MAX_WAIT", "90s 1ms")]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides parse");
        assert_eq!(cfg.provider.operation_max_wait_secs, Some(91));
    }

    #[test]
    fn stable_hash_tracks_changes() {
        let a = targeted();
        let mut b = targeted();
        assert_eq!(a.stable_hash().unwrap(), b.stable_hash().unwrap());
        b.relief.expand_by_pct += 1;
        assert_ne!(a.stable_hash().unwrap(), b.stable_hash().unwrap());
    }
}
