//! Runner configuration.
//!
//! Resolution order: built-in defaults, then an optional YAML file, then
//! `TASKRUNNER_*` environment variables.
//!
//! ```yaml
//! policy:
//!   max_input_bytes: 65536
//!   max_steps: 64
//!   tool_timeout_secs: 2.0
//!   allowed_tools: [echo, add]   # omit to allow every registered tool
//! retry:
//!   max_attempts: 3
//!   base_delay_ms: 50
//!   factor: 2
//!   max_delay_ms: 1000
//! lock:
//!   backend: lease               # local | lease
//!   timeout_secs: 10
//!   lease_ttl_secs: 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_MAX_INPUT_BYTES: &str = "TASKRUNNER_MAX_INPUT_BYTES";
pub const ENV_MAX_STEPS: &str = "TASKRUNNER_MAX_STEPS";
pub const ENV_TOOL_TIMEOUT_SECS: &str = "TASKRUNNER_TOOL_TIMEOUT_SECS";
pub const ENV_LOCK_TIMEOUT_SECS: &str = "TASKRUNNER_LOCK_TIMEOUT_SECS";
pub const ENV_LOCK_BACKEND: &str = "TASKRUNNER_LOCK_BACKEND";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_input_bytes: usize,
    pub max_steps: i64,
    pub tool_timeout_secs: f64,
    /// Tools that may be invoked. `None` allows every registered tool.
    pub allowed_tools: Option<Vec<String>>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: 65_536,
            max_steps: 64,
            tool_timeout_secs: 2.0,
            allowed_tools: None,
        }
    }
}

impl PolicyConfig {
    pub fn tool_timeout(&self) -> Duration {
        secs(self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: u32,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            factor: 2,
            max_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// In-process mutex per task.
    #[default]
    Local,
    /// Lease rows in the shared SQLite file; safe across processes.
    Lease,
}

impl LockBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "lease" => Some(Self::Lease),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub backend: LockBackend,
    pub timeout_secs: f64,
    pub lease_ttl_secs: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::Local,
            timeout_secs: 10.0,
            lease_ttl_secs: 30.0,
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        secs(self.lease_ttl_secs)
    }
}

/// Saturating seconds-to-`Duration`; NaN and negatives become zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// `value` must convert to a `Duration` and, unless `allow_zero`, be positive.
fn check_secs(key: &str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let in_range = Duration::try_from_secs_f64(value).is_ok();
    if !in_range || (!allow_zero && value == 0.0) {
        let bound = if allow_zero { "non-negative" } else { "positive" };
        return Err(ConfigError::Invalid(format!(
            "{} must be a finite, {} number of seconds (got {})",
            key, bound, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub policy: PolicyConfig,
    pub retry: RetryConfig,
    pub lock: LockConfig,
}

impl RunnerConfig {
    /// Load defaults, the optional YAML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `TASKRUNNER_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MAX_INPUT_BYTES) {
            self.policy.max_input_bytes = parse_value(ENV_MAX_INPUT_BYTES, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_STEPS) {
            self.policy.max_steps = parse_value(ENV_MAX_STEPS, &v)?;
        }
        if let Some(v) = lookup(ENV_TOOL_TIMEOUT_SECS) {
            self.policy.tool_timeout_secs = parse_value(ENV_TOOL_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_LOCK_TIMEOUT_SECS) {
            self.lock.timeout_secs = parse_value(ENV_LOCK_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_LOCK_BACKEND) {
            self.lock.backend =
                LockBackend::from_str(&v).ok_or_else(|| ConfigError::InvalidValue {
                    key: ENV_LOCK_BACKEND.to_string(),
                    value: v.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.max_steps < 1 {
            return Err(ConfigError::Invalid("policy.max_steps must be at least 1".into()));
        }
        check_secs("policy.tool_timeout_secs", self.policy.tool_timeout_secs, false)?;
        if self.retry.max_attempts < 1 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        check_secs("lock.timeout_secs", self.lock.timeout_secs, true)?;
        check_secs("lock.lease_ttl_secs", self.lock.lease_ttl_secs, false)?;
        // A live holder must never lose its lease mid-step.
        let worst_step = self.policy.tool_timeout_secs * f64::from(self.retry.max_attempts)
            + (self.retry.max_delay_ms as f64 / 1000.0) * f64::from(self.retry.max_attempts);
        if self.lock.backend == LockBackend::Lease && self.lock.lease_ttl_secs <= worst_step {
            return Err(ConfigError::Invalid(format!(
                "lock.lease_ttl_secs ({}) must exceed the worst-case step time ({:.1}s)",
                self.lock.lease_ttl_secs, worst_step
            )));
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
