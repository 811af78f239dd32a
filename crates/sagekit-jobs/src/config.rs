//! Session configuration.
//!
//! Region, default bucket, execution role and job defaults are loaded once and
//! passed explicitly to builders and the [`Session`](crate::session::Session).
//! Nothing in the library reads the environment on its own.

use crate::error::{JobError, JobResult};
use crate::job::ResourceShape;
use crate::storage::StorageUri;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "sagekit.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket used for job inputs and outputs unless a spec says otherwise.
    #[serde(default)]
    pub default_bucket: Option<String>,

    /// Key prefix under the default bucket, e.g. `workshop`.
    #[serde(default = "default_prefix")]
    pub key_prefix: String,

    /// Execution role assumed by training jobs and models.
    #[serde(default)]
    pub role_arn: Option<String>,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub training: TrainingDefaults,

    #[serde(default)]
    pub transform: TransformDefaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Overall wait deadline; `None` waits until the job is terminal.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_secs: default_poll_interval_secs(), timeout_secs: default_timeout_secs() }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingDefaults {
    #[serde(default = "default_training_instance")]
    pub instance_type: String,
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    #[serde(default = "default_volume_size_gb")]
    pub volume_size_gb: u32,
    #[serde(default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,
}

impl Default for TrainingDefaults {
    fn default() -> Self {
        Self {
            instance_type: default_training_instance(),
            instance_count: default_instance_count(),
            volume_size_gb: default_volume_size_gb(),
            max_runtime_secs: default_max_runtime_secs(),
        }
    }
}

impl TrainingDefaults {
    pub fn resources(&self) -> ResourceShape {
        ResourceShape {
            instance_type: self.instance_type.clone(),
            instance_count: self.instance_count,
            volume_size_gb: Some(self.volume_size_gb),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformDefaults {
    #[serde(default = "default_transform_instance")]
    pub instance_type: String,
    #[serde(default = "default_instance_count")]
    pub instance_count: u32,
    #[serde(default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for TransformDefaults {
    fn default() -> Self {
        Self {
            instance_type: default_transform_instance(),
            instance_count: default_instance_count(),
            max_runtime_secs: default_max_runtime_secs(),
            content_type: default_content_type(),
        }
    }
}

impl TransformDefaults {
    pub fn resources(&self) -> ResourceShape {
        ResourceShape {
            instance_type: self.instance_type.clone(),
            instance_count: self.instance_count,
            volume_size_gb: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_prefix() -> String {
    "sagekit".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

#[allow(clippy::unnecessary_wraps)]
fn default_timeout_secs() -> Option<u64> {
    Some(3600)
}

fn default_training_instance() -> String {
    "ml.m5.large".to_string()
}

fn default_transform_instance() -> String {
    "ml.m5.large".to_string()
}

fn default_instance_count() -> u32 {
    1
}

fn default_volume_size_gb() -> u32 {
    10
}

fn default_max_runtime_secs() -> u64 {
    86_400
}

fn default_content_type() -> String {
    "text/csv".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            default_bucket: None,
            key_prefix: default_prefix(),
            role_arn: None,
            polling: PollingConfig::default(),
            training: TrainingDefaults::default(),
            transform: TransformDefaults::default(),
        }
    }
}

/// Source of environment values, injectable for tests.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl<S: std::hash::BuildHasher> EnvSource for std::collections::HashMap<String, String, S> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl SessionConfig {
    pub fn from_toml_str(contents: &str) -> JobResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load_file(path: &Path) -> JobResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            JobError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "loaded session config");
        Self::from_toml_str(&contents)
    }

    /// Load configuration with precedence: environment, then the given file
    /// (or `./sagekit.toml` when present), then defaults.
    pub fn discover(path: Option<&Path>, env: &dyn EnvSource) -> JobResult<Self> {
        let mut config = match path {
            Some(p) => Self::load_file(p)?,
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() { Self::load_file(&local)? } else { Self::default() }
            }
        };
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        if let Some(region) = env.var("SAGEKIT_REGION").or_else(|| env.var("AWS_REGION")) {
            self.region = region;
        }
        if let Some(bucket) = env.var("SAGEKIT_BUCKET") {
            self.default_bucket = Some(bucket);
        }
        if let Some(role) = env.var("SAGEKIT_ROLE_ARN") {
            self.role_arn = Some(role);
        }
        if let Some(prefix) = env.var("SAGEKIT_PREFIX") {
            self.key_prefix = prefix;
        }
    }

    pub fn validate(&self) -> JobResult<()> {
        if self.region.trim().is_empty() {
            return Err(JobError::Config("region must not be empty".to_string()));
        }
        if self.polling.interval_secs == 0 {
            return Err(JobError::Config("polling.interval_secs must be >= 1".to_string()));
        }
        if let Some(bucket) = &self.default_bucket {
            if bucket.trim().is_empty() || bucket.contains('/') {
                return Err(JobError::Config(format!("invalid default bucket `{bucket}`")));
            }
        }
        self.training.resources().validate().map_err(|e| JobError::Config(e.to_string()))?;
        self.transform.resources().validate().map_err(|e| JobError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn bucket(&self) -> JobResult<&str> {
        self.default_bucket
            .as_deref()
            .ok_or_else(|| JobError::Config("no default bucket configured (set SAGEKIT_BUCKET)".to_string()))
    }

    pub fn role(&self) -> JobResult<&str> {
        self.role_arn
            .as_deref()
            .ok_or_else(|| JobError::Config("no execution role configured (set SAGEKIT_ROLE_ARN)".to_string()))
    }

    /// `s3://<default bucket>/<key prefix>`.
    pub fn base_uri(&self) -> JobResult<StorageUri> {
        StorageUri::new(self.bucket()?, self.key_prefix.trim_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg = SessionConfig::from_toml_str(
            r#"
            default_bucket = "workshop-bucket"

            [polling]
            interval_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.polling.interval_secs, 5);
        assert_eq!(cfg.polling.timeout_secs, Some(3600));
        assert_eq!(cfg.training.instance_type, "ml.m5.large");
        assert_eq!(cfg.base_uri().unwrap().to_string(), "s3://workshop-bucket/sagekit");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut cfg = SessionConfig::default();
        let env: HashMap<String, String> = [
            ("AWS_REGION".to_string(), "eu-west-1".to_string()),
            ("SAGEKIT_BUCKET".to_string(), "from-env".to_string()),
        ]
        .into_iter()
        .collect();

        cfg.apply_env(&env);
        assert_eq!(cfg.region, "eu-west-1");
        assert_eq!(cfg.bucket().unwrap(), "from-env");
        assert!(cfg.role().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut cfg = SessionConfig::default();
        cfg.polling.interval_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
