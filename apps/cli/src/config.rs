//! CLI configuration loading.

use anyhow::{Context, Result};
use sagekit_jobs::{ProcessEnv, SessionConfig};
use std::path::Path;

/// Load the session configuration.
///
/// Configuration precedence:
/// 1. Environment variables (SAGEKIT_REGION/AWS_REGION, SAGEKIT_BUCKET, SAGEKIT_ROLE_ARN, SAGEKIT_PREFIX)
/// 2. `--config` file, or ./sagekit.toml when present
/// 3. Defaults
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    SessionConfig::discover(path, &ProcessEnv).context("Failed to load sagekit configuration")
}
