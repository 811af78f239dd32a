use crate::error::{JobError, JobResult};
use crate::filter::ColumnSelector;
use crate::storage::StorageUri;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Longest name the control plane accepts for jobs, models and endpoints.
pub const MAX_NAME_LEN: usize = 63;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

/// Name of a remote job. Unique within the control plane's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobName(String);

impl JobName {
    pub fn new(name: impl Into<String>) -> JobResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self(name))
    }

    /// `prefix` followed by the current UTC time down to milliseconds.
    pub fn unique(prefix: &str) -> JobResult<Self> {
        Self::unique_at(prefix, Utc::now())
    }

    pub fn unique_at(prefix: &str, at: DateTime<Utc>) -> JobResult<Self> {
        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        let budget = MAX_NAME_LEN - stamp.len() - 1;
        let prefix: String = prefix.trim().trim_end_matches('-').chars().take(budget).collect();
        let prefix = prefix.trim_end_matches('-');
        if prefix.is_empty() {
            return Err(JobError::SpecValidation("job name prefix must not be empty".to_string()));
        }
        Self::new(format!("{prefix}-{stamp}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Names must be 1..=63 chars of `[A-Za-z0-9-]`, starting and ending alphanumeric.
pub fn validate_name(name: &str) -> JobResult<()> {
    if name.trim().is_empty() {
        return Err(JobError::SpecValidation("name is required".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(JobError::SpecValidation(format!(
            "name `{name}` is longer than {MAX_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(JobError::SpecValidation(format!(
            "name `{name}` may only contain letters, digits and hyphens"
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(JobError::SpecValidation(format!(
            "name `{name}` must start and end with a letter or digit"
        )));
    }
    Ok(())
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for JobName {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobName> for String {
    fn from(value: JobName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Training,
    Transform,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Training => f.write_str("training"),
            Self::Transform => f.write_str("transform"),
        }
    }
}

/// A named input data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputChannel {
    pub name: String,
    pub uri: StorageUri,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl InputChannel {
    pub fn new(name: impl Into<String>, uri: StorageUri) -> Self {
        Self { name: name.into(), uri, content_type: None }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    pub instance_type: String,
    pub instance_count: u32,
    #[serde(default)]
    pub volume_size_gb: Option<u32>,
}

impl ResourceShape {
    pub fn validate(&self) -> JobResult<()> {
        if !self.instance_type.starts_with("ml.") || self.instance_type.len() <= 3 {
            return Err(JobError::SpecValidation(format!(
                "instance type `{}` must look like ml.<family>.<size>",
                self.instance_type
            )));
        }
        if self.instance_count == 0 {
            return Err(JobError::SpecValidation("instance_count must be >= 1".to_string()));
        }
        if self.volume_size_gb == Some(0) {
            return Err(JobError::SpecValidation("volume_size_gb must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppingCondition {
    pub max_runtime_secs: u64,
    /// Upper bound including time spent waiting for spot capacity.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

impl StoppingCondition {
    pub fn validate(&self, managed_spot: bool) -> JobResult<()> {
        if self.max_runtime_secs == 0 {
            return Err(JobError::SpecValidation("max_runtime_secs must be >= 1".to_string()));
        }
        match self.max_wait_secs {
            Some(_) if !managed_spot => Err(JobError::SpecValidation(
                "max_wait_secs requires managed spot training".to_string(),
            )),
            Some(wait) if wait < self.max_runtime_secs => Err(JobError::SpecValidation(
                "max_wait_secs must be >= max_runtime_secs".to_string(),
            )),
            None if managed_spot => Err(JobError::SpecValidation(
                "managed spot training requires max_wait_secs".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Container image of the training algorithm.
    pub image: String,
    pub role_arn: String,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, String>,
    #[serde(default)]
    pub managed_spot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SplitType {
    None,
    #[default]
    Line,
    RecordIO,
    TFRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssemblyType {
    None,
    #[default]
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchStrategy {
    SingleRecord,
    #[default]
    MultiRecord,
}

/// Whether transform output is written alone or appended to its input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinSource {
    #[default]
    None,
    Input,
}

/// Which input columns reach the model and how output is combined with input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProcessing {
    pub input_filter: ColumnSelector,
    pub join_source: JoinSource,
    pub output_filter: ColumnSelector,
}

impl Default for DataProcessing {
    fn default() -> Self {
        Self {
            input_filter: ColumnSelector::all(),
            join_source: JoinSource::None,
            output_filter: ColumnSelector::all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformParams {
    /// Registered model the transform runs against.
    pub model_name: String,
    pub content_type: String,
    pub split_type: SplitType,
    pub compression: CompressionType,
    #[serde(default)]
    pub accept: Option<String>,
    pub assemble_with: AssemblyType,
    pub batch_strategy: BatchStrategy,
    #[serde(default)]
    pub data_processing: Option<DataProcessing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    Training(TrainingParams),
    Transform(TransformParams),
}

/// Declarative description of one unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: JobName,
    pub created_at: DateTime<Utc>,
    pub inputs: Vec<InputChannel>,
    pub output: StorageUri,
    pub resources: ResourceShape,
    pub stopping: StoppingCondition,
    pub params: JobParams,
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        match self.params {
            JobParams::Training(_) => JobKind::Training,
            JobParams::Transform(_) => JobKind::Transform,
        }
    }

    pub fn training(&self) -> Option<&TrainingParams> {
        match &self.params {
            JobParams::Training(p) => Some(p),
            JobParams::Transform(_) => None,
        }
    }

    pub fn transform(&self) -> Option<&TransformParams> {
        match &self.params {
            JobParams::Transform(p) => Some(p),
            JobParams::Training(_) => None,
        }
    }

    pub fn validate(&self) -> JobResult<()> {
        validate_name(self.name.as_str())?;

        if self.inputs.is_empty() {
            return Err(JobError::SpecValidation("at least one input is required".to_string()));
        }
        let mut seen = HashSet::new();
        for input in &self.inputs {
            if input.name.trim().is_empty() {
                return Err(JobError::SpecValidation("input channel name is required".to_string()));
            }
            if !seen.insert(input.name.as_str()) {
                return Err(JobError::SpecValidation(format!(
                    "duplicate input channel `{}`",
                    input.name
                )));
            }
        }

        self.resources.validate()?;

        match &self.params {
            JobParams::Training(p) => {
                if p.image.trim().is_empty() {
                    return Err(JobError::SpecValidation("training image is required".to_string()));
                }
                if p.role_arn.trim().is_empty() {
                    return Err(JobError::SpecValidation("role_arn is required".to_string()));
                }
                if p.hyperparameters.keys().any(|k| k.trim().is_empty()) {
                    return Err(JobError::SpecValidation("hyperparameter names must not be empty".to_string()));
                }
                self.stopping.validate(p.managed_spot)?;
            }
            JobParams::Transform(p) => {
                validate_name(&p.model_name)?;
                if self.inputs.len() != 1 {
                    return Err(JobError::SpecValidation(
                        "transform jobs take exactly one input prefix".to_string(),
                    ));
                }
                if p.content_type.trim().is_empty() {
                    return Err(JobError::SpecValidation("content_type is required".to_string()));
                }
                if p.data_processing.is_some() && p.split_type != SplitType::Line {
                    return Err(JobError::SpecValidation(
                        "data processing filters require line-split input".to_string(),
                    ));
                }
                self.stopping.validate(false)?;
            }
        }

        Ok(())
    }
}

/// Identifier returned by the control plane for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub kind: JobKind,
    pub name: JobName,
    /// Opaque remote identifier (an ARN for SageMaker).
    pub arn: String,
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job {}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Stopping,
    Completed,
    Failed { reason: String },
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Stopped)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => f.write_str("InProgress"),
            Self::Stopping => f.write_str("Stopping"),
            Self::Completed => f.write_str("Completed"),
            Self::Failed { .. } => f.write_str("Failed"),
            Self::Stopped => f.write_str("Stopped"),
        }
    }
}

/// Snapshot of a job as recorded by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    pub handle: JobHandle,
    pub status: JobStatus,
    /// Finer-grained progress text, e.g. "Downloading" or "Training".
    #[serde(default)]
    pub secondary_status: Option<String>,
    /// Model archive written by a completed training job.
    #[serde(default)]
    pub model_artifact: Option<StorageUri>,
    /// Output prefix of a transform job.
    #[serde(default)]
    pub output_path: Option<StorageUri>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}
