use crate::error::JobResult;
use crate::job::{JobDescription, JobHandle, JobSpec};
use crate::storage::StorageUri;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Model registration request: an artifact plus the container that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub image: String,
    pub artifact: StorageUri,
    pub role_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelHandle {
    pub name: String,
    pub arn: String,
}

/// Real-time endpoint request for a registered model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    pub model_name: String,
    pub instance_type: String,
    pub instance_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointHandle {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EndpointStatus {
    Creating,
    Updating,
    InService,
    OutOfService,
    Deleting,
    Failed { reason: String },
}

impl EndpointStatus {
    /// Whether the endpoint has left its transitional states.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Creating | Self::Updating)
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => f.write_str("Creating"),
            Self::Updating => f.write_str("Updating"),
            Self::InService => f.write_str("InService"),
            Self::OutOfService => f.write_str("OutOfService"),
            Self::Deleting => f.write_str("Deleting"),
            Self::Failed { .. } => f.write_str("Failed"),
        }
    }
}

/// Remote control plane that owns job, model and endpoint state.
///
/// Status is only ever observed locally; implementations never let a
/// terminal job status revert.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    fn id(&self) -> &'static str;

    async fn submit_training(&self, spec: &JobSpec) -> JobResult<JobHandle>;

    async fn submit_transform(&self, spec: &JobSpec) -> JobResult<JobHandle>;

    async fn describe(&self, handle: &JobHandle) -> JobResult<JobDescription>;

    async fn create_model(&self, spec: &ModelSpec) -> JobResult<ModelHandle>;

    async fn create_endpoint(&self, spec: &EndpointSpec) -> JobResult<EndpointHandle>;

    async fn describe_endpoint(&self, handle: &EndpointHandle) -> JobResult<EndpointStatus>;
}
