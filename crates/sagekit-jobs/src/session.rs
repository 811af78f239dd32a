//! Submit, wait, inspect as one call.
//!
//! A [`Session`] bundles a validated [`SessionConfig`] with a control plane,
//! an object store and a waiter, and decides what a non-successful terminal
//! status means for the workflow through its [`FailurePolicy`].

use crate::artifacts::{Artifact, TransformOutput};
use crate::builders::{stage_local_inputs, TrainingJobBuilder, TransformJobBuilder};
use crate::config::SessionConfig;
use crate::control_plane::{ControlPlane, EndpointHandle, EndpointSpec, EndpointStatus, ModelHandle, ModelSpec};
use crate::error::{JobError, JobResult};
use crate::inspector::{ensure_completed, model_artifact, transform_outputs};
use crate::job::{JobDescription, JobHandle, JobKind, JobSpec};
use crate::layout::JobLayout;
use crate::progress::{ProgressSink, TracingProgressSink};
use crate::storage::{ObjectStore, StorageUri};
use crate::submitter::submit;
use crate::waiter::Waiter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// What [`Session::run`] does when a job ends `Failed` or `Stopped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the failure as an error.
    #[default]
    Abort,
    /// Log it and hand the terminal description back to the caller.
    Report,
}

#[derive(Clone)]
pub struct Session {
    config: SessionConfig,
    plane: Arc<dyn ControlPlane>,
    store: Arc<dyn ObjectStore>,
    waiter: Waiter,
    failure_policy: FailurePolicy,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.plane.id())
            .field("region", &self.config.region)
            .field("waiter", &self.waiter)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        config: SessionConfig,
        plane: Arc<dyn ControlPlane>,
        store: Arc<dyn ObjectStore>,
    ) -> JobResult<Self> {
        config.validate()?;
        let waiter = Waiter::from_config(&config.polling);
        Ok(Self {
            config,
            plane,
            store,
            waiter,
            failure_policy: FailurePolicy::default(),
            progress: Arc::new(TracingProgressSink),
        })
    }

    #[must_use]
    pub fn with_waiter(mut self, waiter: Waiter) -> Self {
        self.waiter = waiter;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn plane(&self) -> &dyn ControlPlane {
        self.plane.as_ref()
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn waiter(&self) -> Waiter {
        self.waiter
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn layout(&self) -> JobResult<JobLayout> {
        JobLayout::for_config(&self.config)
    }

    /// Builder for a training job named `<prefix>-<timestamp>`.
    pub fn training_job(&self, prefix: &str) -> JobResult<TrainingJobBuilder<'_>> {
        TrainingJobBuilder::with_unique_name(&self.config, prefix)
    }

    /// Builder for a transform job named `<prefix>-<timestamp>`.
    pub fn transform_job(
        &self,
        prefix: &str,
        model_name: impl Into<String>,
    ) -> JobResult<TransformJobBuilder<'_>> {
        TransformJobBuilder::with_unique_name(&self.config, prefix, model_name)
    }

    pub async fn stage(&self, local: &Path, dest: &StorageUri) -> JobResult<StorageUri> {
        stage_local_inputs(self.store.as_ref(), local, dest).await
    }

    pub async fn submit(&self, spec: &JobSpec) -> JobResult<JobHandle> {
        submit(self.plane.as_ref(), spec, self.progress.as_ref()).await
    }

    /// One status query, no waiting.
    pub async fn describe(&self, handle: &JobHandle) -> JobResult<JobDescription> {
        self.plane.describe(handle).await
    }

    /// Wait for a terminal status. `Failed` and `Stopped` are returned, not raised.
    pub async fn wait(&self, handle: &JobHandle) -> JobResult<JobDescription> {
        self.waiter.wait(self.plane.as_ref(), handle, self.progress.as_ref()).await
    }

    /// Submit, wait, then apply the failure policy.
    pub async fn run(&self, spec: &JobSpec) -> JobResult<JobDescription> {
        let handle = self.submit(spec).await?;
        let desc = self.wait(&handle).await?;
        match self.failure_policy {
            FailurePolicy::Abort => ensure_completed(&desc)?,
            FailurePolicy::Report => {
                if let Err(e) = ensure_completed(&desc) {
                    warn!(job = %handle.name, error = %e, "job did not complete, continuing");
                }
            }
        }
        Ok(desc)
    }

    /// Run a training job to completion and return its model archive.
    pub async fn train(&self, spec: &JobSpec) -> JobResult<Artifact> {
        expect_kind(spec, JobKind::Training)?;
        let desc = self.run(spec).await?;
        let artifact = model_artifact(&desc)?;
        info!(job = %spec.name, artifact = %artifact.uri, "training complete");
        Ok(artifact)
    }

    /// Run a transform job to completion and return one output per input file.
    pub async fn transform(&self, spec: &JobSpec) -> JobResult<Vec<TransformOutput>> {
        expect_kind(spec, JobKind::Transform)?;
        let desc = self.run(spec).await?;
        let outputs = transform_outputs(self.store.as_ref(), spec, &desc).await?;
        info!(job = %spec.name, files = outputs.len(), "transform complete");
        Ok(outputs)
    }

    /// Register the model produced by a completed training job.
    pub async fn register_model(
        &self,
        desc: &JobDescription,
        model_name: &str,
        image: &str,
    ) -> JobResult<ModelHandle> {
        let artifact = model_artifact(desc)?;
        let spec = ModelSpec {
            name: model_name.to_string(),
            image: image.to_string(),
            artifact: artifact.uri,
            role_arn: self.config.role()?.to_string(),
        };
        let handle = self.plane.create_model(&spec).await?;
        info!(model = %handle.name, job = %desc.handle.name, "registered model");
        Ok(handle)
    }

    /// Create an endpoint and wait until it settles. A settled status other
    /// than `InService` is an error.
    pub async fn deploy_endpoint(&self, spec: &EndpointSpec) -> JobResult<EndpointHandle> {
        let handle = self.plane.create_endpoint(spec).await?;
        match self.waiter.wait_for_endpoint(self.plane.as_ref(), &handle).await? {
            EndpointStatus::InService => Ok(handle),
            EndpointStatus::Failed { reason } => Err(JobError::Remote(format!(
                "endpoint {} failed: {reason}",
                handle.name
            ))),
            other => Err(JobError::Remote(format!("endpoint {} settled as {other}", handle.name))),
        }
    }
}

fn expect_kind(spec: &JobSpec, kind: JobKind) -> JobResult<()> {
    if spec.kind() == kind {
        Ok(())
    } else {
        Err(JobError::SpecValidation(format!("{} is a {} job, expected {kind}", spec.name, spec.kind())))
    }
}
