//! Sagekit Jobs
//!
//! Client-side workflow for jobs run by a managed ML control plane:
//! - Building training and batch transform requests (`builders`)
//! - Submitting them and waiting for a terminal status (`submitter`, `waiter`)
//! - Locating model archives and prediction files (`inspector`)
//! - Control plane and object storage seams (`ControlPlane`, `ObjectStore`)
//!   with in-memory and local fakes, plus SageMaker/S3 behind the `aws` feature
//! - Local tabular data and archive helpers (`dataset`, `package`)

pub mod artifacts;
#[cfg(feature = "aws")]
pub mod aws;
pub mod builders;
pub mod config;
pub mod control_plane;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod inspector;
pub mod job;
pub mod layout;
pub mod memory;
pub mod package;
pub mod progress;
pub mod session;
pub mod storage;
pub mod submitter;
pub mod waiter;

pub use artifacts::{Artifact, ArtifactKind, TransformOutput};
#[cfg(feature = "aws")]
pub use aws::{S3ObjectStore, SageMakerControlPlane};
pub use builders::{stage_local_inputs, TrainingJobBuilder, TransformJobBuilder};
pub use config::{EnvSource, PollingConfig, ProcessEnv, SessionConfig};
pub use control_plane::{ControlPlane, EndpointHandle, EndpointSpec, EndpointStatus, ModelHandle, ModelSpec};
pub use dataset::{BatchFile, BatchOptions, LabeledTable, PredictionReport};
pub use error::{JobError, JobResult};
pub use filter::ColumnSelector;
pub use inspector::{ensure_completed, model_artifact, read_output_rows, transform_outputs};
pub use job::{
    InputChannel, JobDescription, JobHandle, JobKind, JobName, JobParams, JobSpec, JobStatus, ResourceShape,
    StoppingCondition,
};
pub use layout::JobLayout;
pub use memory::{MemoryControlPlane, MemoryObjectStore, ScriptedOutcome};
pub use package::{create_tar_gz, ArchiveSummary};
pub use progress::{ProgressEvent, ProgressSink, StdoutProgressSink, TracingProgressSink};
pub use session::{FailurePolicy, Session};
pub use storage::{ObjectStore, StorageUri};
pub use submitter::submit;
pub use waiter::Waiter;
