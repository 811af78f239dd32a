//! Reading results off a terminal job.
//!
//! The inspector only locates what the remote system produced: the model
//! archive of a training job, or the per-input prediction files of a
//! transform job. It never computes predictions.

use crate::artifacts::{transform_output_uri, Artifact, ArtifactKind, TransformOutput};
use crate::error::{JobError, JobResult};
use crate::job::{JobDescription, JobKind, JobSpec, JobStatus};
use crate::storage::{ObjectStore, StorageUri};
use std::collections::HashSet;
use tracing::debug;

/// Turn a terminal status into a result: `Completed` is `Ok`, `Failed` and
/// `Stopped` become errors carrying the remote reason.
pub fn ensure_completed(desc: &JobDescription) -> JobResult<()> {
    let job = desc.handle.name.to_string();
    match &desc.status {
        JobStatus::Completed => Ok(()),
        JobStatus::Failed { reason } => Err(JobError::JobFailed { job, reason: reason.clone() }),
        JobStatus::Stopped => Err(JobError::JobStopped { job }),
        status => Err(JobError::NotTerminal { job, status: status.to_string() }),
    }
}

/// The model archive recorded for a completed training job.
pub fn model_artifact(desc: &JobDescription) -> JobResult<Artifact> {
    if desc.handle.kind != JobKind::Training {
        return Err(JobError::SpecValidation(format!(
            "{} has no model artifact",
            desc.handle
        )));
    }
    ensure_completed(desc)?;
    let uri = desc.model_artifact.clone().ok_or_else(|| {
        JobError::NotFound(format!("no model artifact recorded for {}", desc.handle.name))
    })?;
    Ok(Artifact { kind: ArtifactKind::ModelArchive, uri })
}

/// Resolve one output file per input file of a completed transform job,
/// in input order.
pub async fn transform_outputs(
    store: &dyn ObjectStore,
    spec: &JobSpec,
    desc: &JobDescription,
) -> JobResult<Vec<TransformOutput>> {
    if spec.kind() != JobKind::Transform || desc.handle.kind != JobKind::Transform {
        return Err(JobError::SpecValidation(format!("{} is not a transform job", desc.handle)));
    }
    ensure_completed(desc)?;

    let input_prefix = &spec
        .inputs
        .first()
        .ok_or_else(|| JobError::SpecValidation("transform spec has no input".to_string()))?
        .uri;
    let output_prefix = desc.output_path.as_ref().unwrap_or(&spec.output);

    let produced: HashSet<StorageUri> = store.list(output_prefix).await?.into_iter().collect();
    let inputs = store.list(input_prefix).await?;

    let mut outputs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = transform_output_uri(input_prefix, output_prefix, &input);
        if !produced.contains(&output) {
            return Err(JobError::NotFound(format!("no transform output for {input} (expected {output})")));
        }
        outputs.push(TransformOutput { input, output });
    }

    debug!(job = %desc.handle.name, files = outputs.len(), prefix = %output_prefix, "resolved transform outputs");
    Ok(outputs)
}

/// Non-empty lines of an output object, in order.
pub async fn read_output_rows(store: &dyn ObjectStore, uri: &StorageUri) -> JobResult<Vec<String>> {
    let data = store.get(uri).await?;
    let text = String::from_utf8(data.to_vec())
        .map_err(|e| JobError::DataInconsistency(format!("{uri} is not valid UTF-8: {e}")))?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect())
}
