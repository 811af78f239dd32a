use crate::control_plane::ControlPlane;
use crate::error::JobResult;
use crate::job::{JobHandle, JobKind, JobSpec};
use crate::progress::{ProgressEvent, ProgressSink};
use tracing::{debug, warn};

/// Send a job spec to the control plane with exactly one remote call.
///
/// Rejections are returned as-is; nothing is retried. Resubmitting the same
/// spec fails because the name is already taken.
pub async fn submit(
    plane: &dyn ControlPlane,
    spec: &JobSpec,
    progress: &dyn ProgressSink,
) -> JobResult<JobHandle> {
    spec.validate()?;
    debug!(job = %spec.name, kind = %spec.kind(), backend = plane.id(), "submitting job");

    let result = match spec.kind() {
        JobKind::Training => plane.submit_training(spec).await,
        JobKind::Transform => plane.submit_transform(spec).await,
    };

    match result {
        Ok(handle) => {
            progress.on_event(ProgressEvent::Submitted { handle: handle.clone() });
            Ok(handle)
        }
        Err(e) => {
            warn!(job = %spec.name, error = %e, "submission failed");
            Err(e)
        }
    }
}
