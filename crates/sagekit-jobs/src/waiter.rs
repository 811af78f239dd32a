//! Blocking until a remote job reaches a terminal state.
//!
//! The waiter re-queries status at a fixed interval. A `Failed` or `Stopped`
//! job is a normal return value here; deciding whether that is fatal belongs
//! to the caller (see [`crate::inspector::ensure_completed`]). If the deadline
//! passes first the wait fails with [`JobError::Timeout`] and the remote job is
//! left running.

use crate::config::PollingConfig;
use crate::control_plane::{ControlPlane, EndpointHandle, EndpointStatus};
use crate::error::{JobError, JobResult};
use crate::job::{JobDescription, JobHandle};
use crate::progress::{ProgressEvent, ProgressSink};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(3600);
/// Shortest pause between status queries.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

enum PollOutcome<T> {
    Settled(T),
    Expired(Duration),
}

/// Polling cadence and overall deadline. Holds no per-job state, so one
/// waiter can serve any number of concurrent waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    poll_interval: Duration,
    deadline: Option<Duration>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, deadline: Some(DEFAULT_DEADLINE) }
    }
}

impl Waiter {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    #[must_use]
    pub fn new(poll_interval: Duration, deadline: Option<Duration>) -> Self {
        Self { poll_interval: poll_interval.max(MIN_POLL_INTERVAL), deadline }
    }

    #[must_use]
    pub fn from_config(polling: &PollingConfig) -> Self {
        Self::new(polling.interval(), polling.timeout())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Wait until the job is `Completed`, `Failed` or `Stopped`.
    pub async fn wait(
        &self,
        plane: &dyn ControlPlane,
        handle: &JobHandle,
        progress: &dyn ProgressSink,
    ) -> JobResult<JobDescription> {
        let outcome = self
            .poll_until(
                || plane.describe(handle),
                |desc: &JobDescription, elapsed| {
                    if desc.status.is_terminal() {
                        progress.on_event(ProgressEvent::Finished {
                            handle: handle.clone(),
                            status: desc.status.clone(),
                            elapsed,
                        });
                        return true;
                    }
                    progress.on_event(ProgressEvent::Polled {
                        handle: handle.clone(),
                        status: desc.status.clone(),
                        secondary: desc.secondary_status.clone(),
                        elapsed,
                    });
                    false
                },
            )
            .await?;

        match outcome {
            PollOutcome::Settled(desc) => Ok(desc),
            PollOutcome::Expired(waited) => {
                progress.on_event(ProgressEvent::TimedOut { handle: handle.clone(), elapsed: waited });
                Err(JobError::Timeout { job: handle.name.to_string(), waited })
            }
        }
    }

    /// Wait until an endpoint leaves `Creating`/`Updating`.
    pub async fn wait_for_endpoint(
        &self,
        plane: &dyn ControlPlane,
        handle: &EndpointHandle,
    ) -> JobResult<EndpointStatus> {
        let outcome = self
            .poll_until(
                || plane.describe_endpoint(handle),
                |status: &EndpointStatus, elapsed| {
                    debug!(endpoint = %handle.name, status = %status, elapsed_secs = elapsed.as_secs(), "endpoint status");
                    status.is_settled()
                },
            )
            .await?;

        match outcome {
            PollOutcome::Settled(status) => Ok(status),
            PollOutcome::Expired(waited) => Err(JobError::Timeout { job: handle.name.clone(), waited }),
        }
    }

    async fn poll_until<T, F, Fut>(
        &self,
        mut query: F,
        mut settled: impl FnMut(&T, Duration) -> bool,
    ) -> JobResult<PollOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = JobResult<T>>,
    {
        let start = Instant::now();
        loop {
            let value = query().await?;
            let elapsed = start.elapsed();
            if settled(&value, elapsed) {
                return Ok(PollOutcome::Settled(value));
            }

            let nap = match self.deadline {
                Some(deadline) if elapsed >= deadline => return Ok(PollOutcome::Expired(elapsed)),
                Some(deadline) => self.poll_interval.min(deadline - elapsed),
                None => self.poll_interval,
            };
            sleep(nap).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryControlPlane, MemoryObjectStore};
    use crate::progress::TracingProgressSink;
    use crate::{JobName, JobStatus, SessionConfig, StorageUri, TrainingJobBuilder};
    use std::sync::Arc;

    #[test]
    fn test_zero_interval_is_raised_to_minimum() {
        let waiter = Waiter::new(Duration::ZERO, None);
        assert_eq!(waiter.poll_interval(), MIN_POLL_INTERVAL);

        let waiter = Waiter::new(Duration::from_secs(5), None);
        assert_eq!(waiter.poll_interval(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_queries_until_terminal_and_no_further() {
        let store = Arc::new(MemoryObjectStore::new());
        let data = StorageUri::parse("s3://workshop/data/train/iris.csv").unwrap();
        store.insert(data.clone(), "0,5.1,3.5\n");
        let plane = MemoryControlPlane::new(store).with_steps_to_finish(4);

        let config = SessionConfig {
            default_bucket: Some("workshop".to_string()),
            role_arn: Some("arn:aws:iam::123456789012:role/sagekit".to_string()),
            ..SessionConfig::default()
        };
        let spec = TrainingJobBuilder::new(&config, JobName::new("poll-count").unwrap())
            .image("decision-trees:latest")
            .channel("train", data)
            .build()
            .unwrap();
        let handle = plane.submit_training(&spec).await.unwrap();

        let waiter = Waiter::new(Duration::ZERO, Some(Duration::from_secs(10)));
        let desc = waiter.wait(&plane, &handle, &TracingProgressSink).await.unwrap();
        assert_eq!(desc.status, JobStatus::Completed);
        assert_eq!(plane.describe_calls(), 4);
    }
}
