use crate::job::{JobHandle, JobStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Submitted { handle: JobHandle },
    Polled { handle: JobHandle, status: JobStatus, secondary: Option<String>, elapsed: Duration },
    Finished { handle: JobHandle, status: JobStatus, elapsed: Duration },
    TimedOut { handle: JobHandle, elapsed: Duration },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Submitted { handle } => println!("[{}] submitted ({})", handle.name, handle.kind),
            ProgressEvent::Polled { handle, status, secondary, elapsed } => match secondary {
                Some(detail) => println!("[{}] {status} - {detail} ({}s)", handle.name, elapsed.as_secs()),
                None => println!("[{}] {status} ({}s)", handle.name, elapsed.as_secs()),
            },
            ProgressEvent::Finished { handle, status, elapsed } => {
                println!("[{}] finished: {status} after {}s", handle.name, elapsed.as_secs());
                if let Some(reason) = status.failure_reason() {
                    println!("[{}] failure reason: {reason}", handle.name);
                }
            }
            ProgressEvent::TimedOut { handle, elapsed } => {
                println!("[{}] still running after {}s, stopped waiting", handle.name, elapsed.as_secs());
            }
        }
    }
}

/// Reports progress as structured log records.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Submitted { handle } => {
                info!(job = %handle.name, kind = %handle.kind, arn = %handle.arn, "job submitted");
            }
            ProgressEvent::Polled { handle, status, secondary, elapsed } => {
                info!(
                    job = %handle.name,
                    status = %status,
                    secondary = secondary.as_deref().unwrap_or("-"),
                    elapsed_secs = elapsed.as_secs(),
                    "job status"
                );
            }
            ProgressEvent::Finished { handle, status, elapsed } => match status.failure_reason() {
                Some(reason) => warn!(job = %handle.name, reason, elapsed_secs = elapsed.as_secs(), "job failed"),
                None => info!(job = %handle.name, status = %status, elapsed_secs = elapsed.as_secs(), "job finished"),
            },
            ProgressEvent::TimedOut { handle, elapsed } => {
                warn!(job = %handle.name, elapsed_secs = elapsed.as_secs(), "stopped waiting for job");
            }
        }
    }
}
