//! Remote job commands: `describe`, `wait` and `register-model`, plus the
//! session setup shared by every command that talks to SageMaker.

use crate::commands::types::{JobRefArgs, RegisterModelArgs, WaitArgs};
use anyhow::{Context, Result};
use colored::Colorize;
use sagekit_jobs::{
    JobDescription, JobHandle, JobKind, JobName, JobStatus, Session, SessionConfig, StdoutProgressSink, StorageUri,
};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

#[cfg(not(feature = "aws"))]
#[allow(clippy::unused_async)]
pub async fn connect(_config: SessionConfig) -> Result<Session> {
    anyhow::bail!("Remote commands need the SageMaker backend. Rebuild with the `aws` feature.")
}

#[cfg(feature = "aws")]
pub async fn connect(config: SessionConfig) -> Result<Session> {
    use sagekit_jobs::aws::{load_sdk_config, S3ObjectStore, SageMakerControlPlane};
    use std::sync::Arc;

    let sdk = load_sdk_config(&config).await;
    let plane = Arc::new(SageMakerControlPlane::from_sdk_config(&sdk));
    let store = Arc::new(S3ObjectStore::from_sdk_config(&sdk));
    let session = Session::new(config, plane, store)?.with_progress(Arc::new(StdoutProgressSink));
    Ok(session)
}

/// An `s3://` uri is used as-is; anything else is a local path uploaded under `dest`.
pub async fn resolve_input(session: &Session, raw: &str, dest: &StorageUri) -> Result<StorageUri> {
    if raw.starts_with("s3://") {
        return Ok(StorageUri::parse(raw)?);
    }
    let uri = session
        .stage(Path::new(raw), dest)
        .await
        .with_context(|| format!("Failed to upload {raw}"))?;
    Ok(uri)
}

fn handle_for(kind: JobKind, name: &str) -> Result<JobHandle> {
    Ok(JobHandle { kind, name: JobName::new(name)?, arn: String::new() })
}

pub fn print_description(desc: &JobDescription) {
    let status = match &desc.status {
        JobStatus::Completed => desc.status.to_string().green(),
        JobStatus::Failed { .. } | JobStatus::Stopped => desc.status.to_string().red(),
        _ => desc.status.to_string().yellow(),
    };
    println!();
    println!("{}", format!("{} job {}", desc.handle.kind, desc.handle.name).bold().cyan());
    println!("  Status: {}", status);
    if let Some(secondary) = &desc.secondary_status {
        println!("  Detail: {}", secondary.dimmed());
    }
    if let Some(reason) = desc.status.failure_reason() {
        println!("  Reason: {}", reason.red());
    }
    if let Some(artifact) = &desc.model_artifact {
        println!("  Model artifact: {}", artifact.to_string().cyan());
    }
    if let Some(output) = &desc.output_path {
        println!("  Output: {}", output.to_string().cyan());
    }
    println!("  Created: {}", desc.created_at.to_rfc3339().dimmed());
    if let Some(ended) = desc.ended_at {
        println!("  Ended: {}", ended.to_rfc3339().dimmed());
    }
    println!();
}

pub async fn describe(config: SessionConfig, args: JobRefArgs) -> Result<()> {
    let session = connect(config).await?;
    let handle = handle_for(args.kind.into(), &args.name)?;
    let desc = session.describe(&handle).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&desc)?);
    } else {
        print_description(&desc);
    }
    Ok(())
}

pub async fn wait(config: SessionConfig, args: WaitArgs) -> Result<()> {
    let session = connect(config).await?;
    let handle = handle_for(args.job.kind.into(), &args.job.name)?;
    let waiter = match args.timeout_secs {
        Some(secs) => session.waiter().with_deadline(Some(Duration::from_secs(secs))),
        None => session.waiter(),
    };

    let desc = waiter.wait(session.plane(), &handle, &StdoutProgressSink).await?;
    if args.job.json {
        println!("{}", serde_json::to_string_pretty(&desc)?);
    } else {
        print_description(&desc);
    }
    sagekit_jobs::ensure_completed(&desc)?;
    Ok(())
}

pub async fn register_model(config: SessionConfig, args: RegisterModelArgs) -> Result<()> {
    let session = connect(config).await?;
    let handle = handle_for(JobKind::Training, &args.job)?;
    let desc = session.describe(&handle).await?;
    let model = session.register_model(&desc, &args.name, &args.image).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&json!({ "name": model.name, "arn": model.arn }))?);
        return Ok(());
    }

    println!();
    println!("{}", "Model registered".bold().green());
    println!("  Name: {}", model.name.cyan());
    println!("  ARN: {}", model.arn.dimmed());
    println!();
    Ok(())
}
