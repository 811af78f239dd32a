//! Training command implementation.

use crate::commands::jobs::{connect, resolve_input};
use crate::commands::types::TrainArgs;
use anyhow::Result;
use colored::Colorize;
use sagekit_jobs::{ResourceShape, SessionConfig};
use serde_json::json;

pub async fn execute(config: SessionConfig, args: TrainArgs) -> Result<()> {
    let session = connect(config).await?;
    let layout = session.layout()?;
    let builder = session.training_job(&args.prefix)?;
    let staging = layout.training_input(&args.channel, builder.name());
    let data = resolve_input(&session, &args.data, &staging).await?;

    let mut builder = builder.image(&args.image).channel(&args.channel, data);
    for (name, value) in &args.hyperparameters {
        builder = builder.hyperparameter(name, value);
    }
    if let Some(instance_type) = &args.instance_type {
        let defaults = session.config().training.resources();
        builder = builder.resources(ResourceShape { instance_type: instance_type.clone(), ..defaults });
    }
    let spec = builder.build()?;

    if args.no_wait {
        let handle = session.submit(&spec).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&handle)?);
        } else {
            println!();
            println!("{}", "Training job submitted".bold().green());
            println!("  Job: {}", handle.name.to_string().cyan());
            println!("  {}", format!("Follow with `skit wait training {}`", handle.name).dimmed());
            println!();
        }
        return Ok(());
    }

    let artifact = session.train(&spec).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&json!({ "job": spec.name, "artifact": artifact }))?);
        return Ok(());
    }

    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Job: {}", spec.name.to_string().cyan());
    println!("  Model artifact: {}", artifact.uri.to_string().cyan());
    println!(
        "  {}",
        format!("Register with `skit register-model --job {} --name <model> --image <image>`", spec.name).dimmed()
    );
    println!();
    Ok(())
}
