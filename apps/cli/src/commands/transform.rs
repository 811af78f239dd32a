//! Batch transform command implementation.

use crate::commands::jobs::{connect, resolve_input};
use crate::commands::types::TransformArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use sagekit_jobs::SessionConfig;
use serde_json::json;

pub async fn execute(config: SessionConfig, args: TransformArgs) -> Result<()> {
    let session = connect(config).await?;
    let layout = session.layout()?;
    let builder = session.transform_job(&args.prefix, &args.model)?;
    let staging = layout.transform_input(builder.name());
    let input = resolve_input(&session, &args.input, &staging).await?;

    let mut builder = builder.input(input);
    if let Some(filter) = &args.input_filter {
        builder = builder.input_filter(filter);
    }
    if args.join {
        builder = builder.join_with_input();
    }
    if let Some(filter) = &args.output_filter {
        builder = builder.output_filter(filter);
    }
    let spec = builder.build()?;

    if args.no_wait {
        let handle = session.submit(&spec).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&handle)?);
        } else {
            println!();
            println!("{}", "Transform job submitted".bold().green());
            println!("  Job: {}", handle.name.to_string().cyan());
            println!("  Output: {}", spec.output.to_string().dimmed());
            println!();
        }
        return Ok(());
    }

    let outputs = session.transform(&spec).await?;
    let downloaded = match &args.download {
        Some(dir) => session
            .store()
            .download(&spec.output, dir)
            .await
            .with_context(|| format!("Failed to download outputs to {}", dir.display()))?,
        None => Vec::new(),
    };

    if args.json {
        let out = json!({ "job": spec.name, "outputs": outputs, "downloaded": downloaded });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Transform complete".bold().green());
    println!("  Job: {}", spec.name.to_string().cyan());
    println!("  Outputs: {}", outputs.len());
    for output in &outputs {
        println!("    {} {}", output.input.to_string().dimmed(), format!("-> {}", output.output).cyan());
    }
    if let Some(dir) = &args.download {
        println!("  Downloaded {} files to {}", downloaded.len(), dir.display().to_string().dimmed());
    }
    println!();
    Ok(())
}
