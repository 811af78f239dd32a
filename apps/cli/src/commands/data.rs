//! Local data commands: `split`, `package` and `verify`.

use crate::commands::types::{PackageArgs, SplitArgs, VerifyArgs};
use anyhow::{Context, Result};
use colored::Colorize;
use sagekit_jobs::dataset::{
    read_labels, sample_batches, verify_joined_ids, verify_predictions, write_batches, BatchOptions, LabeledTable,
};
use serde_json::json;

pub fn split(args: SplitArgs) -> Result<()> {
    let table = LabeledTable::read_csv(&args.table, args.header)
        .with_context(|| format!("Failed to read table: {}", args.table.display()))?;
    let options = BatchOptions { files: args.files, rows_per_file: args.rows, with_ids: args.ids, seed: args.seed };
    let batches = sample_batches(&table, &options)?;
    let written = write_batches(&args.out, &batches)?;

    if args.json {
        let files: Vec<_> = written
            .iter()
            .map(|p| json!({ "features": p.features, "labels": p.labels }))
            .collect();
        let out = json!({ "rows_in_table": table.len(), "rows_per_file": args.rows, "files": files });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Batch inputs written".bold().green());
    println!("  Table: {} rows x {} columns", table.len(), table.width());
    println!("  Files: {} x {} rows", written.len(), args.rows);
    if let Some(first) = written.first() {
        if let Some(dir) = first.features.parent() {
            println!("  Features: {}", dir.display().to_string().dimmed());
        }
        if let Some(dir) = first.labels.parent() {
            println!("  Labels: {}", dir.display().to_string().dimmed());
        }
    }
    println!();
    Ok(())
}

pub fn package(args: PackageArgs) -> Result<()> {
    let summary = sagekit_jobs::create_tar_gz(&args.source, &args.out)
        .with_context(|| format!("Failed to package {}", args.source.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("{}", "Archive created".bold().green());
    println!("  Path: {}", summary.path.display().to_string().cyan());
    println!("  Files: {}", summary.files);
    println!("  Size: {:.2} MB", summary.size_mb);
    println!("  SHA-256: {}", summary.sha256.dimmed());
    println!();
    Ok(())
}

pub fn verify(args: VerifyArgs) -> Result<()> {
    let labels = read_labels(&args.labels)
        .with_context(|| format!("Failed to read labels: {}", args.labels.display()))?;
    let text = std::fs::read_to_string(&args.predictions)
        .with_context(|| format!("Failed to read predictions: {}", args.predictions.display()))?;
    let rows: Vec<String> = text.lines().map(str::trim).filter(|l| !l.is_empty()).map(ToString::to_string).collect();

    let expected: Vec<String> = labels.iter().map(|(_, label)| label.clone()).collect();
    let ids: Option<Vec<String>> = labels.iter().map(|(id, _)| id.clone()).collect();
    let predictions = match &ids {
        Some(ids) => verify_joined_ids(ids, &rows)?,
        None => rows
            .iter()
            .map(|r| r.rsplit(',').next().unwrap_or(r).trim().to_string())
            .collect(),
    };
    let report = verify_predictions(&expected, &predictions)?;

    if args.json {
        let out = json!({
            "rows": report.rows,
            "matches": report.matches,
            "accuracy": report.accuracy,
            "ids_checked": ids.is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("{}", "Prediction check".bold().cyan());
        println!("  Rows: {}", report.rows);
        if ids.is_some() {
            println!("  IDs: {}", "aligned".green());
        }
        println!("  Accuracy: {:.2}% ({} / {})", report.accuracy * 100.0, report.matches, report.rows);
        println!();
    }

    if let Some(min) = args.min_accuracy {
        if report.accuracy < min {
            anyhow::bail!("accuracy {:.4} is below the required {:.4}", report.accuracy, min);
        }
    }
    Ok(())
}
