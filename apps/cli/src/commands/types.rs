//! Command argument definitions shared between main.rs and tests.

use clap::{Args, ValueEnum};
use sagekit_jobs::JobKind;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    Training,
    Transform,
}

impl From<KindArg> for JobKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Training => JobKind::Training,
            KindArg::Transform => JobKind::Transform,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Labeled CSV with the label in the first column
    pub table: PathBuf,

    /// Output directory (gets `input/` and `labels/` subdirectories)
    #[arg(short, long)]
    pub out: PathBuf,

    /// Number of batch files to write
    #[arg(long, default_value_t = 10)]
    pub files: usize,

    /// Rows sampled into each file
    #[arg(long, default_value_t = 100)]
    pub rows: usize,

    /// Prepend an ID column to every feature row
    #[arg(long)]
    pub ids: bool,

    /// The table has a header row to skip
    #[arg(long)]
    pub header: bool,

    /// Seed for reproducible sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// Directory to archive (hidden files are skipped)
    pub source: PathBuf,

    /// Archive path, e.g. model.tar.gz
    #[arg(short, long)]
    pub out: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Label file written by `skit split`
    #[arg(long)]
    pub labels: PathBuf,

    /// Prediction file downloaded from a transform job (`*.out`)
    #[arg(long)]
    pub predictions: PathBuf,

    /// Fail when accuracy is below this fraction
    #[arg(long)]
    pub min_accuracy: Option<f64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Training data: an s3:// prefix or a local file/directory to upload
    #[arg(long)]
    pub data: String,

    /// Input channel name
    #[arg(long, default_value = "train")]
    pub channel: String,

    /// Training container image
    #[arg(long)]
    pub image: String,

    /// Hyperparameter as key=value (repeatable)
    #[arg(long = "hp", value_parser = parse_key_val)]
    pub hyperparameters: Vec<(String, String)>,

    /// Job name prefix; a timestamp is appended
    #[arg(long, default_value = "sagekit-train")]
    pub prefix: String,

    /// Instance type override, e.g. ml.c5.xlarge
    #[arg(long)]
    pub instance_type: Option<String>,

    /// Submit and return without waiting
    #[arg(long)]
    pub no_wait: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TransformArgs {
    /// Registered model to run
    #[arg(long)]
    pub model: String,

    /// Input files: an s3:// prefix or a local file/directory to upload
    #[arg(long)]
    pub input: String,

    /// Columns sent to the model, e.g. `$[1:]`
    #[arg(long)]
    pub input_filter: Option<String>,

    /// Append predictions to the input record
    #[arg(long)]
    pub join: bool,

    /// Columns kept in the output, e.g. `$[0,-1]`
    #[arg(long)]
    pub output_filter: Option<String>,

    /// Job name prefix; a timestamp is appended
    #[arg(long, default_value = "sagekit-batch")]
    pub prefix: String,

    /// Download prediction files here once the job completes
    #[arg(long)]
    pub download: Option<PathBuf>,

    /// Submit and return without waiting
    #[arg(long)]
    pub no_wait: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct JobRefArgs {
    /// Job kind
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Job name
    pub name: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WaitArgs {
    #[command(flatten)]
    pub job: JobRefArgs,

    /// Give up after this many seconds (the job keeps running)
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterModelArgs {
    /// Completed training job whose artifact is registered
    #[arg(long)]
    pub job: String,

    /// Model name
    #[arg(long)]
    pub name: String,

    /// Inference container image
    #[arg(long)]
    pub image: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(parse_key_val("max_leaf_nodes=30").unwrap(), ("max_leaf_nodes".to_string(), "30".to_string()));
        assert!(parse_key_val("=30").is_err());
        assert!(parse_key_val("novalue").is_err());
    }
}
