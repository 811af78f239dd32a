use crate::storage::StorageUri;
use serde::{Deserialize, Serialize};

/// Suffix the transform service appends to each input object name.
pub const TRANSFORM_OUTPUT_SUFFIX: &str = ".out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Serialized model parameters (`model.tar.gz`) from a training job.
    ModelArchive,
    /// One prediction file of a transform job.
    TransformOutput,
}

/// Output produced by a completed job. Only valid once the job reports `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub uri: StorageUri,
}

/// A transform input object and the prediction file written for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub input: StorageUri,
    pub output: StorageUri,
}

impl TransformOutput {
    pub fn artifact(&self) -> Artifact {
        Artifact { kind: ArtifactKind::TransformOutput, uri: self.output.clone() }
    }
}

/// Where the output for `input` lands: its path relative to the input prefix,
/// placed under `output_prefix` with [`TRANSFORM_OUTPUT_SUFFIX`] appended.
pub fn transform_output_uri(
    input_prefix: &StorageUri,
    output_prefix: &StorageUri,
    input: &StorageUri,
) -> StorageUri {
    let rel = match input.relative_to(input_prefix) {
        Some(rel) if !rel.is_empty() => rel,
        _ => input.file_name().unwrap_or("input").to_string(),
    };
    output_prefix.join(&format!("{rel}{TRANSFORM_OUTPUT_SUFFIX}"))
}
