//! Local tabular data for batch transform runs.
//!
//! Tables are delimited text with the label in the first column and features
//! after it. Batch inputs are sampled from a labeled table and split into
//! feature-only files (what the transform job sees) and label-only files
//! (kept locally to check predictions against).

use crate::error::{JobError, JobResult};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const INPUT_DIR: &str = "input";
pub const LABELS_DIR: &str = "labels";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledTable {
    rows: Vec<Vec<String>>,
}

impl LabeledTable {
    /// Rows must all have the same width: one label plus at least one feature.
    pub fn from_rows(rows: Vec<Vec<String>>) -> JobResult<Self> {
        let Some(first) = rows.first() else {
            return Err(JobError::DataInconsistency("table has no rows".to_string()));
        };
        let width = first.len();
        if width < 2 {
            return Err(JobError::DataInconsistency(
                "table needs a label column and at least one feature".to_string(),
            ));
        }
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(JobError::DataInconsistency(format!(
                "row {} has {} columns, expected {}",
                idx + 1,
                row.len(),
                width
            )));
        }
        Ok(Self { rows })
    }

    pub fn read_csv(path: &Path, has_header: bool) -> JobResult<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(has_header).from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|f| f.trim().to_string()).collect());
        }
        Self::from_rows(rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub files: usize,
    pub rows_per_file: usize,
    /// Prepend an `ID` column to every feature row.
    pub with_ids: bool,
    pub seed: Option<u64>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { files: 10, rows_per_file: 100, with_ids: false, seed: None }
    }
}

/// One sampled batch file: features sent for inference and the true labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    pub name: String,
    pub features: Vec<Vec<String>>,
    pub labels: Vec<String>,
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

/// Paths written for one batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPaths {
    pub features: PathBuf,
    pub labels: PathBuf,
}

/// Sample `files` batches of `rows_per_file` rows each. Rows within a file
/// are distinct; different files are sampled independently.
pub fn sample_batches(table: &LabeledTable, options: &BatchOptions) -> JobResult<Vec<BatchFile>> {
    if options.files == 0 || options.rows_per_file == 0 {
        return Err(JobError::SpecValidation("files and rows_per_file must be >= 1".to_string()));
    }
    if options.rows_per_file > table.len() {
        return Err(JobError::SpecValidation(format!(
            "cannot sample {} distinct rows from a table of {}",
            options.rows_per_file,
            table.len()
        )));
    }

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut batches = Vec::with_capacity(options.files);
    for file_idx in 0..options.files {
        let picked = sample(&mut rng, table.len(), options.rows_per_file);
        let mut features = Vec::with_capacity(options.rows_per_file);
        let mut labels = Vec::with_capacity(options.rows_per_file);
        let mut ids = options.with_ids.then(Vec::new);

        for (n, row_idx) in picked.into_iter().enumerate() {
            let row = &table.rows[row_idx];
            labels.push(row[0].clone());
            let mut feature_row = row[1..].to_vec();
            if let Some(ids) = ids.as_mut() {
                let id = format!("{file_idx}-{n}");
                feature_row.insert(0, id.clone());
                ids.push(id);
            }
            features.push(feature_row);
        }

        batches.push(BatchFile { name: format!("batch_{file_idx}.csv"), features, labels, ids });
    }
    Ok(batches)
}

/// Write `<dir>/input/<name>` (features, no header) and `<dir>/labels/<name>`.
pub fn write_batches(dir: &Path, batches: &[BatchFile]) -> JobResult<Vec<BatchPaths>> {
    let input_dir = dir.join(INPUT_DIR);
    let labels_dir = dir.join(LABELS_DIR);
    std::fs::create_dir_all(&input_dir)?;
    std::fs::create_dir_all(&labels_dir)?;

    let mut written = Vec::with_capacity(batches.len());
    for batch in batches {
        let features = input_dir.join(&batch.name);
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&features)?;
        for row in &batch.features {
            writer.write_record(row)?;
        }
        writer.flush()?;

        let labels = labels_dir.join(&batch.name);
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(&labels)?;
        for (idx, label) in batch.labels.iter().enumerate() {
            match &batch.ids {
                Some(ids) => writer.write_record([ids[idx].as_str(), label.as_str()])?,
                None => writer.write_record([label.as_str()])?,
            }
        }
        writer.flush()?;

        written.push(BatchPaths { features, labels });
    }

    info!(dir = %dir.display(), files = written.len(), "wrote batch inputs");
    Ok(written)
}

/// Read a label file written by [`write_batches`]: one label per line, or
/// `id,label` when ids were generated.
pub fn read_labels(path: &Path) -> JobResult<Vec<(Option<String>, String)>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_path(path)?;
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        match record.len() {
            1 => out.push((None, record[0].trim().to_string())),
            2 => out.push((Some(record[0].trim().to_string()), record[1].trim().to_string())),
            n => {
                return Err(JobError::DataInconsistency(format!(
                    "{}: label rows have 1 or 2 columns, found {}",
                    path.display(),
                    n
                )));
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    pub rows: usize,
    pub matches: usize,
    pub accuracy: f64,
}

/// Compare predictions to the true labels row for row.
///
/// Differing row counts mean outputs cannot be aligned with their inputs and
/// are reported as a data inconsistency; label mismatches only lower accuracy.
pub fn verify_predictions(expected: &[String], predicted: &[String]) -> JobResult<PredictionReport> {
    if expected.len() != predicted.len() {
        return Err(JobError::DataInconsistency(format!(
            "expected {} predictions, found {}",
            expected.len(),
            predicted.len()
        )));
    }
    let matches = expected
        .iter()
        .zip(predicted)
        .filter(|(e, p)| labels_equal(e, p))
        .count();
    let accuracy = if expected.is_empty() { 1.0 } else { matches as f64 / expected.len() as f64 };
    Ok(PredictionReport { rows: expected.len(), matches, accuracy })
}

/// Check that joined `id,...,prediction` rows carry the expected ids in
/// order, returning the prediction column.
pub fn verify_joined_ids(ids: &[String], joined_rows: &[String]) -> JobResult<Vec<String>> {
    if ids.len() != joined_rows.len() {
        return Err(JobError::DataInconsistency(format!(
            "expected {} joined rows, found {}",
            ids.len(),
            joined_rows.len()
        )));
    }
    let mut predictions = Vec::with_capacity(ids.len());
    for (idx, (id, row)) in ids.iter().zip(joined_rows).enumerate() {
        let mut fields = row.split(',');
        let first = fields.next().unwrap_or_default().trim();
        if first != id {
            return Err(JobError::DataInconsistency(format!(
                "row {}: expected id {}, found {}",
                idx + 1,
                id,
                first
            )));
        }
        let Some(prediction) = fields.last().filter(|p| !p.trim().is_empty()) else {
            return Err(JobError::DataInconsistency(format!("row {}: no prediction after id {}", idx + 1, id)));
        };
        predictions.push(prediction.trim().to_string());
    }
    Ok(predictions)
}

/// Labels compare numerically when both parse (`1` == `1.0`), textually otherwise.
fn labels_equal(a: &str, b: &str) -> bool {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() < f64::EPSILON,
        _ => a.trim() == b.trim(),
    }
}
