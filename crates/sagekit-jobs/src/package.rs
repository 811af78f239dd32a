//! Packaging a local directory into a `tar.gz` for upload as a model or
//! source archive.

use crate::error::{JobError, JobResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::{DirEntry, WalkDir};

/// Sizes are reported in decimal megabytes.
const BYTES_PER_MB: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub files: usize,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub sha256: String,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().is_some_and(|s| s.starts_with('.'))
}

/// Archive every non-hidden file under `source` into `dest`, with paths
/// relative to `source`. Hidden directories are skipped entirely.
pub fn create_tar_gz(source: &Path, dest: &Path) -> JobResult<ArchiveSummary> {
    if !source.is_dir() {
        return Err(JobError::SpecValidation(format!(
            "{} is not a directory",
            source.display()
        )));
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut files = 0usize;

    // Sorted so identical trees produce identical archives.
    let walker = WalkDir::new(source).sort_by_file_name().into_iter().filter_entry(|e| !is_hidden(e));
    for entry in walker {
        let entry = entry.map_err(|e| JobError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        // The archive itself may sit inside the source tree.
        if entry.path() == dest {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| JobError::Other(anyhow::anyhow!(e)))?;
        builder.append_path_with_name(entry.path(), rel)?;
        files += 1;
    }

    builder.into_inner()?.finish()?;

    let size_bytes = std::fs::metadata(dest)?.len();
    let sha256 = sha256_file(dest)?;
    let summary = ArchiveSummary {
        path: dest.to_path_buf(),
        files,
        size_bytes,
        size_mb: size_bytes as f64 / BYTES_PER_MB,
        sha256,
    };
    info!(path = %dest.display(), files, size_mb = %format!("{:.2}", summary.size_mb), "created archive");
    Ok(summary)
}

pub fn sha256_file(path: &Path) -> JobResult<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    #[test]
    fn test_hidden_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("model");
        std::fs::create_dir_all(src.join("weights")).unwrap();
        std::fs::create_dir_all(src.join(".git")).unwrap();
        std::fs::write(src.join("inference.py"), "print('hi')").unwrap();
        std::fs::write(src.join("weights/layer0.bin"), [1u8, 2, 3]).unwrap();
        std::fs::write(src.join(".env"), "SECRET=1").unwrap();
        std::fs::write(src.join(".git/HEAD"), "ref").unwrap();

        let dest = temp.path().join("out/model.tar.gz");
        let summary = create_tar_gz(&src, &dest).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.sha256.len(), 64);

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["inference.py", "weights/layer0.bin"]);
    }

    #[test]
    fn test_size_is_reported_in_decimal_megabytes() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("model");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("weights.bin"), vec![7u8; 64]).unwrap();

        let summary = create_tar_gz(&src, &temp.path().join("model.tar.gz")).unwrap();
        assert_eq!(summary.size_bytes, std::fs::metadata(temp.path().join("model.tar.gz")).unwrap().len());
        assert!((summary.size_mb - summary.size_bytes as f64 / 1_000_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_source_must_be_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(create_tar_gz(&file, &temp.path().join("a.tar.gz")).is_err());
    }
}
