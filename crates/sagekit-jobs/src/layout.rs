use crate::config::SessionConfig;
use crate::error::JobResult;
use crate::job::JobName;
use crate::storage::StorageUri;

/// Object storage layout for a session's jobs.
///
/// Default layout is under `s3://<bucket>/<prefix>/...`. Every output prefix
/// embeds the unique job name so concurrent runs never write to the same keys.
#[derive(Debug, Clone)]
pub struct JobLayout {
    base: StorageUri,
}

impl JobLayout {
    #[must_use]
    pub fn new(base: StorageUri) -> Self {
        Self { base }
    }

    pub fn for_config(config: &SessionConfig) -> JobResult<Self> {
        Ok(Self::new(config.base_uri()?))
    }

    #[must_use]
    pub fn base(&self) -> &StorageUri {
        &self.base
    }

    /// Where a named dataset is staged, e.g. `.../data/train`.
    #[must_use]
    pub fn data_prefix(&self, dataset: &str) -> StorageUri {
        self.base.join("data").join(dataset)
    }

    /// Training output root; the service appends `<job>/output/model.tar.gz`.
    #[must_use]
    pub fn training_output(&self) -> StorageUri {
        self.base.join("models")
    }

    #[must_use]
    pub fn batch_input(&self, batch: &str) -> StorageUri {
        self.base.join("batch").join(batch)
    }

    /// Staging prefix for one training job's channel, `.../data/<channel>/<job>`.
    #[must_use]
    pub fn training_input(&self, channel: &str, job: &JobName) -> StorageUri {
        self.data_prefix(channel).join(job.as_str())
    }

    /// Staging prefix for one transform job's input files, `.../batch/<job>`.
    #[must_use]
    pub fn transform_input(&self, job: &JobName) -> StorageUri {
        self.batch_input(job.as_str())
    }

    #[must_use]
    pub fn transform_output(&self, job: &JobName) -> StorageUri {
        self.base.join("transform").join(job.as_str())
    }
}

/// Location of the model archive a training job writes under `output`.
#[must_use]
pub fn model_artifact_uri(output: &StorageUri, job: &JobName) -> StorageUri {
    output.join(job.as_str()).join("output").join("model.tar.gz")
}
