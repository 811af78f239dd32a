//! Request builders for training and transform jobs.
//!
//! Builders only assemble data: callers supply a name, data locations and
//! optionally a resource shape, and `build()` fills everything else from the
//! [`SessionConfig`]. No remote call happens here.

use crate::config::SessionConfig;
use crate::error::{JobError, JobResult};
use crate::filter::ColumnSelector;
use crate::job::{
    AssemblyType, BatchStrategy, CompressionType, DataProcessing, InputChannel, JobName, JobParams,
    JobSpec, JoinSource, ResourceShape, SplitType, StoppingCondition, TrainingParams, TransformParams,
};
use crate::layout::JobLayout;
use crate::storage::{ObjectStore, StorageUri};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Upload a local file or directory so it can be referenced by a job input.
pub async fn stage_local_inputs(
    store: &dyn ObjectStore,
    local: &Path,
    dest: &StorageUri,
) -> JobResult<StorageUri> {
    let uri = store.upload(local, dest).await?;
    info!(local = %local.display(), uri = %uri, "staged local inputs");
    Ok(uri)
}

#[derive(Debug, Clone)]
pub struct TrainingJobBuilder<'a> {
    config: &'a SessionConfig,
    name: JobName,
    image: Option<String>,
    role_arn: Option<String>,
    channels: Vec<InputChannel>,
    output: Option<StorageUri>,
    resources: Option<ResourceShape>,
    max_runtime_secs: Option<u64>,
    spot_max_wait_secs: Option<u64>,
    hyperparameters: BTreeMap<String, String>,
}

impl<'a> TrainingJobBuilder<'a> {
    pub fn new(config: &'a SessionConfig, name: JobName) -> Self {
        Self {
            config,
            name,
            image: None,
            role_arn: None,
            channels: Vec::new(),
            output: None,
            resources: None,
            max_runtime_secs: None,
            spot_max_wait_secs: None,
            hyperparameters: BTreeMap::new(),
        }
    }

    /// Builder for a job named `<prefix>-<timestamp>`.
    pub fn with_unique_name(config: &'a SessionConfig, prefix: &str) -> JobResult<Self> {
        Ok(Self::new(config, JobName::unique(prefix)?))
    }

    #[must_use]
    pub fn name(&self) -> &JobName {
        &self.name
    }

    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    #[must_use]
    pub fn role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    #[must_use]
    pub fn channel(mut self, name: impl Into<String>, uri: StorageUri) -> Self {
        self.channels.push(InputChannel::new(name, uri));
        self
    }

    #[must_use]
    pub fn input(mut self, channel: InputChannel) -> Self {
        self.channels.push(channel);
        self
    }

    #[must_use]
    pub fn output(mut self, uri: StorageUri) -> Self {
        self.output = Some(uri);
        self
    }

    #[must_use]
    pub fn resources(mut self, resources: ResourceShape) -> Self {
        self.resources = Some(resources);
        self
    }

    #[must_use]
    pub fn max_runtime_secs(mut self, secs: u64) -> Self {
        self.max_runtime_secs = Some(secs);
        self
    }

    /// Run on spare capacity, waiting at most `max_wait_secs` overall.
    #[must_use]
    pub fn managed_spot(mut self, max_wait_secs: u64) -> Self {
        self.spot_max_wait_secs = Some(max_wait_secs);
        self
    }

    #[must_use]
    pub fn hyperparameter(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.hyperparameters.insert(name.into(), value.to_string());
        self
    }

    pub fn build(self) -> JobResult<JobSpec> {
        let image = self
            .image
            .ok_or_else(|| JobError::SpecValidation("training image is required".to_string()))?;
        let role_arn = match self.role_arn {
            Some(role) => role,
            None => self.config.role()?.to_string(),
        };
        let output = match self.output {
            Some(uri) => uri,
            None => JobLayout::for_config(self.config)?.training_output(),
        };

        let managed_spot = self.spot_max_wait_secs.is_some();
        let spec = JobSpec {
            name: self.name,
            created_at: Utc::now(),
            inputs: self.channels,
            output,
            resources: self.resources.unwrap_or_else(|| self.config.training.resources()),
            stopping: StoppingCondition {
                max_runtime_secs: self
                    .max_runtime_secs
                    .unwrap_or(self.config.training.max_runtime_secs),
                max_wait_secs: self.spot_max_wait_secs,
            },
            params: JobParams::Training(TrainingParams {
                image,
                role_arn,
                hyperparameters: self.hyperparameters,
                managed_spot,
            }),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[derive(Debug, Clone)]
pub struct TransformJobBuilder<'a> {
    config: &'a SessionConfig,
    name: JobName,
    model_name: String,
    input: Option<StorageUri>,
    output: Option<StorageUri>,
    resources: Option<ResourceShape>,
    max_runtime_secs: Option<u64>,
    content_type: Option<String>,
    split_type: SplitType,
    compression: CompressionType,
    accept: Option<String>,
    assemble_with: AssemblyType,
    batch_strategy: BatchStrategy,
    input_filter: Option<String>,
    join_source: JoinSource,
    output_filter: Option<String>,
}

impl<'a> TransformJobBuilder<'a> {
    pub fn new(config: &'a SessionConfig, name: JobName, model_name: impl Into<String>) -> Self {
        Self {
            config,
            name,
            model_name: model_name.into(),
            input: None,
            output: None,
            resources: None,
            max_runtime_secs: None,
            content_type: None,
            split_type: SplitType::Line,
            compression: CompressionType::None,
            accept: None,
            assemble_with: AssemblyType::Line,
            batch_strategy: BatchStrategy::MultiRecord,
            input_filter: None,
            join_source: JoinSource::None,
            output_filter: None,
        }
    }

    pub fn with_unique_name(
        config: &'a SessionConfig,
        prefix: &str,
        model_name: impl Into<String>,
    ) -> JobResult<Self> {
        Ok(Self::new(config, JobName::unique(prefix)?, model_name))
    }

    #[must_use]
    pub fn name(&self) -> &JobName {
        &self.name
    }

    /// Prefix holding the input files; every object under it is transformed.
    #[must_use]
    pub fn input(mut self, uri: StorageUri) -> Self {
        self.input = Some(uri);
        self
    }

    #[must_use]
    pub fn output(mut self, uri: StorageUri) -> Self {
        self.output = Some(uri);
        self
    }

    #[must_use]
    pub fn resources(mut self, resources: ResourceShape) -> Self {
        self.resources = Some(resources);
        self
    }

    #[must_use]
    pub fn max_runtime_secs(mut self, secs: u64) -> Self {
        self.max_runtime_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn split_type(mut self, split_type: SplitType) -> Self {
        self.split_type = split_type;
        self
    }

    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    #[must_use]
    pub fn assemble_with(mut self, assemble_with: AssemblyType) -> Self {
        self.assemble_with = assemble_with;
        self
    }

    #[must_use]
    pub fn batch_strategy(mut self, strategy: BatchStrategy) -> Self {
        self.batch_strategy = strategy;
        self
    }

    /// Columns of each input record sent to the model, e.g. `$[1:]`.
    #[must_use]
    pub fn input_filter(mut self, expr: impl Into<String>) -> Self {
        self.input_filter = Some(expr.into());
        self
    }

    /// Append each prediction to its original input record.
    #[must_use]
    pub fn join_with_input(mut self) -> Self {
        self.join_source = JoinSource::Input;
        self
    }

    /// Columns of the (joined) output record that are kept, e.g. `$[0,-1]`.
    #[must_use]
    pub fn output_filter(mut self, expr: impl Into<String>) -> Self {
        self.output_filter = Some(expr.into());
        self
    }

    fn data_processing(&self) -> JobResult<Option<DataProcessing>> {
        if self.input_filter.is_none() && self.output_filter.is_none() && self.join_source == JoinSource::None {
            return Ok(None);
        }
        let parse = |expr: &Option<String>| match expr {
            Some(raw) => ColumnSelector::parse(raw),
            None => Ok(ColumnSelector::all()),
        };
        Ok(Some(DataProcessing {
            input_filter: parse(&self.input_filter)?,
            join_source: self.join_source,
            output_filter: parse(&self.output_filter)?,
        }))
    }

    pub fn build(self) -> JobResult<JobSpec> {
        let data_processing = self.data_processing()?;
        let input = self
            .input
            .ok_or_else(|| JobError::SpecValidation("transform input prefix is required".to_string()))?;
        let output = match self.output {
            Some(uri) => uri,
            None => JobLayout::for_config(self.config)?.transform_output(&self.name),
        };
        let defaults = &self.config.transform;

        let spec = JobSpec {
            name: self.name,
            created_at: Utc::now(),
            inputs: vec![InputChannel::new("input", input)],
            output,
            resources: self.resources.unwrap_or_else(|| defaults.resources()),
            stopping: StoppingCondition {
                max_runtime_secs: self.max_runtime_secs.unwrap_or(defaults.max_runtime_secs),
                max_wait_secs: None,
            },
            params: JobParams::Transform(TransformParams {
                model_name: self.model_name,
                content_type: self.content_type.unwrap_or_else(|| defaults.content_type.clone()),
                split_type: self.split_type,
                compression: self.compression,
                accept: self.accept,
                assemble_with: self.assemble_with,
                batch_strategy: self.batch_strategy,
                data_processing,
            }),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;

    fn config() -> SessionConfig {
        SessionConfig {
            default_bucket: Some("workshop".to_string()),
            role_arn: Some("arn:aws:iam::123456789012:role/sagekit".to_string()),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_training_defaults_come_from_config() {
        let cfg = config();
        let spec = TrainingJobBuilder::new(&cfg, JobName::new("tree-1").unwrap())
            .image("decision-trees:latest")
            .channel("train", StorageUri::parse("s3://workshop/data/train").unwrap())
            .hyperparameter("max_leaf_nodes", 30)
            .build()
            .unwrap();

        assert_eq!(spec.kind(), JobKind::Training);
        assert_eq!(spec.resources.instance_type, "ml.m5.large");
        assert_eq!(spec.stopping.max_runtime_secs, 86_400);
        assert_eq!(spec.output.to_string(), "s3://workshop/sagekit/models");
        let params = spec.training().unwrap();
        assert_eq!(params.hyperparameters["max_leaf_nodes"], "30");
        assert_eq!(params.role_arn, "arn:aws:iam::123456789012:role/sagekit");
    }

    #[test]
    fn test_training_requires_image_and_channel() {
        let cfg = config();
        let no_image = TrainingJobBuilder::new(&cfg, JobName::new("a").unwrap())
            .channel("train", StorageUri::parse("s3://workshop/x").unwrap())
            .build();
        assert!(matches!(no_image, Err(JobError::SpecValidation(_))));

        let no_channel = TrainingJobBuilder::new(&cfg, JobName::new("a").unwrap()).image("img").build();
        assert!(matches!(no_channel, Err(JobError::SpecValidation(_))));
    }

    #[test]
    fn test_transform_output_embeds_job_name() {
        let cfg = config();
        let spec = TransformJobBuilder::new(&cfg, JobName::new("batch-7").unwrap(), "tree-model")
            .input(StorageUri::parse("s3://workshop/batch/in").unwrap())
            .build()
            .unwrap();
        assert_eq!(spec.output.to_string(), "s3://workshop/sagekit/transform/batch-7");
        assert!(spec.transform().unwrap().data_processing.is_none());
    }

    #[test]
    fn test_transform_data_processing_filters() {
        let cfg = config();
        let spec = TransformJobBuilder::new(&cfg, JobName::new("batch-ids").unwrap(), "tree-model")
            .input(StorageUri::parse("s3://workshop/batch/ids").unwrap())
            .input_filter("$[1:]")
            .join_with_input()
            .output_filter("$[0,-1]")
            .build()
            .unwrap();
        let dp = spec.transform().unwrap().data_processing.clone().unwrap();
        assert_eq!(dp.input_filter.as_str(), "$[1:]");
        assert_eq!(dp.join_source, JoinSource::Input);
        assert_eq!(dp.output_filter.as_str(), "$[0,-1]");
    }

    #[test]
    fn test_transform_rejects_bad_filter() {
        let cfg = config();
        let err = TransformJobBuilder::new(&cfg, JobName::new("b").unwrap(), "m")
            .input(StorageUri::parse("s3://workshop/in").unwrap())
            .input_filter("$.features")
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::SpecValidation(_)));
    }
}
