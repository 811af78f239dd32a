//! SageMaker and S3 backends.
//!
//! Every call maps one-to-one onto an SDK request; nothing here retries or
//! caches. Create-call failures surface as [`JobError::SubmissionRejected`]
//! with the service error code and message.

use crate::config::SessionConfig;
use crate::control_plane::{ControlPlane, EndpointHandle, EndpointSpec, EndpointStatus, ModelHandle, ModelSpec};
use crate::error::{JobError, JobResult};
use crate::job::{
    self, JobDescription, JobHandle, JobKind, JobName, JobSpec, JobStatus, TrainingParams, TransformParams,
};
use crate::storage::{ObjectStore, StorageUri};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_sagemaker as sm;
use aws_sdk_sagemaker::types as smt;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Shared SDK configuration for the session's region.
pub async fn load_sdk_config(config: &SessionConfig) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(s3::config::Region::new(config.region.clone()))
        .load()
        .await
}

fn describe_error(err: &impl ProvideErrorMetadata) -> String {
    match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(code), None) => code.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => "unknown service error".to_string(),
    }
}

fn rejected(job: &str, err: &impl ProvideErrorMetadata) -> JobError {
    JobError::SubmissionRejected { job: job.to_string(), message: describe_error(err) }
}

fn remote(err: impl std::fmt::Display) -> JobError {
    JobError::Remote(err.to_string())
}

fn to_chrono(dt: Option<&aws_smithy_types::DateTime>) -> Option<DateTime<Utc>> {
    dt.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

fn clamp_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Debug, Clone)]
pub struct SageMakerControlPlane {
    client: sm::Client,
}

impl SageMakerControlPlane {
    pub fn new(client: sm::Client) -> Self {
        Self { client }
    }

    pub fn from_sdk_config(sdk: &aws_config::SdkConfig) -> Self {
        Self::new(sm::Client::new(sdk))
    }

    fn training_request(
        &self,
        spec: &JobSpec,
        params: &TrainingParams,
    ) -> JobResult<sm::operation::create_training_job::builders::CreateTrainingJobFluentBuilder> {
        let algorithm = smt::AlgorithmSpecification::builder()
            .training_image(&params.image)
            .training_input_mode(smt::TrainingInputMode::File)
            .build()
            .map_err(remote)?;

        let mut request = self
            .client
            .create_training_job()
            .training_job_name(spec.name.as_str())
            .role_arn(&params.role_arn)
            .algorithm_specification(algorithm)
            .output_data_config(
                smt::OutputDataConfig::builder()
                    .s3_output_path(spec.output.to_string())
                    .build()
                    .map_err(remote)?,
            )
            .resource_config(
                smt::ResourceConfig::builder()
                    .instance_type(smt::TrainingInstanceType::from(spec.resources.instance_type.as_str()))
                    .instance_count(clamp_i32(u64::from(spec.resources.instance_count)))
                    .volume_size_in_gb(clamp_i32(u64::from(spec.resources.volume_size_gb.unwrap_or(10))))
                    .build()
                    .map_err(remote)?,
            )
            .stopping_condition(
                smt::StoppingCondition::builder()
                    .max_runtime_in_seconds(clamp_i32(spec.stopping.max_runtime_secs))
                    .set_max_wait_time_in_seconds(spec.stopping.max_wait_secs.map(clamp_i32))
                    .build(),
            )
            .enable_managed_spot_training(params.managed_spot);

        for channel in &spec.inputs {
            let source = smt::S3DataSource::builder()
                .s3_data_type(smt::S3DataType::S3Prefix)
                .s3_uri(channel.uri.to_string())
                .s3_data_distribution_type(smt::S3DataDistribution::FullyReplicated)
                .build()
                .map_err(remote)?;
            let built = smt::Channel::builder()
                .channel_name(&channel.name)
                .data_source(smt::DataSource::builder().s3_data_source(source).build())
                .set_content_type(channel.content_type.clone())
                .build()
                .map_err(remote)?;
            request = request.input_data_config(built);
        }

        for (name, value) in &params.hyperparameters {
            request = request.hyper_parameters(name, value);
        }
        Ok(request)
    }

    fn transform_request(
        &self,
        spec: &JobSpec,
        params: &TransformParams,
    ) -> JobResult<sm::operation::create_transform_job::builders::CreateTransformJobFluentBuilder> {
        let input = spec
            .inputs
            .first()
            .ok_or_else(|| JobError::SpecValidation("transform job needs one input".to_string()))?;

        let data_source = smt::TransformDataSource::builder()
            .s3_data_source(
                smt::TransformS3DataSource::builder()
                    .s3_data_type(smt::S3DataType::S3Prefix)
                    .s3_uri(input.uri.to_string())
                    .build()
                    .map_err(remote)?,
            )
            .build()
            .map_err(remote)?;

        let transform_input = smt::TransformInput::builder()
            .data_source(data_source)
            .content_type(&params.content_type)
            .split_type(match params.split_type {
                job::SplitType::None => smt::SplitType::None,
                job::SplitType::Line => smt::SplitType::Line,
                job::SplitType::RecordIO => smt::SplitType::RecordIo,
                job::SplitType::TFRecord => smt::SplitType::TfRecord,
            })
            .compression_type(match params.compression {
                job::CompressionType::None => smt::CompressionType::None,
                job::CompressionType::Gzip => smt::CompressionType::Gzip,
            })
            .build()
            .map_err(remote)?;

        let transform_output = smt::TransformOutput::builder()
            .s3_output_path(spec.output.to_string())
            .set_accept(params.accept.clone())
            .assemble_with(match params.assemble_with {
                job::AssemblyType::None => smt::AssemblyType::None,
                job::AssemblyType::Line => smt::AssemblyType::Line,
            })
            .build()
            .map_err(remote)?;

        let resources = smt::TransformResources::builder()
            .instance_type(smt::TransformInstanceType::from(spec.resources.instance_type.as_str()))
            .instance_count(clamp_i32(u64::from(spec.resources.instance_count)))
            .build()
            .map_err(remote)?;

        let mut request = self
            .client
            .create_transform_job()
            .transform_job_name(spec.name.as_str())
            .model_name(&params.model_name)
            .batch_strategy(match params.batch_strategy {
                job::BatchStrategy::SingleRecord => smt::BatchStrategy::SingleRecord,
                job::BatchStrategy::MultiRecord => smt::BatchStrategy::MultiRecord,
            })
            .transform_input(transform_input)
            .transform_output(transform_output)
            .transform_resources(resources);

        if let Some(processing) = &params.data_processing {
            request = request.data_processing(
                smt::DataProcessing::builder()
                    .input_filter(processing.input_filter.as_str())
                    .output_filter(processing.output_filter.as_str())
                    .join_source(match processing.join_source {
                        job::JoinSource::None => smt::JoinSource::None,
                        job::JoinSource::Input => smt::JoinSource::Input,
                    })
                    .build(),
            );
        }
        Ok(request)
    }

    async fn describe_training(&self, handle: &JobHandle) -> JobResult<JobDescription> {
        let out = self
            .client
            .describe_training_job()
            .training_job_name(handle.name.as_str())
            .send()
            .await
            .map_err(|e| JobError::Remote(describe_error(&e)))?;

        let reason = out.failure_reason().unwrap_or("unknown failure").to_string();
        let status = match out.training_job_status() {
            Some(smt::TrainingJobStatus::Completed) => JobStatus::Completed,
            Some(smt::TrainingJobStatus::Failed) => JobStatus::Failed { reason },
            Some(smt::TrainingJobStatus::Stopped) => JobStatus::Stopped,
            Some(smt::TrainingJobStatus::Stopping) => JobStatus::Stopping,
            _ => JobStatus::InProgress,
        };
        let model_artifact = out
            .model_artifacts()
            .and_then(|a| a.s3_model_artifacts())
            .map(StorageUri::parse)
            .transpose()?;

        Ok(JobDescription {
            handle: handle.clone(),
            status,
            secondary_status: out.secondary_status().map(|s| s.as_str().to_string()),
            model_artifact,
            output_path: None,
            created_at: to_chrono(out.creation_time()).unwrap_or_else(Utc::now),
            ended_at: to_chrono(out.training_end_time()),
        })
    }

    async fn describe_transform(&self, handle: &JobHandle) -> JobResult<JobDescription> {
        let out = self
            .client
            .describe_transform_job()
            .transform_job_name(handle.name.as_str())
            .send()
            .await
            .map_err(|e| JobError::Remote(describe_error(&e)))?;

        let reason = out.failure_reason().unwrap_or("unknown failure").to_string();
        let status = match out.transform_job_status() {
            Some(smt::TransformJobStatus::Completed) => JobStatus::Completed,
            Some(smt::TransformJobStatus::Failed) => JobStatus::Failed { reason },
            Some(smt::TransformJobStatus::Stopped) => JobStatus::Stopped,
            Some(smt::TransformJobStatus::Stopping) => JobStatus::Stopping,
            _ => JobStatus::InProgress,
        };
        let output_path = out
            .transform_output()
            .and_then(|o| o.s3_output_path())
            .map(StorageUri::parse)
            .transpose()?;

        Ok(JobDescription {
            handle: handle.clone(),
            status,
            secondary_status: None,
            model_artifact: None,
            output_path,
            created_at: to_chrono(out.creation_time()).unwrap_or_else(Utc::now),
            ended_at: to_chrono(out.transform_end_time()),
        })
    }
}

#[async_trait]
impl ControlPlane for SageMakerControlPlane {
    fn id(&self) -> &'static str {
        "sagemaker"
    }

    async fn submit_training(&self, spec: &JobSpec) -> JobResult<JobHandle> {
        let params = spec
            .training()
            .ok_or_else(|| JobError::SpecValidation(format!("{} is not a training job", spec.name)))?;
        let out = self
            .training_request(spec, params)?
            .send()
            .await
            .map_err(|e| rejected(spec.name.as_str(), &e))?;
        info!(job = %spec.name, "created training job");
        Ok(JobHandle {
            kind: JobKind::Training,
            name: spec.name.clone(),
            arn: out.training_job_arn().unwrap_or_default().to_string(),
        })
    }

    async fn submit_transform(&self, spec: &JobSpec) -> JobResult<JobHandle> {
        let params = spec
            .transform()
            .ok_or_else(|| JobError::SpecValidation(format!("{} is not a transform job", spec.name)))?;
        let out = self
            .transform_request(spec, params)?
            .send()
            .await
            .map_err(|e| rejected(spec.name.as_str(), &e))?;
        info!(job = %spec.name, model = %params.model_name, "created transform job");
        Ok(JobHandle {
            kind: JobKind::Transform,
            name: spec.name.clone(),
            arn: out.transform_job_arn().unwrap_or_default().to_string(),
        })
    }

    async fn describe(&self, handle: &JobHandle) -> JobResult<JobDescription> {
        match handle.kind {
            JobKind::Training => self.describe_training(handle).await,
            JobKind::Transform => self.describe_transform(handle).await,
        }
    }

    async fn create_model(&self, spec: &ModelSpec) -> JobResult<ModelHandle> {
        let container = smt::ContainerDefinition::builder()
            .image(&spec.image)
            .model_data_url(spec.artifact.to_string())
            .build();
        let out = self
            .client
            .create_model()
            .model_name(&spec.name)
            .execution_role_arn(&spec.role_arn)
            .primary_container(container)
            .send()
            .await
            .map_err(|e| rejected(&spec.name, &e))?;
        Ok(ModelHandle { name: spec.name.clone(), arn: out.model_arn().unwrap_or_default().to_string() })
    }

    async fn create_endpoint(&self, spec: &EndpointSpec) -> JobResult<EndpointHandle> {
        // One endpoint config per endpoint, named after it.
        let config_name = JobName::unique(&format!("{}-config", spec.name))?;
        let variant = smt::ProductionVariant::builder()
            .variant_name("AllTraffic")
            .model_name(&spec.model_name)
            .instance_type(smt::ProductionVariantInstanceType::from(spec.instance_type.as_str()))
            .initial_instance_count(clamp_i32(u64::from(spec.instance_count)))
            .build()
            .map_err(remote)?;
        self.client
            .create_endpoint_config()
            .endpoint_config_name(config_name.as_str())
            .production_variants(variant)
            .send()
            .await
            .map_err(|e| rejected(&spec.name, &e))?;
        debug!(endpoint = %spec.name, config = %config_name, "created endpoint config");

        let out = self
            .client
            .create_endpoint()
            .endpoint_name(&spec.name)
            .endpoint_config_name(config_name.as_str())
            .send()
            .await
            .map_err(|e| rejected(&spec.name, &e))?;
        Ok(EndpointHandle { name: spec.name.clone(), arn: out.endpoint_arn().unwrap_or_default().to_string() })
    }

    async fn describe_endpoint(&self, handle: &EndpointHandle) -> JobResult<EndpointStatus> {
        let out = self
            .client
            .describe_endpoint()
            .endpoint_name(&handle.name)
            .send()
            .await
            .map_err(|e| JobError::Remote(describe_error(&e)))?;
        Ok(match out.endpoint_status() {
            Some(smt::EndpointStatus::InService) => EndpointStatus::InService,
            Some(smt::EndpointStatus::Updating | smt::EndpointStatus::SystemUpdating) => EndpointStatus::Updating,
            Some(smt::EndpointStatus::OutOfService) => EndpointStatus::OutOfService,
            Some(smt::EndpointStatus::Deleting) => EndpointStatus::Deleting,
            Some(smt::EndpointStatus::Failed) => EndpointStatus::Failed {
                reason: out.failure_reason().unwrap_or("unknown failure").to_string(),
            },
            _ => EndpointStatus::Creating,
        })
    }
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: s3::Client) -> Self {
        Self { client }
    }

    pub fn from_sdk_config(sdk: &aws_config::SdkConfig) -> Self {
        Self::new(s3::Client::new(sdk))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, uri: &StorageUri, data: Bytes) -> JobResult<()> {
        self.client
            .put_object()
            .bucket(uri.bucket())
            .key(uri.key())
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| JobError::Storage(format!("put {uri}: {}", describe_error(&e))))?;
        Ok(())
    }

    async fn get(&self, uri: &StorageUri) -> JobResult<Bytes> {
        let out = self
            .client
            .get_object()
            .bucket(uri.bucket())
            .key(uri.key())
            .send()
            .await
            .map_err(|e| match e.code() {
                Some("NoSuchKey" | "NotFound") => JobError::NotFound(uri.to_string()),
                _ => JobError::Storage(format!("get {uri}: {}", describe_error(&e))),
            })?;
        let data = out
            .body
            .collect()
            .await
            .map_err(|e| JobError::Storage(format!("read {uri}: {e}")))?
            .into_bytes();
        Ok(data)
    }

    async fn list(&self, prefix: &StorageUri) -> JobResult<Vec<StorageUri>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(prefix.bucket())
            .prefix(prefix.key())
            .into_paginator()
            .send();

        let mut out = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| JobError::Storage(format!("list {prefix}: {}", describe_error(&e))))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let uri = StorageUri::new(prefix.bucket(), key)?;
                if uri.is_under(prefix) {
                    out.push(uri);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn exists(&self, uri: &StorageUri) -> JobResult<bool> {
        match self.client.head_object().bucket(uri.bucket()).key(uri.key()).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.code() == Some("NotFound") {
                    return Ok(false);
                }
                Err(JobError::Storage(format!("head {uri}: {}", describe_error(&err))))
            }
        }
    }
}
