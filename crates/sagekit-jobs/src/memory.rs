//! In-memory control plane and object store.
//!
//! `MemoryControlPlane` advances each job one step per `describe` call and
//! finalizes it after a configurable number of steps, so tests can drive the
//! full submit/wait/inspect cycle deterministically without a managed service.
//! Transform jobs really read their inputs from the paired
//! [`MemoryObjectStore`], apply `DataProcessing` filters and a caller-supplied
//! predictor, and write one `<input>.out` per input object.

use crate::artifacts::transform_output_uri;
use crate::control_plane::{
    ControlPlane, EndpointHandle, EndpointSpec, EndpointStatus, ModelHandle, ModelSpec,
};
use crate::error::{JobError, JobResult};
use crate::job::{
    CompressionType, DataProcessing, JobDescription, JobHandle, JobKind, JobName, JobSpec, JobStatus,
    JoinSource, SplitType,
};
use crate::layout::model_artifact_uri;
use crate::storage::{ObjectStore, StorageUri};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Object store kept in a map, shared between a test and the fake control plane.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<StorageUri, Bytes>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<StorageUri, Bytes>> {
        self.objects.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn insert(&self, uri: StorageUri, data: impl Into<Bytes>) {
        self.lock().insert(uri, data.into());
    }

    pub fn read(&self, uri: &StorageUri) -> Option<Bytes> {
        self.lock().get(uri).cloned()
    }

    pub fn keys_under(&self, prefix: &StorageUri) -> Vec<StorageUri> {
        self.lock().keys().filter(|k| k.is_under(prefix)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, uri: &StorageUri, data: Bytes) -> JobResult<()> {
        self.insert(uri.clone(), data);
        Ok(())
    }

    async fn get(&self, uri: &StorageUri) -> JobResult<Bytes> {
        self.read(uri).ok_or_else(|| JobError::NotFound(uri.to_string()))
    }

    async fn list(&self, prefix: &StorageUri) -> JobResult<Vec<StorageUri>> {
        Ok(self.keys_under(prefix))
    }
}

/// Maps the model-visible fields of one record to a prediction.
pub type Predictor = Arc<dyn Fn(&[&str]) -> String + Send + Sync>;

/// How a job ends once its steps are used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Complete,
    Fail(String),
    Stop,
}

struct JobRecord {
    spec: JobSpec,
    handle: JobHandle,
    status: JobStatus,
    steps: u32,
    secondary: Option<String>,
    model_artifact: Option<StorageUri>,
    output_path: Option<StorageUri>,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn describe(&self) -> JobDescription {
        JobDescription {
            handle: self.handle.clone(),
            status: self.status.clone(),
            secondary_status: self.secondary.clone(),
            model_artifact: self.model_artifact.clone(),
            output_path: self.output_path.clone(),
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}

struct EndpointRecord {
    handle: EndpointHandle,
    steps: u32,
    status: EndpointStatus,
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobName, JobRecord>,
    models: HashMap<String, ModelSpec>,
    endpoints: HashMap<String, EndpointRecord>,
    scripts: HashMap<String, ScriptedOutcome>,
    submission_error: Option<String>,
    describe_calls: u64,
}

pub struct MemoryControlPlane {
    region: String,
    account: String,
    store: Arc<MemoryObjectStore>,
    steps_to_finish: u32,
    predictor: Predictor,
    state: Mutex<State>,
}

impl std::fmt::Debug for MemoryControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryControlPlane")
            .field("region", &self.region)
            .field("steps_to_finish", &self.steps_to_finish)
            .finish_non_exhaustive()
    }
}

impl MemoryControlPlane {
    #[must_use]
    pub fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self {
            region: "us-east-1".to_string(),
            account: "000000000000".to_string(),
            store,
            steps_to_finish: 3,
            predictor: Arc::new(|_| "0".to_string()),
            state: Mutex::new(State::default()),
        }
    }

    /// Number of `describe` calls before a job (or endpoint) finishes.
    #[must_use]
    pub fn with_steps_to_finish(mut self, steps: u32) -> Self {
        self.steps_to_finish = steps.max(1);
        self
    }

    #[must_use]
    pub fn with_predictor(mut self, predictor: impl Fn(&[&str]) -> String + Send + Sync + 'static) -> Self {
        self.predictor = Arc::new(predictor);
        self
    }

    /// Decide how the job named `name` ends. Unscripted jobs complete.
    pub fn script(&self, name: &str, outcome: ScriptedOutcome) {
        self.lock().scripts.insert(name.to_string(), outcome);
    }

    /// Reject every following submission with `message` (e.g. an access error).
    pub fn reject_submissions(&self, message: Option<String>) {
        self.lock().submission_error = message;
    }

    pub fn describe_calls(&self) -> u64 {
        self.lock().describe_calls
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn arn(&self, resource: &str, name: &str) -> String {
        format!("arn:aws:sagemaker:{}:{}:{}/{}", self.region, self.account, resource, name.to_lowercase())
    }

    fn submit(&self, spec: &JobSpec, kind: JobKind) -> JobResult<JobHandle> {
        let reject = |message: String| JobError::SubmissionRejected { job: spec.name.to_string(), message };

        if spec.kind() != kind {
            return Err(reject(format!("ValidationException: expected a {kind} job spec")));
        }
        spec.validate().map_err(|e| reject(format!("ValidationException: {e}")))?;

        let mut state = self.lock();
        if let Some(message) = &state.submission_error {
            return Err(reject(message.clone()));
        }
        if let Some(existing) = state.jobs.get(&spec.name) {
            return Err(reject(format!(
                "ResourceInUse: job name must be unique within the account and region; {} already exists",
                existing.handle.arn
            )));
        }

        let resource = match kind {
            JobKind::Training => "training-job",
            JobKind::Transform => "transform-job",
        };
        let handle = JobHandle { kind, name: spec.name.clone(), arn: self.arn(resource, spec.name.as_str()) };
        state.jobs.insert(
            spec.name.clone(),
            JobRecord {
                spec: spec.clone(),
                handle: handle.clone(),
                status: JobStatus::InProgress,
                steps: 0,
                secondary: Some("Starting".to_string()),
                model_artifact: None,
                output_path: None,
                created_at: Utc::now(),
                ended_at: None,
            },
        );
        debug!(job = %handle.name, kind = %kind, "memory control plane accepted job");
        Ok(handle)
    }

    fn finish(&self, record: &mut JobRecord, outcome: ScriptedOutcome, model_known: bool) {
        let result = match outcome {
            ScriptedOutcome::Fail(reason) => Err(reason),
            ScriptedOutcome::Stop => {
                record.status = JobStatus::Stopped;
                record.secondary = Some("Stopped".to_string());
                record.ended_at = Some(Utc::now());
                return;
            }
            ScriptedOutcome::Complete => match record.handle.kind {
                JobKind::Training => self.finish_training(record),
                JobKind::Transform => self.finish_transform(record, model_known),
            },
        };

        match result {
            Ok(()) => {
                record.status = JobStatus::Completed;
                record.secondary = Some("Completed".to_string());
            }
            Err(reason) => {
                record.status = JobStatus::Failed { reason };
                record.secondary = Some("Failed".to_string());
            }
        }
        record.ended_at = Some(Utc::now());
    }

    fn finish_training(&self, record: &mut JobRecord) -> Result<(), String> {
        let spec = &record.spec;
        let mut channels = BTreeMap::new();
        for channel in &spec.inputs {
            let objects = self.store.keys_under(&channel.uri);
            if objects.is_empty() {
                return Err(format!(
                    "ClientError: No data found in channel {} at {}",
                    channel.name, channel.uri
                ));
            }
            channels.insert(channel.name.clone(), objects.len());
        }

        let hyperparameters = spec.training().map(|p| p.hyperparameters.clone()).unwrap_or_default();
        let summary = serde_json::json!({
            "job": spec.name.as_str(),
            "hyperparameters": hyperparameters,
            "channels": channels,
        });
        let artifact = model_artifact_uri(&spec.output, &spec.name);
        self.store.insert(artifact.clone(), summary.to_string());
        record.model_artifact = Some(artifact);
        Ok(())
    }

    fn finish_transform(&self, record: &mut JobRecord, model_known: bool) -> Result<(), String> {
        let spec = &record.spec;
        let params = spec.transform().ok_or_else(|| "ClientError: not a transform job".to_string())?;
        if !model_known {
            return Err(format!("ClientError: Could not find model \"{}\"", params.model_name));
        }

        let input_prefix = &spec.inputs[0].uri;
        let inputs = self.store.keys_under(input_prefix);
        if inputs.is_empty() {
            return Err(format!("ClientError: No data found under {input_prefix}"));
        }

        let processing = params.data_processing.clone().unwrap_or_default();
        for input in inputs {
            let raw = self
                .store
                .read(&input)
                .ok_or_else(|| format!("ClientError: {input} disappeared during the job"))?;
            let text = decode(&raw, params.compression)
                .map_err(|e| format!("ClientError: could not read {input}: {e}"))?;

            let records: Vec<&str> = match params.split_type {
                SplitType::Line => text.lines().map(|l| l.trim_end_matches('\r')).filter(|l| !l.is_empty()).collect(),
                _ => vec![text.trim_end()],
            };

            let mut out = String::new();
            for record in records {
                let line = self
                    .transform_record(record, &processing)
                    .map_err(|e| format!("ClientError: {input}: {e}"))?;
                out.push_str(&line);
                out.push('\n');
            }

            let output = transform_output_uri(input_prefix, &spec.output, &input);
            self.store.insert(output, out);
        }

        record.output_path = Some(spec.output.clone());
        Ok(())
    }

    fn transform_record(&self, record: &str, processing: &DataProcessing) -> JobResult<String> {
        let fields: Vec<&str> = record.split(',').collect();
        let features = processing.input_filter.apply(&fields)?;
        let prediction = (self.predictor)(&features);

        let mut joined: Vec<&str> = match processing.join_source {
            JoinSource::Input => fields.clone(),
            JoinSource::None => Vec::new(),
        };
        joined.push(prediction.as_str());

        Ok(processing.output_filter.apply(&joined)?.join(","))
    }
}

fn decode(raw: &Bytes, compression: CompressionType) -> std::io::Result<String> {
    match compression {
        CompressionType::None => String::from_utf8(raw.to_vec())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        CompressionType::Gzip => {
            let mut text = String::new();
            GzDecoder::new(raw.as_ref()).read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn secondary_for(kind: JobKind, step: u32) -> &'static str {
    match (kind, step) {
        (_, 0 | 1) => "Starting",
        (JobKind::Training, 2) => "Downloading",
        (JobKind::Training, _) => "Training",
        (JobKind::Transform, _) => "Transforming",
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn submit_training(&self, spec: &JobSpec) -> JobResult<JobHandle> {
        self.submit(spec, JobKind::Training)
    }

    async fn submit_transform(&self, spec: &JobSpec) -> JobResult<JobHandle> {
        self.submit(spec, JobKind::Transform)
    }

    async fn describe(&self, handle: &JobHandle) -> JobResult<JobDescription> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.describe_calls += 1;

        let outcome = state
            .scripts
            .get(handle.name.as_str())
            .cloned()
            .unwrap_or(ScriptedOutcome::Complete);
        let record = match state.jobs.get_mut(&handle.name) {
            Some(record) if record.handle.kind == handle.kind => record,
            _ => return Err(JobError::NotFound(format!("{handle} does not exist"))),
        };

        // Terminal states are final.
        if record.status.is_terminal() {
            return Ok(record.describe());
        }

        record.steps += 1;
        if record.steps >= self.steps_to_finish {
            let model_known = record
                .spec
                .transform()
                .is_none_or(|p| state.models.contains_key(&p.model_name));
            self.finish(record, outcome, model_known);
        } else {
            record.secondary = Some(secondary_for(record.handle.kind, record.steps).to_string());
        }
        Ok(record.describe())
    }

    async fn create_model(&self, spec: &ModelSpec) -> JobResult<ModelHandle> {
        crate::job::validate_name(&spec.name)?;
        if self.store.read(&spec.artifact).is_none() {
            return Err(JobError::Remote(format!(
                "ValidationException: could not find model data at {}",
                spec.artifact
            )));
        }

        let mut state = self.lock();
        if state.models.contains_key(&spec.name) {
            return Err(JobError::SubmissionRejected {
                job: spec.name.clone(),
                message: format!("ValidationException: cannot create already existing model \"{}\"", spec.name),
            });
        }
        state.models.insert(spec.name.clone(), spec.clone());
        Ok(ModelHandle { name: spec.name.clone(), arn: self.arn("model", &spec.name) })
    }

    async fn create_endpoint(&self, spec: &EndpointSpec) -> JobResult<EndpointHandle> {
        crate::job::validate_name(&spec.name)?;
        let mut state = self.lock();
        if !state.models.contains_key(&spec.model_name) {
            return Err(JobError::Remote(format!(
                "ValidationException: could not find model \"{}\"",
                spec.model_name
            )));
        }
        if state.endpoints.contains_key(&spec.name) {
            return Err(JobError::SubmissionRejected {
                job: spec.name.clone(),
                message: format!("ValidationException: endpoint \"{}\" already exists", spec.name),
            });
        }
        let handle = EndpointHandle { name: spec.name.clone(), arn: self.arn("endpoint", &spec.name) };
        state.endpoints.insert(
            spec.name.clone(),
            EndpointRecord { handle: handle.clone(), steps: 0, status: EndpointStatus::Creating },
        );
        Ok(handle)
    }

    async fn describe_endpoint(&self, handle: &EndpointHandle) -> JobResult<EndpointStatus> {
        let steps_to_finish = self.steps_to_finish;
        let mut state = self.lock();
        let record = state
            .endpoints
            .get_mut(&handle.name)
            .ok_or_else(|| JobError::NotFound(format!("endpoint {} does not exist", handle.name)))?;
        if !record.status.is_settled() {
            record.steps += 1;
            if record.steps >= steps_to_finish {
                record.status = EndpointStatus::InService;
            }
        }
        debug!(endpoint = %record.handle.name, status = %record.status, "memory endpoint status");
        Ok(record.status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{TrainingJobBuilder, TransformJobBuilder};
    use crate::config::SessionConfig;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn config() -> SessionConfig {
        SessionConfig {
            default_bucket: Some("workshop".to_string()),
            role_arn: Some("arn:aws:iam::123456789012:role/sagekit".to_string()),
            ..SessionConfig::default()
        }
    }

    fn uri(raw: &str) -> StorageUri {
        StorageUri::parse(raw).unwrap()
    }

    fn training_spec(cfg: &SessionConfig, name: &str) -> JobSpec {
        TrainingJobBuilder::new(cfg, JobName::new(name).unwrap())
            .image("decision-trees:latest")
            .channel("train", uri("s3://workshop/data/train"))
            .build()
            .unwrap()
    }

    async fn drive(plane: &MemoryControlPlane, handle: &JobHandle) -> JobDescription {
        loop {
            let desc = plane.describe(handle).await.unwrap();
            if desc.status.is_terminal() {
                return desc;
            }
        }
    }

    #[tokio::test]
    async fn test_training_writes_model_archive() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(uri("s3://workshop/data/train/iris.csv"), "0,5.1,3.5,1.4,0.2\n");
        let plane = MemoryControlPlane::new(store.clone());
        let cfg = config();

        let handle = plane.submit_training(&training_spec(&cfg, "tree-1")).await.unwrap();
        let first = plane.describe(&handle).await.unwrap();
        assert_eq!(first.status, JobStatus::InProgress);

        let desc = drive(&plane, &handle).await;
        assert_eq!(desc.status, JobStatus::Completed);
        let artifact = desc.model_artifact.unwrap();
        assert_eq!(artifact.to_string(), "s3://workshop/sagekit/models/tree-1/output/model.tar.gz");
        assert!(store.read(&artifact).is_some());
    }

    #[tokio::test]
    async fn test_empty_channel_fails_job() {
        let store = Arc::new(MemoryObjectStore::new());
        let plane = MemoryControlPlane::new(store).with_steps_to_finish(1);
        let handle = plane.submit_training(&training_spec(&config(), "tree-2")).await.unwrap();

        let desc = plane.describe(&handle).await.unwrap();
        let reason = desc.status.failure_reason().unwrap();
        assert!(reason.contains("No data found in channel train"), "{reason}");
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let store = Arc::new(MemoryObjectStore::new());
        let plane = MemoryControlPlane::new(store).with_steps_to_finish(2);
        plane.script("tree-3", ScriptedOutcome::Stop);
        let handle = plane.submit_training(&training_spec(&config(), "tree-3")).await.unwrap();

        let desc = drive(&plane, &handle).await;
        assert_eq!(desc.status, JobStatus::Stopped);
        for _ in 0..3 {
            assert_eq!(plane.describe(&handle).await.unwrap().status, JobStatus::Stopped);
        }
    }

    #[tokio::test]
    async fn test_duplicate_and_rejected_submissions() {
        let store = Arc::new(MemoryObjectStore::new());
        let plane = MemoryControlPlane::new(store);
        let cfg = config();
        let spec = training_spec(&cfg, "tree-4");

        plane.submit_training(&spec).await.unwrap();
        let err = plane.submit_training(&spec).await.unwrap_err();
        assert!(matches!(err, JobError::SubmissionRejected { ref message, .. } if message.starts_with("ResourceInUse")));

        plane.reject_submissions(Some("AccessDenied: not authorized".to_string()));
        let other = training_spec(&cfg, "tree-5");
        let err = plane.submit_training(&other).await.unwrap_err();
        assert!(matches!(err, JobError::SubmissionRejected { ref message, .. } if message.starts_with("AccessDenied")));
        assert_eq!(plane.job_count(), 1);
    }

    #[tokio::test]
    async fn test_transform_without_model_fails() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(uri("s3://workshop/batch/in/b0.csv"), "1,2\n");
        let plane = MemoryControlPlane::new(store).with_steps_to_finish(1);
        let cfg = config();
        let spec = TransformJobBuilder::new(&cfg, JobName::new("batch-1").unwrap(), "missing-model")
            .input(uri("s3://workshop/batch/in"))
            .build()
            .unwrap();

        let handle = plane.submit_transform(&spec).await.unwrap();
        let desc = plane.describe(&handle).await.unwrap();
        assert!(desc.status.failure_reason().unwrap().contains("missing-model"));
    }

    #[tokio::test]
    async fn test_gzip_transform_input_is_decoded() {
        let store = Arc::new(MemoryObjectStore::new());
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"1,2\n3,4\n").unwrap();
        store.insert(uri("s3://workshop/batch/gz/part.csv.gz"), encoder.finish().unwrap());
        store.insert(uri("s3://workshop/model.tar.gz"), "{}");

        let plane = MemoryControlPlane::new(store.clone())
            .with_steps_to_finish(1)
            .with_predictor(|fields| fields.len().to_string());
        let cfg = config();
        plane
            .create_model(&ModelSpec {
                name: "sum-model".to_string(),
                image: "img".to_string(),
                artifact: uri("s3://workshop/model.tar.gz"),
                role_arn: cfg.role().unwrap().to_string(),
            })
            .await
            .unwrap();

        let spec = TransformJobBuilder::new(&cfg, JobName::new("batch-gz").unwrap(), "sum-model")
            .input(uri("s3://workshop/batch/gz"))
            .compression(CompressionType::Gzip)
            .build()
            .unwrap();
        let handle = plane.submit_transform(&spec).await.unwrap();
        assert_eq!(plane.describe(&handle).await.unwrap().status, JobStatus::Completed);

        let out = store.read(&spec.output.join("part.csv.gz.out")).unwrap();
        assert_eq!(&out[..], b"2\n2\n");
    }

    #[tokio::test]
    async fn test_endpoint_goes_in_service() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(uri("s3://workshop/model.tar.gz"), "{}");
        let plane = MemoryControlPlane::new(store).with_steps_to_finish(2);
        plane
            .create_model(&ModelSpec {
                name: "tree-model".to_string(),
                image: "img".to_string(),
                artifact: uri("s3://workshop/model.tar.gz"),
                role_arn: "role".to_string(),
            })
            .await
            .unwrap();

        let handle = plane
            .create_endpoint(&EndpointSpec {
                name: "tree-endpoint".to_string(),
                model_name: "tree-model".to_string(),
                instance_type: "ml.m5.large".to_string(),
                instance_count: 1,
            })
            .await
            .unwrap();
        assert_eq!(plane.describe_endpoint(&handle).await.unwrap(), EndpointStatus::Creating);
        assert_eq!(plane.describe_endpoint(&handle).await.unwrap(), EndpointStatus::InService);
    }

    #[tokio::test]
    async fn test_model_needs_existing_artifact() {
        let plane = MemoryControlPlane::new(Arc::new(MemoryObjectStore::new()));
        let err = plane
            .create_model(&ModelSpec {
                name: "ghost".to_string(),
                image: "img".to_string(),
                artifact: uri("s3://workshop/nothing/model.tar.gz"),
                role_arn: "role".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Remote(_)));
    }
}
