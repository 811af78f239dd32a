//! Failure handling, model registration and endpoint deployment through `Session`.

mod common;

use common::{fixture, uri, write_iris, IMAGE};
use sagekit_jobs::{
    EndpointSpec, FailurePolicy, JobError, JobStatus, ObjectStore, ScriptedOutcome, TransformJobBuilder,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_abort_policy_raises_remote_failure() {
    let fx = fixture(2);
    let spec = fx
        .session
        .training_job("fails")
        .unwrap()
        .image(IMAGE)
        .channel("train", uri("s3://workshop/iris/data/empty"))
        .build()
        .unwrap();

    let err = fx.session.run(&spec).await.unwrap_err();
    match err {
        JobError::JobFailed { job, reason } => {
            assert_eq!(job, spec.name.as_str());
            assert!(reason.contains("No data found in channel train"));
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_report_policy_returns_failed_description() {
    let fx = fixture(2);
    let session = fx.session.clone().with_failure_policy(FailurePolicy::Report);
    let spec = session
        .training_job("reported")
        .unwrap()
        .image(IMAGE)
        .channel("train", uri("s3://workshop/iris/data/train"))
        .build()
        .unwrap();
    fx.plane.script(spec.name.as_str(), ScriptedOutcome::Fail("AlgorithmError: bad hyperparameter".to_string()));

    let desc = session.run(&spec).await.unwrap();
    assert_eq!(desc.status.failure_reason(), Some("AlgorithmError: bad hyperparameter"));

    // Registration still needs a completed job.
    let err = session.register_model(&desc, "never-registered", IMAGE).await.unwrap_err();
    assert!(err.is_remote_failure());
}

#[tokio::test]
async fn test_stopped_job_aborts() {
    let fx = fixture(1);
    let dir = TempDir::new().unwrap();
    let iris = write_iris(dir.path(), 10);
    let train_uri = fx.session.stage(&iris, &uri("s3://workshop/iris/data/train")).await.unwrap();
    let spec = fx.session.training_job("stopped").unwrap().image(IMAGE).channel("train", train_uri).build().unwrap();
    fx.plane.script(spec.name.as_str(), ScriptedOutcome::Stop);

    let err = fx.session.train(&spec).await.unwrap_err();
    assert!(matches!(err, JobError::JobStopped { .. }));
}

#[tokio::test]
async fn test_kind_mismatch_is_rejected_locally() {
    let fx = fixture(1);
    let cfg = fx.session.config().clone();
    let spec = TransformJobBuilder::with_unique_name(&cfg, "wrong", "some-model")
        .unwrap()
        .input(uri("s3://workshop/iris/batch/plain"))
        .build()
        .unwrap();

    let err = fx.session.train(&spec).await.unwrap_err();
    assert!(matches!(err, JobError::SpecValidation(_)));
    assert_eq!(fx.plane.job_count(), 0);
}

#[tokio::test]
async fn test_register_and_deploy_endpoint() {
    let fx = fixture(2);
    let dir = TempDir::new().unwrap();
    let iris = write_iris(dir.path(), 30);
    let train_uri = fx.session.stage(&iris, &uri("s3://workshop/iris/data/train")).await.unwrap();
    let spec = fx.session.training_job("deploy").unwrap().image(IMAGE).channel("train", train_uri).build().unwrap();

    let desc = fx.session.run(&spec).await.unwrap();
    assert_eq!(desc.status, JobStatus::Completed);
    assert!(fx.store.exists(desc.model_artifact.as_ref().unwrap()).await.unwrap());

    let model = fx.session.register_model(&desc, "iris-tree-model", IMAGE).await.unwrap();
    assert!(model.arn.ends_with("model/iris-tree-model"));

    let duplicate = fx.session.register_model(&desc, "iris-tree-model", IMAGE).await.unwrap_err();
    assert!(matches!(duplicate, JobError::SubmissionRejected { .. }));

    let endpoint = fx
        .session
        .deploy_endpoint(&EndpointSpec {
            name: "iris-tree-endpoint".to_string(),
            model_name: model.name.clone(),
            instance_type: "ml.m5.large".to_string(),
            instance_count: 1,
        })
        .await
        .unwrap();
    assert_eq!(endpoint.name, "iris-tree-endpoint");

    let missing = fx
        .session
        .deploy_endpoint(&EndpointSpec {
            name: "orphan-endpoint".to_string(),
            model_name: "no-such-model".to_string(),
            instance_type: "ml.m5.large".to_string(),
            instance_count: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(missing, JobError::Remote(_)));
}

#[tokio::test]
async fn test_transform_against_unknown_model_fails() {
    let fx = fixture(1);
    fx.store.insert(uri("s3://workshop/iris/batch/x/b.csv"), "1.0,2.0\n");
    let spec = fx
        .session
        .transform_job("ghost", "unregistered-model")
        .unwrap()
        .input(uri("s3://workshop/iris/batch/x"))
        .build()
        .unwrap();

    let err = fx.session.transform(&spec).await.unwrap_err();
    assert!(matches!(err, JobError::JobFailed { ref reason, .. } if reason.contains("unregistered-model")));
}
