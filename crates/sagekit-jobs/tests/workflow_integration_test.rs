//! End-to-end train and batch transform runs against the in-memory control plane.
//!
//! Covers:
//! - Training with staged data producing a resolvable model archive
//! - Batch transform over many files with row order preserved
//! - Joining predictions back onto an ID column
//! - Duplicate names, deadlines and status monotonicity

mod common;

use common::{fixture, write_iris, IMAGE};
use sagekit_jobs::dataset::{
    read_labels, sample_batches, verify_joined_ids, verify_predictions, write_batches, BatchOptions, LabeledTable,
    INPUT_DIR, LABELS_DIR,
};
use sagekit_jobs::{
    read_output_rows, ControlPlane, JobError, JobKind, JobStatus, ObjectStore, ProgressEvent, Session, Waiter,
};
use std::time::Duration;
use tempfile::TempDir;

async fn train_and_register(session: &Session, dir: &TempDir) -> String {
    let layout = session.layout().unwrap();
    let iris = write_iris(dir.path(), 150);
    let train_uri = session.stage(&iris, &layout.data_prefix("train")).await.unwrap();

    let spec = session
        .training_job("iris-tree")
        .unwrap()
        .image(IMAGE)
        .channel("train", train_uri)
        .hyperparameter("max_leaf_nodes", 30)
        .build()
        .unwrap();
    let handle = session.submit(&spec).await.unwrap();
    let desc = session.wait(&handle).await.unwrap();

    let model_name = format!("{}-model", spec.name);
    session.register_model(&desc, &model_name, IMAGE).await.unwrap();
    model_name
}

#[tokio::test]
async fn test_training_produces_model_artifact() {
    let fx = fixture(3);
    let dir = TempDir::new().unwrap();
    let layout = fx.session.layout().unwrap();

    let iris = write_iris(dir.path(), 150);
    let train_uri = fx.session.stage(&iris, &layout.data_prefix("train")).await.unwrap();
    assert_eq!(train_uri.to_string(), "s3://workshop/iris/data/train/iris.csv");

    let spec = fx
        .session
        .training_job("iris-tree")
        .unwrap()
        .image(IMAGE)
        .channel("train", train_uri)
        .hyperparameter("max_leaf_nodes", 30)
        .build()
        .unwrap();

    let artifact = fx.session.train(&spec).await.unwrap();
    assert!(artifact.uri.key().ends_with(&format!("{}/output/model.tar.gz", spec.name)));

    let summary: serde_json::Value = serde_json::from_slice(&fx.store.get(&artifact.uri).await.unwrap()).unwrap();
    assert_eq!(summary["hyperparameters"]["max_leaf_nodes"], "30");
}

#[tokio::test]
async fn test_batch_transform_one_output_per_input_file() {
    let fx = fixture(2);
    let dir = TempDir::new().unwrap();
    let model_name = train_and_register(&fx.session, &dir).await;

    let table = LabeledTable::read_csv(&write_iris(dir.path(), 150), false).unwrap();
    let opts = BatchOptions { files: 10, rows_per_file: 100, with_ids: false, seed: Some(11) };
    let batches = sample_batches(&table, &opts).unwrap();
    let local = dir.path().join("batch");
    write_batches(&local, &batches).unwrap();

    let input = fx.session.layout().unwrap().batch_input("plain");
    fx.session.stage(&local.join(INPUT_DIR), &input).await.unwrap();

    let spec = fx.session.transform_job("iris-batch", &model_name).unwrap().input(input).build().unwrap();
    let outputs = fx.session.transform(&spec).await.unwrap();
    assert_eq!(outputs.len(), 10);

    for (output, batch) in outputs.iter().zip(&batches) {
        assert!(output.output.key().ends_with(&format!("{}.out", batch.name)));
        let rows = read_output_rows(fx.store.as_ref(), &output.output).await.unwrap();
        assert_eq!(rows.len(), 100);

        let labels = read_labels(&local.join(LABELS_DIR).join(&batch.name)).unwrap();
        let expected: Vec<String> = labels.into_iter().map(|(_, label)| label).collect();
        let report = verify_predictions(&expected, &rows).unwrap();
        assert!((report.accuracy - 1.0).abs() < f64::EPSILON);
    }
}

#[tokio::test]
async fn test_repeat_runs_only_see_their_own_inputs() {
    let fx = fixture(2);
    let dir = TempDir::new().unwrap();
    let model_name = train_and_register(&fx.session, &dir).await;
    let layout = fx.session.layout().unwrap();
    let table = LabeledTable::read_csv(&write_iris(dir.path(), 150), false).unwrap();

    for (run, files) in [10, 3].into_iter().enumerate() {
        let opts = BatchOptions { files, rows_per_file: 5, with_ids: false, seed: Some(7) };
        let local = dir.path().join(format!("run-{run}"));
        write_batches(&local, &sample_batches(&table, &opts).unwrap()).unwrap();

        let builder = fx.session.transform_job("iris-batch", &model_name).unwrap();
        let input = layout.transform_input(builder.name());
        fx.session.stage(&local.join(INPUT_DIR), &input).await.unwrap();

        let spec = builder.input(input).build().unwrap();
        let outputs = fx.session.transform(&spec).await.unwrap();
        assert_eq!(outputs.len(), files);
        // Unique names are timestamped to the millisecond.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_join_keeps_ids_aligned() {
    let fx = fixture(2);
    let dir = TempDir::new().unwrap();
    let model_name = train_and_register(&fx.session, &dir).await;

    let table = LabeledTable::read_csv(&write_iris(dir.path(), 150), false).unwrap();
    let opts = BatchOptions { files: 2, rows_per_file: 40, with_ids: true, seed: Some(5) };
    let batches = sample_batches(&table, &opts).unwrap();
    let local = dir.path().join("batch-ids");
    write_batches(&local, &batches).unwrap();

    let input = fx.session.layout().unwrap().batch_input("ids");
    fx.session.stage(&local.join(INPUT_DIR), &input).await.unwrap();

    let spec = fx
        .session
        .transform_job("iris-ids", &model_name)
        .unwrap()
        .input(input)
        .input_filter("$[1:]")
        .join_with_input()
        .output_filter("$[0,-1]")
        .build()
        .unwrap();
    let outputs = fx.session.transform(&spec).await.unwrap();
    assert_eq!(outputs.len(), 2);

    for (output, batch) in outputs.iter().zip(&batches) {
        let rows = read_output_rows(fx.store.as_ref(), &output.output).await.unwrap();
        assert!(rows.iter().all(|r| r.split(',').count() == 2));

        let ids = batch.ids.clone().unwrap();
        let predictions = verify_joined_ids(&ids, &rows).unwrap();
        let report = verify_predictions(&batch.labels, &predictions).unwrap();
        assert_eq!(report.matches, 40);
    }
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let fx = fixture(5);
    let dir = TempDir::new().unwrap();
    let layout = fx.session.layout().unwrap();
    let iris = write_iris(dir.path(), 10);
    let train_uri = fx.session.stage(&iris, &layout.data_prefix("train")).await.unwrap();

    let spec = fx.session.training_job("dup").unwrap().image(IMAGE).channel("train", train_uri).build().unwrap();
    let first = fx.session.submit(&spec).await.unwrap();
    let err = fx.session.submit(&spec).await.unwrap_err();

    assert!(matches!(err, JobError::SubmissionRejected { ref job, .. } if job == spec.name.as_str()));
    assert_eq!(fx.plane.job_count(), 1);
    // The original job is unaffected.
    let desc = fx.session.wait(&first).await.unwrap();
    assert_eq!(desc.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_deadline_leaves_job_running() {
    let fx = fixture(400);
    let dir = TempDir::new().unwrap();
    let layout = fx.session.layout().unwrap();
    let iris = write_iris(dir.path(), 10);
    let train_uri = fx.session.stage(&iris, &layout.data_prefix("train")).await.unwrap();
    let spec = fx.session.training_job("slow").unwrap().image(IMAGE).channel("train", train_uri).build().unwrap();
    let handle = fx.session.submit(&spec).await.unwrap();

    let impatient = Waiter::new(Duration::from_millis(1), Some(Duration::from_millis(20)));
    let err = impatient.wait(fx.plane.as_ref(), &handle, fx.events.as_ref()).await.unwrap_err();
    assert!(matches!(err, JobError::Timeout { .. }));
    assert!(fx.events.events().iter().any(|e| matches!(e, ProgressEvent::TimedOut { .. })));

    let desc = fx.plane.describe(&handle).await.unwrap();
    assert_eq!(desc.status, JobStatus::InProgress);

    let patient = Waiter::new(Duration::from_millis(1), None);
    let desc = patient.wait(fx.plane.as_ref(), &handle, fx.events.as_ref()).await.unwrap();
    assert_eq!(desc.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_status_never_regresses() {
    let fx = fixture(4);
    let dir = TempDir::new().unwrap();
    let layout = fx.session.layout().unwrap();
    let iris = write_iris(dir.path(), 10);
    let train_uri = fx.session.stage(&iris, &layout.data_prefix("train")).await.unwrap();
    let spec = fx.session.training_job("mono").unwrap().image(IMAGE).channel("train", train_uri).build().unwrap();
    let handle = fx.session.submit(&spec).await.unwrap();

    let mut seen_terminal = false;
    for _ in 0..10 {
        let status = fx.plane.describe(&handle).await.unwrap().status;
        if seen_terminal {
            assert_eq!(status, JobStatus::Completed);
        }
        seen_terminal |= status.is_terminal();
    }
    assert!(seen_terminal);
    assert!(matches!(
        fx.events.events().first(),
        Some(ProgressEvent::Submitted { handle }) if handle.kind == JobKind::Training
    ));
}

#[tokio::test]
async fn test_concurrent_waits_share_one_waiter() {
    let fx = fixture(3);
    let dir = TempDir::new().unwrap();
    let layout = fx.session.layout().unwrap();
    let iris = write_iris(dir.path(), 10);
    let train_uri = fx.session.stage(&iris, &layout.data_prefix("train")).await.unwrap();

    let a = fx.session.training_job("para-a").unwrap().image(IMAGE).channel("train", train_uri.clone()).build().unwrap();
    let b = fx.session.training_job("para-b").unwrap().image(IMAGE).channel("train", train_uri).build().unwrap();

    let (ra, rb) = tokio::join!(fx.session.train(&a), fx.session.train(&b));
    assert_ne!(ra.unwrap().uri, rb.unwrap().uri);
}
