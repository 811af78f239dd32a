//! Shared fixtures for sagekit-jobs integration tests.

#![allow(dead_code)]

use sagekit_jobs::{
    MemoryControlPlane, MemoryObjectStore, ProgressEvent, ProgressSink, Session, SessionConfig, StorageUri,
    Waiter,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ROLE: &str = "arn:aws:iam::123456789012:role/sagekit";
pub const IMAGE: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/decision-trees:latest";

pub fn config() -> SessionConfig {
    SessionConfig {
        default_bucket: Some("workshop".to_string()),
        role_arn: Some(ROLE.to_string()),
        key_prefix: "iris".to_string(),
        ..SessionConfig::default()
    }
}

/// Millisecond polling so tests finish quickly.
pub fn fast_waiter() -> Waiter {
    Waiter::new(Duration::from_millis(2), Some(Duration::from_secs(10)))
}

pub fn uri(raw: &str) -> StorageUri {
    StorageUri::parse(raw).unwrap()
}

/// Iris-shaped rows: label in column 0, four features. The first feature's
/// integer part equals the label so predictions can be checked exactly.
pub fn iris_csv(rows: usize) -> String {
    let mut out = String::new();
    for i in 0..rows {
        let label = i % 3;
        writeln!(out, "{label},{label}.{},3.{},1.{},0.{}", i % 10, i % 7, i % 5, i % 3).unwrap();
    }
    out
}

pub fn write_iris(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("iris.csv");
    std::fs::write(&path, iris_csv(rows)).unwrap();
    path
}

/// Predicts the label from the first visible feature.
pub fn label_from_first_feature(fields: &[&str]) -> String {
    fields
        .first()
        .and_then(|f| f.split('.').next())
        .unwrap_or("0")
        .to_string()
}

pub struct Fixture {
    pub store: Arc<MemoryObjectStore>,
    pub plane: Arc<MemoryControlPlane>,
    pub session: Session,
    pub events: Arc<RecordingSink>,
}

pub fn fixture(steps_to_finish: u32) -> Fixture {
    let store = Arc::new(MemoryObjectStore::new());
    let plane = Arc::new(
        MemoryControlPlane::new(store.clone())
            .with_steps_to_finish(steps_to_finish)
            .with_predictor(label_from_first_feature),
    );
    let events = Arc::new(RecordingSink::default());
    let session = Session::new(config(), plane.clone(), store.clone())
        .unwrap()
        .with_waiter(fast_waiter())
        .with_progress(events.clone());
    Fixture { store, plane, session, events }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
