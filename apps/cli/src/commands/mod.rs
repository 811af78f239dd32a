//! Command implementations for the sagekit CLI.

pub mod data;
pub mod jobs;
pub mod train;
pub mod transform;
pub mod types;
