//! Error types for the ingestion and task pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type covering every failure mode in the pipeline.
///
/// Row-level validation problems are deliberately *not* represented here:
/// they are recovered locally and returned as [`crate::data::ValidationIssue`]
/// data inside batch results. `PipelineError` only carries failures that
/// terminate an operation:
///
/// - **Source errors**: the record source itself is unusable (missing,
///   oversized, undecodable). Fatal for the whole run.
/// - **Task errors**: a background work function failed or was cancelled.
///   Isolated to that task by the pool boundary.
/// - **Configuration errors**: invalid settings detected up front.
#[derive(Debug, Error)]
pub enum PipelineError {
	/// File system I/O errors outside the record source itself
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Stream-level failures of the record source (fatal for the run)
	#[error("Source error: {0}")]
	Source(#[from] SourceError),

	/// Background task failures, isolated per task
	#[error("Task error: {0}")]
	Task(#[from] TaskError),

	/// Configuration validation errors with descriptive messages
	#[error("Configuration error: {0}")]
	Config(String),

	/// Serialization errors from export work
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Stream-level record source errors. Any of these aborts the whole run;
/// they are surfaced to callers as a single terminal invalid-format issue.
#[derive(Debug, Error)]
pub enum SourceError {
	#[error("Source not found: {path}")]
	NotFound { path: PathBuf },

	#[error("Source too large: {size} bytes exceeds limit of {limit} bytes")]
	Oversize { size: u64, limit: u64 },

	#[error("Encoding failure at line {line}: {reason}")]
	Encoding { line: usize, reason: String },

	#[error("Source I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// Task execution errors reported through the pool's event surface.
#[derive(Debug, Error)]
pub enum TaskError {
	#[error("Task execution failed: {task} - {reason}")]
	ExecutionFailed { task: String, reason: String },

	#[error("Task panicked: {task} - {reason}")]
	Panicked { task: String, reason: String },

	#[error("Task was cancelled")]
	Cancelled,

	#[error("Task pool is shut down")]
	PoolShutDown,
}

/// Convenience alias used throughout the public API.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Convenience alias for record source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Convenience alias for task work functions.
pub type TaskResult<T> = Result<T, TaskError>;
