//! # Bulk Dataset Viewer Pipeline
//!
//! Streaming ingestion, background task execution, viewport virtualization,
//! and memory governance for large delimited datasets. Built on the smol
//! async runtime with channel-based event fan-out.

pub mod cancel;
pub mod data;
pub mod error;
pub mod events;
pub mod ingest;
pub mod memory;
pub mod tasks;
pub mod validate;
pub mod viewport;

// Re-export main API types
pub use cancel::CancelToken;
pub use data::{BatchResult, Entity, IssueKind, IssueSeverity, RunSummary, ValidationIssue};
pub use error::{PipelineError, PipelineResult};
pub use events::{EventBus, TaskEvent, TaskProgress};
pub use ingest::{IngestOptions, StreamBatchIngestor};
pub use memory::{GovernorConfig, MemoryGovernor, MemoryTrend, SamplerHandle};
pub use tasks::{PoolConfig, TaskId, TaskKind, TaskPool, TaskSpec, TaskState};
pub use viewport::{LayoutMode, Viewport, ViewportCalculator, ViewportConfig};
