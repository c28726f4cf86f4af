//! Background task model: kinds, payloads, states, and identifiers

use std::path::PathBuf;
use uuid::Uuid;

use crate::data::{Entity, RunSummary};

pub mod pool;
pub(crate) mod work;

pub use pool::{PoolConfig, TaskPool};

/// Opaque task identifier handed back at submission. The submitter holds
/// only the id; the pool owns the task until it reaches a terminal state.
pub type TaskId = Uuid;

/// Task lifecycle. Terminal states are final; an id becomes reusable only
/// after removal from the pool's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	Pending,
	Running,
	Completed,
	Errored,
	Cancelled,
}

impl TaskState {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			TaskState::Completed | TaskState::Errored | TaskState::Cancelled
		)
	}
}

impl std::fmt::Display for TaskState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TaskState::Pending => write!(f, "pending"),
			TaskState::Running => write!(f, "running"),
			TaskState::Completed => write!(f, "completed"),
			TaskState::Errored => write!(f, "error"),
			TaskState::Cancelled => write!(f, "cancelled"),
		}
	}
}

/// One image to fetch into the governor's cache.
#[derive(Debug, Clone)]
pub struct ImageSource {
	/// Cache key, typically the entity ticket
	pub key: String,
	/// Where the bytes live; a network-backed resolver can stand in for
	/// the filesystem at the collaborator boundary
	pub path: PathBuf,
}

/// The closed set of background work the pool executes. Each kind carries
/// its own strongly-typed payload and is dispatched by exhaustive match.
#[derive(Debug, Clone)]
pub enum TaskKind {
	/// Ingest a delimited source into validated entities
	Ingestion { path: PathBuf, batch_size: usize },
	/// Write entities out as JSON lines
	Export {
		entities: Vec<Entity>,
		dest: PathBuf,
	},
	/// Validate a source without materializing entities
	Validation { path: PathBuf },
	/// Load image bytes into the governor's cache
	ImageFetch { sources: Vec<ImageSource> },
	/// Parks until released or cancelled; only exists for pool tests
	#[cfg(test)]
	Block { release: async_channel::Receiver<()> },
	/// Panics immediately; only exists for pool-boundary tests
	#[cfg(test)]
	Panic,
}

impl TaskKind {
	pub fn name(&self) -> &'static str {
		match self {
			TaskKind::Ingestion { .. } => "ingestion",
			TaskKind::Export { .. } => "export",
			TaskKind::Validation { .. } => "validation",
			TaskKind::ImageFetch { .. } => "image-fetch",
			#[cfg(test)]
			TaskKind::Block { .. } => "block",
			#[cfg(test)]
			TaskKind::Panic => "panic",
		}
	}
}

/// A submitted unit of work. The priority field is reserved by the data
/// model; the pool currently dequeues strictly FIFO and never reorders.
#[derive(Debug, Clone)]
pub struct TaskSpec {
	pub kind: TaskKind,
	pub priority: u8,
}

impl TaskSpec {
	pub fn new(kind: TaskKind) -> Self {
		Self { kind, priority: 0 }
	}

	pub fn with_priority(mut self, priority: u8) -> Self {
		self.priority = priority;
		self
	}
}

/// Successful result of a task, delivered via a `Result` event.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
	Ingestion(RunSummary),
	Export { written: usize },
	Validation(RunSummary),
	ImageFetch { fetched: usize, failed: usize },
	#[cfg(test)]
	Block,
}
