//! Work functions for the four task kinds

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::data::{Entity, RunSummary};
use crate::error::{TaskError, TaskResult};
use crate::events::{EventBus, TaskEvent, TaskProgress};
use crate::ingest::{DelimitedSource, IngestOptions, StreamBatchIngestor};
use crate::memory::MemoryGovernor;
use crate::tasks::{ImageSource, TaskId, TaskKind, TaskOutcome};

/// Entities written between export progress checkpoints.
const EXPORT_CHUNK: usize = 250;

fn exec_err(task: &'static str, reason: impl std::fmt::Display) -> TaskError {
	TaskError::ExecutionFailed {
		task: task.to_string(),
		reason: reason.to_string(),
	}
}

/// Run one task to completion, cancellation, or failure. The work function
/// reports progress through the bus at its cooperative checkpoints; the
/// pool never inspects task internals.
pub(crate) async fn execute(
	id: TaskId,
	kind: TaskKind,
	cancel: CancelToken,
	bus: Arc<EventBus>,
	governor: Option<Arc<MemoryGovernor>>,
) -> TaskResult<TaskOutcome> {
	match kind {
		TaskKind::Ingestion { path, batch_size } => {
			let summary =
				run_source_pass(id, path, batch_size, false, cancel, &bus, governor).await?;
			Ok(TaskOutcome::Ingestion(summary))
		}
		TaskKind::Validation { path } => {
			let summary = run_source_pass(id, path, 1000, true, cancel, &bus, governor).await?;
			Ok(TaskOutcome::Validation(summary))
		}
		TaskKind::Export { entities, dest } => run_export(id, entities, dest, cancel, &bus).await,
		TaskKind::ImageFetch { sources } => {
			run_image_fetch(id, sources, cancel, &bus, governor).await
		}
		#[cfg(test)]
		TaskKind::Block { release } => loop {
			if cancel.is_cancelled() {
				return Err(TaskError::Cancelled);
			}
			match release.try_recv() {
				Ok(()) | Err(async_channel::TryRecvError::Closed) => {
					return Ok(TaskOutcome::Block)
				}
				Err(async_channel::TryRecvError::Empty) => {
					smol::Timer::after(std::time::Duration::from_millis(2)).await;
				}
			}
		},
		#[cfg(test)]
		TaskKind::Panic => panic!("intentional test panic"),
	}
}

/// Shared body of the ingestion and validation kinds: drive the ingest
/// stream batch by batch, reporting rows seen after each emission.
async fn run_source_pass(
	id: TaskId,
	path: PathBuf,
	batch_size: usize,
	validate_only: bool,
	cancel: CancelToken,
	bus: &EventBus,
	governor: Option<Arc<MemoryGovernor>>,
) -> TaskResult<RunSummary> {
	let task = if validate_only { "validation" } else { "ingestion" };
	let source = DelimitedSource::from_path(&path).map_err(|e| exec_err(task, e))?;

	let mut ingestor = StreamBatchIngestor::new();
	if let Some(governor) = governor {
		ingestor = ingestor.with_governor(governor);
	}
	let mut options = IngestOptions::default()
		.with_batch_size(batch_size)
		.with_cancel(cancel.child());
	if validate_only {
		options = options.validate_only();
	}

	let mut stream = ingestor.stream(source, options);
	let mut summary = RunSummary::default();
	while let Some(batch) = stream.next_batch().await {
		summary.absorb(batch);
		bus.emit(TaskEvent::Progress {
			id,
			progress: TaskProgress {
				processed: summary.total_rows,
				total: None,
				stage: if validate_only { "validating" } else { "ingesting" },
			},
		});
	}
	summary.preview = stream.preview().to_vec();

	if summary.cancelled {
		return Err(TaskError::Cancelled);
	}
	debug!(
		"Task {}: {} finished with {} rows",
		id, task, summary.total_rows
	);
	Ok(summary)
}

async fn run_export(
	id: TaskId,
	entities: Vec<Entity>,
	dest: PathBuf,
	cancel: CancelToken,
	bus: &EventBus,
) -> TaskResult<TaskOutcome> {
	let file = std::fs::File::create(&dest).map_err(|e| exec_err("export", e))?;
	let mut writer = std::io::BufWriter::new(file);
	let total = entities.len();
	let mut written = 0usize;

	for chunk in entities.chunks(EXPORT_CHUNK) {
		// Chunk boundaries are the export checkpoints
		if cancel.is_cancelled() {
			return Err(TaskError::Cancelled);
		}
		for entity in chunk {
			let line = serde_json::to_string(entity).map_err(|e| exec_err("export", e))?;
			writeln!(writer, "{line}").map_err(|e| exec_err("export", e))?;
			written += 1;
		}
		bus.emit(TaskEvent::Progress {
			id,
			progress: TaskProgress {
				processed: written,
				total: Some(total),
				stage: "exporting",
			},
		});
		smol::future::yield_now().await;
	}
	writer.flush().map_err(|e| exec_err("export", e))?;

	debug!("Task {}: exported {} entities to {}", id, written, dest.display());
	Ok(TaskOutcome::Export { written })
}

async fn run_image_fetch(
	id: TaskId,
	sources: Vec<ImageSource>,
	cancel: CancelToken,
	bus: &EventBus,
	governor: Option<Arc<MemoryGovernor>>,
) -> TaskResult<TaskOutcome> {
	let total = sources.len();
	let mut fetched = 0usize;
	let mut failed = 0usize;

	for source in sources {
		if cancel.is_cancelled() {
			return Err(TaskError::Cancelled);
		}
		match smol::fs::read(&source.path).await {
			Ok(bytes) => {
				if let Some(governor) = &governor {
					governor.cache_image(&source.key, bytes.into());
				}
				fetched += 1;
			}
			Err(e) => {
				// Per-image failures are local; the fetch keeps going
				warn!(
					"Task {}: failed to fetch {} ({})",
					id,
					source.path.display(),
					e
				);
				failed += 1;
			}
		}
		bus.emit(TaskEvent::Progress {
			id,
			progress: TaskProgress {
				processed: fetched + failed,
				total: Some(total),
				stage: "fetching",
			},
		});
	}

	Ok(TaskOutcome::ImageFetch { fetched, failed })
}
