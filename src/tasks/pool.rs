//! Bounded-concurrency task pool with cooperative cancellation

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::task::Poll;

use async_channel as channel;
use futures_lite::future;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::TaskError;
use crate::events::{EventBus, TaskEvent};
use crate::memory::MemoryGovernor;
use crate::tasks::{work, TaskId, TaskKind, TaskSpec, TaskState};

/// Pool sizing. The effective concurrency is the configured value clamped
/// to the machine's logical core count.
#[derive(Debug, Clone)]
pub struct PoolConfig {
	pub max_concurrency: usize,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			max_concurrency: num_cpus::get(),
		}
	}
}

impl PoolConfig {
	pub fn with_max_concurrency(mut self, max: usize) -> Self {
		self.max_concurrency = max.max(1);
		self
	}
}

struct TaskEntry {
	state: TaskState,
	cancel: CancelToken,
	kind_name: &'static str,
	#[allow(dead_code)]
	priority: u8,
}

struct PoolShared {
	entries: HashMap<TaskId, TaskEntry>,
	pending: VecDeque<(TaskId, TaskKind)>,
	running: usize,
	shutdown: bool,
}

enum Wake {
	Poke,
	Done(TaskId),
	Shutdown,
}

/// Executes background tasks with bounded concurrency and FIFO queueing.
///
/// The pool owns every task from submission to terminal state; submitters
/// hold only the [`TaskId`] and correlate progress, results, errors, and
/// cancellations through [`TaskPool::subscribe`]. Work-function failures
/// (including panics) are caught at the pool boundary and reported as
/// `Error` events without affecting sibling tasks.
pub struct TaskPool {
	shared: Arc<Mutex<PoolShared>>,
	bus: Arc<EventBus>,
	wake_tx: channel::Sender<Wake>,
	scheduler: Option<std::thread::JoinHandle<()>>,
	max_concurrency: usize,
}

impl TaskPool {
	pub fn new(config: PoolConfig) -> Self {
		Self::build(config, None)
	}

	/// Pool whose image-fetch tasks and ingestion ceiling checks go
	/// through the given governor.
	pub fn with_governor(config: PoolConfig, governor: Arc<MemoryGovernor>) -> Self {
		Self::build(config, Some(governor))
	}

	fn build(config: PoolConfig, governor: Option<Arc<MemoryGovernor>>) -> Self {
		let max_concurrency = config.max_concurrency.clamp(1, num_cpus::get());
		let shared = Arc::new(Mutex::new(PoolShared {
			entries: HashMap::new(),
			pending: VecDeque::new(),
			running: 0,
			shutdown: false,
		}));
		let bus = EventBus::new();
		let (wake_tx, wake_rx) = channel::unbounded::<Wake>();

		info!("Pool: starting with concurrency {}", max_concurrency);
		let scheduler = {
			let shared = Arc::clone(&shared);
			let bus = Arc::clone(&bus);
			let wake_tx = wake_tx.clone();
			std::thread::spawn(move || {
				future::block_on(scheduler_loop(
					shared,
					bus,
					governor,
					wake_tx,
					wake_rx,
					max_concurrency,
				));
			})
		};

		Self {
			shared,
			bus,
			wake_tx,
			scheduler: Some(scheduler),
			max_concurrency,
		}
	}

	pub fn max_concurrency(&self) -> usize {
		self.max_concurrency
	}

	/// Queue a task. Tasks beyond the concurrency limit stay `Pending` and
	/// are dequeued FIFO as running slots free up.
	pub fn submit(&self, spec: TaskSpec) -> Result<TaskId, TaskError> {
		let id = TaskId::new_v4();
		{
			let mut shared = self.shared.lock().expect("pool lock poisoned");
			if shared.shutdown {
				return Err(TaskError::PoolShutDown);
			}
			shared.entries.insert(
				id,
				TaskEntry {
					state: TaskState::Pending,
					cancel: CancelToken::new(),
					kind_name: spec.kind.name(),
					priority: spec.priority,
				},
			);
			shared.pending.push_back((id, spec.kind));
		}
		debug!("Pool: submitted task {}", id);
		let _ = self.wake_tx.try_send(Wake::Poke);
		Ok(id)
	}

	/// Cancel a task. Pending tasks leave the queue immediately with no
	/// execution; running tasks observe the signal at their next
	/// checkpoint and finish with a `cancelled` event instead of a
	/// result. Unknown or already-terminal ids return `false`.
	pub fn cancel(&self, id: TaskId) -> bool {
		let emit_cancelled = {
			let mut shared = self.shared.lock().expect("pool lock poisoned");
			match shared.entries.get_mut(&id) {
				None => return false,
				Some(entry) => match entry.state {
					TaskState::Pending => {
						entry.state = TaskState::Cancelled;
						shared.pending.retain(|(pending_id, _)| *pending_id != id);
						true
					}
					TaskState::Running => {
						entry.cancel.cancel();
						false
					}
					_ => return false,
				},
			}
		};
		if emit_cancelled {
			info!("Pool: cancelled pending task {}", id);
			self.bus.emit(TaskEvent::Cancelled { id });
		}
		true
	}

	pub fn status(&self, id: TaskId) -> Option<TaskState> {
		self.shared
			.lock()
			.expect("pool lock poisoned")
			.entries
			.get(&id)
			.map(|e| e.state)
	}

	/// Drop a terminal task from the registry, making its id reusable.
	/// Returns `false` for unknown or still-active tasks.
	pub fn remove(&self, id: TaskId) -> bool {
		let mut shared = self.shared.lock().expect("pool lock poisoned");
		match shared.entries.get(&id) {
			Some(entry) if entry.state.is_terminal() => {
				shared.entries.remove(&id);
				true
			}
			_ => false,
		}
	}

	/// Subscribe to progress/result/error/cancelled events for all tasks.
	pub fn subscribe(&self) -> channel::Receiver<TaskEvent> {
		self.bus.subscribe()
	}

	pub fn running_count(&self) -> usize {
		self.shared.lock().expect("pool lock poisoned").running
	}

	pub fn pending_count(&self) -> usize {
		self.shared.lock().expect("pool lock poisoned").pending.len()
	}

	/// Cancel all running and pending tasks, then wait for every in-flight
	/// work function to return. No task outlives the pool.
	pub fn shutdown(&mut self) {
		let Some(handle) = self.scheduler.take() else {
			return;
		};
		info!("Pool: shutting down");
		let _ = self.wake_tx.try_send(Wake::Shutdown);
		if handle.join().is_err() {
			warn!("Pool: scheduler thread panicked during shutdown");
		}
	}
}

impl Drop for TaskPool {
	fn drop(&mut self) {
		self.shutdown();
	}
}

async fn scheduler_loop(
	shared: Arc<Mutex<PoolShared>>,
	bus: Arc<EventBus>,
	governor: Option<Arc<MemoryGovernor>>,
	wake_tx: channel::Sender<Wake>,
	wake_rx: channel::Receiver<Wake>,
	max_concurrency: usize,
) {
	let mut handles: HashMap<TaskId, smol::Task<()>> = HashMap::new();

	loop {
		// Fill free slots from the FIFO queue. State transitions happen in
		// the same critical section as the dequeue so a concurrent cancel
		// of a pending task is never raced into Running.
		loop {
			let next = {
				let mut s = shared.lock().expect("pool lock poisoned");
				if s.running >= max_concurrency {
					None
				} else {
					let mut picked = None;
					while let Some((id, kind)) = s.pending.pop_front() {
						if let Some(entry) = s.entries.get_mut(&id) {
							if entry.state == TaskState::Pending {
								entry.state = TaskState::Running;
								picked = Some((id, kind, entry.cancel.clone()));
								s.running += 1;
								break;
							}
						}
					}
					picked
				}
			};
			let Some((id, kind, cancel)) = next else {
				break;
			};
			debug!("Pool: task {} ({}) running", id, kind.name());
			let task = smol::spawn(run_one(
				id,
				kind,
				cancel,
				Arc::clone(&shared),
				Arc::clone(&bus),
				governor.clone(),
				wake_tx.clone(),
			));
			handles.insert(id, task);
		}

		match wake_rx.recv().await {
			Ok(Wake::Done(id)) => {
				handles.remove(&id);
				let mut s = shared.lock().expect("pool lock poisoned");
				s.running = s.running.saturating_sub(1);
			}
			Ok(Wake::Poke) => {}
			Ok(Wake::Shutdown) | Err(_) => break,
		}
	}

	// Shutdown: cancel everything, drain the queue, then wait for every
	// in-flight work function to return.
	let cancelled_pending = {
		let mut s = shared.lock().expect("pool lock poisoned");
		s.shutdown = true;
		for entry in s.entries.values() {
			if entry.state == TaskState::Running {
				entry.cancel.cancel();
			}
		}
		let mut cancelled = Vec::new();
		while let Some((id, _)) = s.pending.pop_front() {
			if let Some(entry) = s.entries.get_mut(&id) {
				if entry.state == TaskState::Pending {
					entry.state = TaskState::Cancelled;
					cancelled.push(id);
				}
			}
		}
		cancelled
	};
	for id in cancelled_pending {
		bus.emit(TaskEvent::Cancelled { id });
	}
	for (_, task) in handles.drain() {
		task.await;
	}
	info!("Pool: shutdown complete");
}

/// Drive one work function and record its terminal state. Panics are
/// caught here so one misbehaving task cannot take the pool down.
async fn run_one(
	id: TaskId,
	kind: TaskKind,
	cancel: CancelToken,
	shared: Arc<Mutex<PoolShared>>,
	bus: Arc<EventBus>,
	governor: Option<Arc<MemoryGovernor>>,
	wake_tx: channel::Sender<Wake>,
) {
	let kind_name = kind.name();
	let result = match catch_panic(work::execute(id, kind, cancel, Arc::clone(&bus), governor)).await
	{
		Ok(result) => result,
		Err(reason) => Err(TaskError::Panicked {
			task: kind_name.to_string(),
			reason,
		}),
	};

	let event = {
		let mut s = shared.lock().expect("pool lock poisoned");
		let entry = s.entries.get_mut(&id);
		match result {
			Ok(outcome) => {
				if let Some(entry) = entry {
					entry.state = TaskState::Completed;
				}
				TaskEvent::Result { id, outcome }
			}
			Err(TaskError::Cancelled) => {
				if let Some(entry) = entry {
					entry.state = TaskState::Cancelled;
				}
				TaskEvent::Cancelled { id }
			}
			Err(e) => {
				if let Some(entry) = entry {
					entry.state = TaskState::Errored;
				}
				warn!("Pool: task {} ({}) failed: {}", id, kind_name, e);
				TaskEvent::Error {
					id,
					message: e.to_string(),
				}
			}
		}
	};
	bus.emit(event);
	let _ = wake_tx.send(Wake::Done(id)).await;
}

/// Poll the future inside `catch_unwind` so a panicking task resolves to
/// an error message instead of unwinding into the executor.
async fn catch_panic<F, T>(fut: F) -> Result<T, String>
where
	F: Future<Output = T>,
{
	let mut fut = std::pin::pin!(fut);
	std::future::poll_fn(move |cx| {
		match std::panic::catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(cx))) {
			Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
			Ok(Poll::Pending) => Poll::Pending,
			Err(payload) => Poll::Ready(Err(panic_message(payload))),
		}
	})
	.await
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"task panicked".to_string()
	}
}
