//! Task event fan-out bus keyed by task id

use async_channel as channel;
use std::sync::{Arc, Mutex};
use tracing::error;

use crate::tasks::{TaskId, TaskOutcome};

/// Progress snapshot reported by a running work function at its
/// cooperative checkpoints.
#[derive(Debug, Clone)]
pub struct TaskProgress {
	/// Items processed so far (rows, chunks, images)
	pub processed: usize,
	/// Total items when known upfront
	pub total: Option<usize>,
	/// Short label for the current stage
	pub stage: &'static str,
}

/// Events emitted by the task pool, correlated by task id.
#[derive(Debug, Clone)]
pub enum TaskEvent {
	Progress { id: TaskId, progress: TaskProgress },
	Result { id: TaskId, outcome: TaskOutcome },
	Error { id: TaskId, message: String },
	Cancelled { id: TaskId },
}

impl TaskEvent {
	pub fn task_id(&self) -> TaskId {
		match self {
			TaskEvent::Progress { id, .. }
			| TaskEvent::Result { id, .. }
			| TaskEvent::Error { id, .. }
			| TaskEvent::Cancelled { id } => *id,
		}
	}
}

/// Broadcast-style event bus using fan-out to per-subscriber channels.
///
/// Ownership stays explicit: each subscriber holds its own receiver, and
/// emission is best-effort (closed or full channels are skipped), so a
/// stalled consumer never backs up the pool.
#[derive(Default)]
pub struct EventBus {
	subscribers: Mutex<Vec<channel::Sender<TaskEvent>>>,
}

impl EventBus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			subscribers: Mutex::new(Vec::new()),
		})
	}

	/// Subscribe to events. Returns a receiver that will get future events.
	pub fn subscribe(self: &Arc<Self>) -> channel::Receiver<TaskEvent> {
		let (tx, rx) = channel::unbounded();
		match self.subscribers.lock() {
			Ok(mut subs) => subs.push(tx),
			Err(_) => error!("EventBus: subscribers lock poisoned; subscriber not registered"),
		}
		rx
	}

	/// Broadcast an event to all subscribers, dropping closed channels.
	pub fn emit(&self, event: TaskEvent) {
		if let Ok(mut subs) = self.subscribers.lock() {
			subs.retain(|sub| sub.try_send(event.clone()).is_ok() || !sub.is_closed());
		} else {
			error!("EventBus: subscribers lock poisoned; dropping event");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tasks::TaskId;

	#[smol_potat::test]
	async fn test_fan_out_to_all_subscribers() {
		let bus = EventBus::new();
		let rx1 = bus.subscribe();
		let rx2 = bus.subscribe();

		let id = TaskId::new_v4();
		bus.emit(TaskEvent::Cancelled { id });

		assert!(matches!(rx1.recv().await.unwrap(), TaskEvent::Cancelled { .. }));
		assert_eq!(rx2.recv().await.unwrap().task_id(), id);
	}

	#[smol_potat::test]
	async fn test_dropped_subscriber_does_not_block_emission() {
		let bus = EventBus::new();
		let rx1 = bus.subscribe();
		let rx2 = bus.subscribe();
		drop(rx2);

		let id = TaskId::new_v4();
		bus.emit(TaskEvent::Cancelled { id });
		assert_eq!(rx1.recv().await.unwrap().task_id(), id);
	}
}
