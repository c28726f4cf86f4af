//! Cooperative cancellation token shared between callers and running work

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation flag observed at cooperative checkpoints.
///
/// Cloning (or calling [`CancelToken::child`]) shares the underlying flag,
/// so a token handed to a task propagates to any nested operation the task
/// drives (e.g. task -> ingestor) without manual flag-threading. Cancelling
/// is idempotent and never un-cancels.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
	flag: Arc<AtomicBool>,
}

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Request cancellation. Running work observes this at its next
	/// checkpoint; there is no hard preemption.
	pub fn cancel(&self) {
		self.flag.store(true, Ordering::Relaxed);
	}

	pub fn is_cancelled(&self) -> bool {
		self.flag.load(Ordering::Relaxed)
	}

	/// A token observing the same flag, for handing to nested operations.
	pub fn child(&self) -> Self {
		Self {
			flag: Arc::clone(&self.flag),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_log::test]
	fn test_cancel_propagates_to_children() {
		let token = CancelToken::new();
		let child = token.child();
		assert!(!child.is_cancelled());

		token.cancel();
		assert!(child.is_cancelled());
	}

	#[test_log::test]
	fn test_cancel_is_idempotent() {
		let token = CancelToken::new();
		token.cancel();
		token.cancel();
		assert!(token.is_cancelled());
	}
}
