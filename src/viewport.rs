//! Viewport virtualization: compute the visible entity subset per render
//! tick for linear, circular, and grid layouts

use std::f64::consts::PI;
use std::sync::Arc;

use tracing::debug;

use crate::data::Entity;
use crate::memory::MemoryGovernor;

/// Layout geometry the calculator can virtualize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
	/// Items along one axis at fixed pitch
	Linear,
	/// Items distributed evenly around a full turn
	Circular,
	/// Row-major grid, columns derived from available width
	Grid,
}

/// Caller-supplied viewport geometry and virtualization limits.
#[derive(Debug, Clone)]
pub struct ViewportConfig {
	pub viewport_w: f64,
	pub viewport_h: f64,
	pub item_w: f64,
	pub item_h: f64,
	/// Extra items kept on each side of the visible window
	pub buffer_items: usize,
	/// Hard rendering-cost ceiling on returned items
	pub max_visible_items: usize,
}

impl Default for ViewportConfig {
	fn default() -> Self {
		Self {
			viewport_w: 800.0,
			viewport_h: 600.0,
			item_w: 120.0,
			item_h: 80.0,
			buffer_items: 5,
			max_visible_items: 100,
		}
	}
}

impl ViewportConfig {
	pub fn with_viewport(mut self, w: f64, h: f64) -> Self {
		self.viewport_w = w;
		self.viewport_h = h;
		self
	}

	pub fn with_item_size(mut self, w: f64, h: f64) -> Self {
		self.item_w = w;
		self.item_h = h;
		self
	}

	pub fn with_buffer_items(mut self, buffer: usize) -> Self {
		self.buffer_items = buffer;
		self
	}

	pub fn with_max_visible_items(mut self, max: usize) -> Self {
		self.max_visible_items = max.max(1);
		self
	}
}

/// One item that must currently be drawn, with its layout position.
#[derive(Debug, Clone)]
pub struct DisplayItem {
	/// Index into the entity collection
	pub index: usize,
	pub ticket: String,
	pub x: f64,
	pub y: f64,
	/// Angle relative to current rotation, circular layout only
	pub angle: Option<f64>,
}

/// The computed visible subset. Recomputed fresh on every query and never
/// cached across geometry changes.
#[derive(Debug, Clone, Default)]
pub struct Viewport {
	/// Index of the first visible item
	pub start: usize,
	/// Index of the last visible item
	pub end: usize,
	pub items: Vec<DisplayItem>,
	/// Total entity count backing the collection
	pub total: usize,
}

/// Retained-memory report for the calculator itself.
#[derive(Debug, Clone)]
pub struct ViewportMemoryStats {
	pub total_entities: usize,
	pub retained_bytes: usize,
	pub buffer_items: usize,
	pub max_visible_items: usize,
}

/// Computes visible-item subsets for three layout geometries.
///
/// Synchronous and allocation-light: each query is O(visible window), not
/// O(collection), so it is safe to call from a render loop. Under memory
/// pressure (via a shared governor) the effective buffer and item cap
/// shrink before the window math runs.
pub struct ViewportCalculator {
	tickets: Vec<String>,
	config: ViewportConfig,
	governor: Option<Arc<MemoryGovernor>>,
}

impl ViewportCalculator {
	pub fn new(config: ViewportConfig) -> Self {
		Self {
			tickets: Vec::new(),
			config,
			governor: None,
		}
	}

	pub fn with_governor(mut self, governor: Arc<MemoryGovernor>) -> Self {
		self.governor = Some(governor);
		self
	}

	/// Take on a materialized entity collection. Only tickets are
	/// retained; full entities stay with the caller.
	pub fn initialize(&mut self, entities: &[Entity]) {
		self.tickets = entities.iter().map(|e| e.ticket.clone()).collect();
		debug!("Viewport: initialized with {} entities", self.tickets.len());
	}

	pub fn len(&self) -> usize {
		self.tickets.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tickets.is_empty()
	}

	pub fn config(&self) -> &ViewportConfig {
		&self.config
	}

	/// Degrade virtualization limits for large collections. Thresholds are
	/// deliberately simple, not adaptive to measured frame time.
	pub fn optimize_for_large_dataset(&mut self) {
		let n = self.tickets.len();
		if n > 5000 {
			self.config.buffer_items = 3;
			self.config.max_visible_items = 50;
		} else if n > 1000 {
			self.config.buffer_items = (self.config.buffer_items / 2).max(2);
			self.config.max_visible_items = (self.config.max_visible_items / 2).max(50);
		}
		debug!(
			"Viewport: optimized for n={} (buffer={}, max_visible={})",
			n, self.config.buffer_items, self.config.max_visible_items
		);
	}

	/// Shrink buffers in response to the governor's pressure signal.
	pub fn apply_memory_pressure(&mut self) {
		self.config.buffer_items = (self.config.buffer_items / 2).max(2);
		self.config.max_visible_items = (self.config.max_visible_items / 2).max(20);
	}

	/// Limits in force for the next query, after consulting the governor.
	fn effective_config(&self) -> (usize, usize) {
		let mut buffer = self.config.buffer_items;
		let mut cap = self.config.max_visible_items;
		if let Some(governor) = &self.governor {
			if governor.pressure() {
				buffer = (buffer / 2).max(2);
				cap = (cap / 2).max(20);
			}
		}
		(buffer, cap)
	}

	/// Compute the visible subset for the given layout and offset. The
	/// offset is pixels for Linear/Grid scrolling and radians of rotation
	/// for Circular. The item count never exceeds the visible cap or the
	/// collection size, regardless of what the range math would include.
	pub fn query(&self, mode: LayoutMode, offset: f64) -> Viewport {
		let n = self.tickets.len();
		if n == 0 {
			return Viewport::default();
		}
		let (buffer, cap) = self.effective_config();
		let cap = cap.min(n);

		let mut items = match mode {
			LayoutMode::Linear => self.linear_items(offset, buffer),
			LayoutMode::Grid => self.grid_items(offset, buffer),
			LayoutMode::Circular => self.circular_items(offset),
		};
		items.truncate(cap);

		let start = items.first().map(|i| i.index).unwrap_or(0);
		let end = items.last().map(|i| i.index).unwrap_or(0);
		Viewport {
			start,
			end,
			items,
			total: n,
		}
	}

	fn linear_items(&self, offset: f64, buffer: usize) -> Vec<DisplayItem> {
		let n = self.tickets.len();
		let pitch = self.config.item_h.max(1.0);
		let first = (offset / pitch).floor() as isize;
		let per_screen = (self.config.viewport_h / pitch).ceil() as isize;

		let start = (first - buffer as isize).max(0) as usize;
		let end = ((first + per_screen + buffer as isize).max(0) as usize).min(n - 1);

		(start..=end)
			.map(|index| DisplayItem {
				index,
				ticket: self.tickets[index].clone(),
				x: 0.0,
				y: index as f64 * pitch - offset,
				angle: None,
			})
			.collect()
	}

	fn grid_items(&self, offset: f64, buffer: usize) -> Vec<DisplayItem> {
		let n = self.tickets.len();
		let columns = ((self.config.viewport_w / self.config.item_w.max(1.0)).floor() as usize).max(1);
		let row_pitch = self.config.item_h.max(1.0);
		let first_row = (offset / row_pitch).floor() as isize;
		let rows_per_screen = (self.config.viewport_h / row_pitch).ceil() as isize;

		let start_row = (first_row - buffer as isize).max(0) as usize;
		let end_row = (first_row + rows_per_screen + buffer as isize).max(0) as usize;

		let start = (start_row * columns).min(n - 1);
		let end = ((end_row + 1) * columns).saturating_sub(1).min(n - 1);

		(start..=end)
			.map(|index| {
				let row = index / columns;
				let col = index % columns;
				DisplayItem {
					index,
					ticket: self.tickets[index].clone(),
					x: col as f64 * self.config.item_w,
					y: row as f64 * row_pitch - offset,
					angle: None,
				}
			})
			.collect()
	}

	/// An item at angle theta is visible iff theta, normalized to
	/// (-pi, pi] relative to the current rotation, falls within a fixed
	/// half-turn window. The index range is derived arithmetically so the
	/// cost stays proportional to the window, not the collection.
	fn circular_items(&self, rotation: f64) -> Vec<DisplayItem> {
		let n = self.tickets.len();
		let step = 2.0 * PI / n as f64;
		let half_window = PI / 2.0;

		let start_k = ((rotation - half_window) / step).ceil() as i64;
		let end_k = ((rotation + half_window) / step).floor() as i64;
		let count = ((end_k - start_k + 1).max(0) as usize).min(n);

		let radius = ((self.config.viewport_w.min(self.config.viewport_h)) / 2.0
			- self.config.item_w.max(self.config.item_h) / 2.0)
			.max(0.0);
		let cx = self.config.viewport_w / 2.0;
		let cy = self.config.viewport_h / 2.0;

		(start_k..start_k + count as i64)
			.map(|k| {
				let index = k.rem_euclid(n as i64) as usize;
				let angle = k as f64 * step - rotation;
				DisplayItem {
					index,
					ticket: self.tickets[index].clone(),
					x: cx + radius * angle.sin() - self.config.item_w / 2.0,
					y: cy - radius * angle.cos() - self.config.item_h / 2.0,
					angle: Some(angle),
				}
			})
			.collect()
	}

	pub fn memory_stats(&self) -> ViewportMemoryStats {
		let retained: usize = self
			.tickets
			.iter()
			.map(|t| t.len() + std::mem::size_of::<String>())
			.sum();
		ViewportMemoryStats {
			total_entities: self.tickets.len(),
			retained_bytes: retained,
			buffer_items: self.config.buffer_items,
			max_visible_items: self.config.max_visible_items,
		}
	}
}
