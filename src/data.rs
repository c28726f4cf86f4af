//! Core data model: raw records, validated entities, issues, batch results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One raw row of the input source: an ordered column-to-value mapping.
///
/// Records are ephemeral — they exist only between being pulled from the
/// source and being converted to an [`Entity`] or rejected. The header is
/// shared across all records of a run to avoid per-row allocation.
#[derive(Debug, Clone)]
pub struct RawRecord {
	/// Column names, shared with the source
	pub columns: Arc<Vec<String>>,
	/// Field values, positionally aligned with `columns`
	pub values: Vec<String>,
	/// 1-based source row (excluding the header row)
	pub row: usize,
}

impl RawRecord {
	/// Look up a field value by column name. Missing columns and columns
	/// beyond the value count both return `None`.
	pub fn get(&self, column: &str) -> Option<&str> {
		let idx = self.columns.iter().position(|c| c == column)?;
		self.values.get(idx).map(String::as_str)
	}
}

/// A validated business record derived from a [`RawRecord`].
///
/// Immutable once emitted; the ticket identifier is guaranteed unique
/// within the run the entity was validated against (duplicates are
/// reported as issues, never silently dropped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
	/// Mandatory unique identifier
	pub ticket: String,
	/// Optional display name
	pub name: Option<String>,
	/// Optional free-form details
	pub details: Option<String>,
	/// Optional image URL for display
	pub image_url: Option<String>,
	/// 1-based row in the source this entity came from
	pub source_row: usize,
	/// When the entity was materialized
	pub created_at: DateTime<Utc>,
}

impl Entity {
	/// Build an entity from a raw record. `id_column` names the column
	/// holding the unique identifier (see
	/// [`crate::validate::ValidationRules::identifier_column`]).
	pub fn from_record(record: &RawRecord, id_column: &str) -> Self {
		let opt = |col: &str| {
			record
				.get(col)
				.map(str::trim)
				.filter(|v| !v.is_empty())
				.map(str::to_string)
		};
		Self {
			ticket: record.get(id_column).unwrap_or_default().trim().to_string(),
			name: opt("name"),
			details: opt("details"),
			image_url: opt("image_url"),
			source_row: record.row,
			created_at: Utc::now(),
		}
	}
}

/// Severity of a validation issue. Errors block entity conversion;
/// warnings do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueSeverity {
	Error,
	Warning,
}

/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
	/// A required column is absent from the header
	MissingColumn,
	/// A field value does not match its column's format rule
	InvalidFormat,
	/// The ticket identifier was already seen earlier in the run
	DuplicateIdentifier,
	/// A URL field is present but not a plausible URL
	InvalidUrl,
	/// An optional field is present but blank
	EmptyValue,
}

impl std::fmt::Display for IssueKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			IssueKind::MissingColumn => write!(f, "missing-column"),
			IssueKind::InvalidFormat => write!(f, "invalid-format"),
			IssueKind::DuplicateIdentifier => write!(f, "duplicate-identifier"),
			IssueKind::InvalidUrl => write!(f, "invalid-url"),
			IssueKind::EmptyValue => write!(f, "empty-value"),
		}
	}
}

/// One validation finding, tied to a source row and column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
	pub severity: IssueSeverity,
	pub kind: IssueKind,
	/// 1-based source row; 0 for header/stream-level issues
	pub row: usize,
	pub column: String,
	pub message: String,
}

impl ValidationIssue {
	pub fn error(kind: IssueKind, row: usize, column: &str, message: impl Into<String>) -> Self {
		Self {
			severity: IssueSeverity::Error,
			kind,
			row,
			column: column.to_string(),
			message: message.into(),
		}
	}

	pub fn warning(kind: IssueKind, row: usize, column: &str, message: impl Into<String>) -> Self {
		Self {
			severity: IssueSeverity::Warning,
			kind,
			row,
			column: column.to_string(),
			message: message.into(),
		}
	}

	pub fn is_error(&self) -> bool {
		self.severity == IssueSeverity::Error
	}
}

/// Result of validating one batch of records.
///
/// Emitted once per completed batch; the ingestor retains no references to
/// a batch after yielding it, which is what bounds ingestion memory to one
/// batch width. Callers accumulate batch results (see [`RunSummary`]) when
/// a whole-source view is needed.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
	/// Rows consumed for this emission. A cancelled marker instead reports
	/// the total rows seen across the whole run before cancellation.
	pub total_rows: usize,
	/// Rows converted to entities in this batch
	pub valid_rows: usize,
	/// Converted entities, in source order
	pub entities: Vec<Entity>,
	/// Issues found in this batch (plus header issues on the first batch)
	pub issues: Vec<ValidationIssue>,
	/// Ticket identifiers flagged as duplicates in this batch
	pub duplicate_tickets: Vec<String>,
	/// Set on the terminal marker of a cancelled run
	pub cancelled: bool,
}

impl BatchResult {
	pub fn error_count(&self) -> usize {
		self.issues.iter().filter(|i| i.is_error()).count()
	}

	pub fn warning_count(&self) -> usize {
		self.issues.len() - self.error_count()
	}
}

/// Whole-run accumulation of [`BatchResult`]s.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
	pub total_rows: usize,
	pub valid_rows: usize,
	pub entities: Vec<Entity>,
	pub issues: Vec<ValidationIssue>,
	pub duplicate_tickets: Vec<String>,
	/// First few converted entities, bounded regardless of run size
	pub preview: Vec<Entity>,
	pub cancelled: bool,
	/// Batches absorbed so far
	pub batches: usize,
}

impl RunSummary {
	/// Fold one batch into the summary. Cancelled markers carry run-total
	/// row counts and contribute no rows of their own.
	pub fn absorb(&mut self, batch: BatchResult) {
		if batch.cancelled {
			self.cancelled = true;
			self.total_rows = batch.total_rows;
			self.issues.extend(batch.issues);
			return;
		}
		self.total_rows += batch.total_rows;
		self.valid_rows += batch.valid_rows;
		self.issues.extend(batch.issues);
		self.duplicate_tickets.extend(batch.duplicate_tickets);
		self.entities.extend(batch.entities);
		self.batches += 1;
	}

	pub fn error_count(&self) -> usize {
		self.issues.iter().filter(|i| i.is_error()).count()
	}

	pub fn has_errors(&self) -> bool {
		self.issues.iter().any(|i| i.is_error())
	}

	/// Issue totals broken down by kind, for import reports.
	pub fn issue_counts(&self) -> HashMap<IssueKind, usize> {
		let mut counts = HashMap::new();
		for issue in &self.issues {
			*counts.entry(issue.kind).or_insert(0) += 1;
		}
		counts
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(columns: &[&str], values: &[&str], row: usize) -> RawRecord {
		RawRecord {
			columns: Arc::new(columns.iter().map(|s| s.to_string()).collect()),
			values: values.iter().map(|s| s.to_string()).collect(),
			row,
		}
	}

	#[test_log::test]
	fn test_record_field_lookup() {
		let rec = record(&["ticket", "name"], &["T-1", "Alpha"], 1);
		assert_eq!(rec.get("ticket"), Some("T-1"));
		assert_eq!(rec.get("name"), Some("Alpha"));
		assert_eq!(rec.get("missing"), None);

		// Short row: trailing columns read as absent
		let rec = record(&["ticket", "name"], &["T-2"], 2);
		assert_eq!(rec.get("name"), None);
	}

	#[test_log::test]
	fn test_entity_from_record_trims_and_drops_blanks() {
		let rec = record(
			&["ticket", "name", "details", "image_url"],
			&[" T-9 ", "", "  some text ", "https://example.com/a.png"],
			3,
		);
		let entity = Entity::from_record(&rec, "ticket");
		assert_eq!(entity.ticket, "T-9");
		assert_eq!(entity.name, None);
		assert_eq!(entity.details.as_deref(), Some("some text"));
		assert_eq!(entity.source_row, 3);
	}

	#[test_log::test]
	fn test_issue_kind_display() {
		assert_eq!(IssueKind::MissingColumn.to_string(), "missing-column");
		assert_eq!(
			IssueKind::DuplicateIdentifier.to_string(),
			"duplicate-identifier"
		);
		assert_eq!(IssueKind::InvalidUrl.to_string(), "invalid-url");
	}

	#[test_log::test]
	fn test_summary_absorbs_batches() {
		let mut summary = RunSummary::default();
		summary.absorb(BatchResult {
			total_rows: 10,
			valid_rows: 8,
			entities: Vec::new(),
			issues: vec![ValidationIssue::error(
				IssueKind::InvalidFormat,
				3,
				"ticket",
				"bad ticket",
			)],
			duplicate_tickets: vec!["T-1".to_string()],
			cancelled: false,
		});
		summary.absorb(BatchResult {
			total_rows: 5,
			valid_rows: 5,
			..Default::default()
		});

		assert_eq!(summary.total_rows, 15);
		assert_eq!(summary.valid_rows, 13);
		assert_eq!(summary.batches, 2);
		assert_eq!(summary.error_count(), 1);
		assert_eq!(summary.issue_counts()[&IssueKind::InvalidFormat], 1);
	}

	#[test_log::test]
	fn test_summary_cancelled_marker_overrides_totals() {
		let mut summary = RunSummary::default();
		summary.absorb(BatchResult {
			total_rows: 100,
			valid_rows: 100,
			..Default::default()
		});
		summary.absorb(BatchResult {
			total_rows: 137,
			cancelled: true,
			..Default::default()
		});

		assert!(summary.cancelled);
		assert_eq!(summary.total_rows, 137);
		assert_eq!(summary.batches, 1);
	}
}
