//! Field-level validation rules and run-scoped duplicate tracking

use std::collections::HashSet;

use crate::data::{IssueKind, RawRecord, ValidationIssue};

/// Maximum accepted ticket identifier length.
const MAX_TICKET_LEN: usize = 64;

/// Format rule applied to one column's values.
#[derive(Debug, Clone)]
pub enum FieldValidator {
	/// Non-empty, alphanumeric plus `-`/`_`, bounded length
	Ticket,
	/// http(s) URL; violations are warnings, not errors
	Url,
	/// Free text with a length cap; violations are warnings
	Text { max_len: usize },
	/// Accept anything
	Any,
}

impl FieldValidator {
	/// Check one value. `None` means the value passes.
	fn check(&self, value: &str, row: usize, column: &str) -> Option<ValidationIssue> {
		match self {
			FieldValidator::Ticket => {
				let value = value.trim();
				if value.is_empty() {
					return Some(ValidationIssue::error(
						IssueKind::InvalidFormat,
						row,
						column,
						"ticket identifier is empty",
					));
				}
				if value.len() > MAX_TICKET_LEN {
					return Some(ValidationIssue::error(
						IssueKind::InvalidFormat,
						row,
						column,
						format!("ticket exceeds {MAX_TICKET_LEN} characters"),
					));
				}
				if !value.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
					return Some(ValidationIssue::error(
						IssueKind::InvalidFormat,
						row,
						column,
						format!("ticket '{value}' contains invalid characters"),
					));
				}
				None
			}
			FieldValidator::Url => {
				let value = value.trim();
				if value.is_empty() {
					return None;
				}
				if value.starts_with("http://") || value.starts_with("https://") {
					None
				} else {
					Some(ValidationIssue::warning(
						IssueKind::InvalidUrl,
						row,
						column,
						format!("'{value}' is not an http(s) URL"),
					))
				}
			}
			FieldValidator::Text { max_len } => {
				if value.chars().count() > *max_len {
					Some(ValidationIssue::warning(
						IssueKind::InvalidFormat,
						row,
						column,
						format!("value exceeds {max_len} characters and may be truncated on display"),
					))
				} else {
					None
				}
			}
			FieldValidator::Any => None,
		}
	}
}

/// One column of the record contract.
#[derive(Debug, Clone)]
pub struct ColumnRule {
	pub name: String,
	pub required: bool,
	pub validator: FieldValidator,
}

impl ColumnRule {
	pub fn new(name: &str, required: bool, validator: FieldValidator) -> Self {
		Self {
			name: name.to_string(),
			required,
			validator,
		}
	}
}

/// The full column contract for a record source.
#[derive(Debug, Clone)]
pub struct ValidationRules {
	pub columns: Vec<ColumnRule>,
}

impl Default for ValidationRules {
	fn default() -> Self {
		Self::standard()
	}
}

impl ValidationRules {
	/// The standard entity contract: required `ticket`, optional
	/// descriptive fields.
	pub fn standard() -> Self {
		Self {
			columns: vec![
				ColumnRule::new("ticket", true, FieldValidator::Ticket),
				ColumnRule::new("name", false, FieldValidator::Text { max_len: 200 }),
				ColumnRule::new("details", false, FieldValidator::Text { max_len: 2000 }),
				ColumnRule::new("image_url", false, FieldValidator::Url),
			],
		}
	}

	/// The column carrying the unique identifier: the first rule using the
	/// `Ticket` validator. Duplicate tracking and entity conversion key on
	/// this column, so a contract keyed on e.g. `sku` works unchanged.
	pub fn identifier_column(&self) -> &str {
		self.columns
			.iter()
			.find(|r| matches!(r.validator, FieldValidator::Ticket))
			.map(|r| r.name.as_str())
			.unwrap_or("ticket")
	}

	/// Check the header against the contract. Fail-soft: missing required
	/// columns are reported as errors but parsing continues, so downstream
	/// row errors are still collected in the same pass.
	pub fn check_header(&self, columns: &[String]) -> Vec<ValidationIssue> {
		let mut issues = Vec::new();
		for rule in self.columns.iter().filter(|r| r.required) {
			if !columns.iter().any(|c| c == &rule.name) {
				issues.push(ValidationIssue::error(
					IssueKind::MissingColumn,
					0,
					&rule.name,
					format!("required column '{}' is missing from the header", rule.name),
				));
			}
		}
		issues
	}

	/// Validate one record against every column rule.
	pub fn validate_record(&self, record: &RawRecord) -> Vec<ValidationIssue> {
		let mut issues = Vec::new();
		for rule in &self.columns {
			match record.get(&rule.name) {
				Some(value) => {
					if value.trim().is_empty() && !rule.required {
						issues.push(ValidationIssue::warning(
							IssueKind::EmptyValue,
							record.row,
							&rule.name,
							format!("optional column '{}' is blank", rule.name),
						));
						continue;
					}
					if let Some(issue) = rule.validator.check(value, record.row, &rule.name) {
						issues.push(issue);
					}
				}
				None if rule.required => {
					issues.push(ValidationIssue::error(
						IssueKind::InvalidFormat,
						record.row,
						&rule.name,
						format!("required value '{}' is absent", rule.name),
					));
				}
				None => {}
			}
		}
		issues
	}
}

/// Run-scoped set of seen ticket identifiers.
///
/// Threaded explicitly through batch processing so duplicate detection is
/// global across all batches of one run while staying isolated between
/// concurrent runs.
#[derive(Debug, Default)]
pub struct DuplicateTracker {
	seen: HashSet<String>,
}

impl DuplicateTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a ticket. Returns `false` if it was already seen in this run.
	pub fn observe(&mut self, ticket: &str) -> bool {
		self.seen.insert(ticket.to_string())
	}

	pub fn seen_count(&self) -> usize {
		self.seen.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	fn record(columns: &[&str], values: &[&str], row: usize) -> RawRecord {
		RawRecord {
			columns: Arc::new(columns.iter().map(|s| s.to_string()).collect()),
			values: values.iter().map(|s| s.to_string()).collect(),
			row,
		}
	}

	#[test_log::test]
	fn test_header_check_is_fail_soft_data() {
		let rules = ValidationRules::standard();
		let issues = rules.check_header(&["name".to_string(), "details".to_string()]);
		assert_eq!(issues.len(), 1);
		assert_eq!(issues[0].kind, IssueKind::MissingColumn);
		assert_eq!(issues[0].column, "ticket");
		assert!(issues[0].is_error());

		assert!(rules
			.check_header(&["ticket".to_string(), "name".to_string()])
			.is_empty());
	}

	#[test_log::test]
	fn test_ticket_validation() {
		let rules = ValidationRules::standard();

		let ok = record(&["ticket"], &["ABC-123_x"], 1);
		assert!(rules.validate_record(&ok).is_empty());

		let empty = record(&["ticket"], &[""], 2);
		let issues = rules.validate_record(&empty);
		assert_eq!(issues.len(), 1);
		assert_eq!(issues[0].kind, IssueKind::InvalidFormat);
		assert!(issues[0].is_error());

		let bad_chars = record(&["ticket"], &["AB C!"], 3);
		let issues = rules.validate_record(&bad_chars);
		assert!(issues[0].is_error());

		let long = "x".repeat(65);
		let issues = rules.validate_record(&record(&["ticket"], &[&long], 4));
		assert!(issues[0].is_error());
	}

	#[test_log::test]
	fn test_url_violations_are_warnings() {
		let rules = ValidationRules::standard();
		let rec = record(&["ticket", "image_url"], &["T-1", "ftp://host/x.png"], 1);
		let issues = rules.validate_record(&rec);
		assert_eq!(issues.len(), 1);
		assert_eq!(issues[0].kind, IssueKind::InvalidUrl);
		assert!(!issues[0].is_error());
	}

	#[test_log::test]
	fn test_blank_optional_value_warns() {
		let rules = ValidationRules::standard();
		let rec = record(&["ticket", "name"], &["T-1", "  "], 1);
		let issues = rules.validate_record(&rec);
		assert_eq!(issues.len(), 1);
		assert_eq!(issues[0].kind, IssueKind::EmptyValue);
		assert!(!issues[0].is_error());
	}

	#[test_log::test]
	fn test_identifier_column_follows_ticket_rule() {
		assert_eq!(ValidationRules::standard().identifier_column(), "ticket");

		let rules = ValidationRules {
			columns: vec![
				ColumnRule::new("name", false, FieldValidator::Text { max_len: 200 }),
				ColumnRule::new("sku", true, FieldValidator::Ticket),
			],
		};
		assert_eq!(rules.identifier_column(), "sku");
	}

	#[test_log::test]
	fn test_duplicate_tracker() {
		let mut tracker = DuplicateTracker::new();
		assert!(tracker.observe("T-1"));
		assert!(tracker.observe("T-2"));
		assert!(!tracker.observe("T-1"));
		assert_eq!(tracker.seen_count(), 2);
	}
}
