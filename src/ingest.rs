//! Streaming batch ingestion: parse, validate, and convert records under a
//! bounded memory budget

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::data::{BatchResult, Entity, IssueKind, RawRecord, ValidationIssue};
use crate::error::{SourceError, SourceResult};
use crate::memory::MemoryGovernor;
use crate::validate::{DuplicateTracker, ValidationRules};

/// Default cap on a single delimited source file.
const MAX_SOURCE_BYTES: u64 = 50 * 1024 * 1024;

/// Yield to the executor at most this often while pulling records.
const YIELD_INTERVAL: Duration = Duration::from_millis(100);

/// Anything that yields ordered column-to-value records: a file, a buffer,
/// or a network stream adapter supplied by a collaborator.
pub trait RecordSource {
	/// Column names from the header, fixed for the life of the source.
	fn columns(&self) -> &[String];

	/// Pull the next record. `Ok(None)` signals end of input; any error is
	/// stream-level and fatal for the run.
	fn next_record(&mut self) -> SourceResult<Option<RawRecord>>;
}

/// Record source over delimited text (comma by default) with double-quote
/// aware field splitting. The header row is consumed at construction.
#[derive(Debug)]
pub struct DelimitedSource<R: BufRead> {
	reader: R,
	columns: Arc<Vec<String>>,
	delimiter: char,
	/// 1-based data row of the last record returned
	row: usize,
	/// Physical line in the file, header included
	line: usize,
}

impl DelimitedSource<BufReader<File>> {
	/// Open a delimited file, rejecting missing and oversized sources
	/// before any parsing happens.
	pub fn from_path(path: &Path) -> SourceResult<Self> {
		Self::from_path_with_limit(path, MAX_SOURCE_BYTES)
	}

	pub fn from_path_with_limit(path: &Path, limit: u64) -> SourceResult<Self> {
		if !path.exists() {
			return Err(SourceError::NotFound {
				path: path.to_path_buf(),
			});
		}
		let size = std::fs::metadata(path)?.len();
		if size > limit {
			return Err(SourceError::Oversize { size, limit });
		}
		debug!("Source: opening {} ({} bytes)", path.display(), size);
		Self::from_reader(BufReader::new(File::open(path)?))
	}
}

impl DelimitedSource<Cursor<&'static str>> {
	/// Source over a string literal, for demos and tests.
	pub fn from_text(text: &'static str) -> SourceResult<Self> {
		Self::from_reader(Cursor::new(text))
	}
}

impl<R: BufRead> DelimitedSource<R> {
	pub fn from_reader(reader: R) -> SourceResult<Self> {
		Self::with_delimiter(reader, ',')
	}

	pub fn with_delimiter(mut reader: R, delimiter: char) -> SourceResult<Self> {
		let mut header = String::new();
		let read = reader
			.read_line(&mut header)
			.map_err(|e| Self::map_io(e, 1))?;
		if read == 0 {
			return Err(SourceError::Encoding {
				line: 1,
				reason: "source is empty, no header row".to_string(),
			});
		}
		let columns: Vec<String> = split_fields(header.trim_end_matches(['\r', '\n']), delimiter)
			.into_iter()
			.map(|c| c.trim().to_string())
			.collect();
		Ok(Self {
			reader,
			columns: Arc::new(columns),
			delimiter,
			row: 0,
			line: 1,
		})
	}

	fn map_io(err: std::io::Error, line: usize) -> SourceError {
		if err.kind() == std::io::ErrorKind::InvalidData {
			SourceError::Encoding {
				line,
				reason: err.to_string(),
			}
		} else {
			SourceError::Io(err)
		}
	}
}

impl<R: BufRead> RecordSource for DelimitedSource<R> {
	fn columns(&self) -> &[String] {
		&self.columns
	}

	fn next_record(&mut self) -> SourceResult<Option<RawRecord>> {
		loop {
			let mut line = String::new();
			let read = self
				.reader
				.read_line(&mut line)
				.map_err(|e| Self::map_io(e, self.line + 1))?;
			if read == 0 {
				return Ok(None);
			}
			self.line += 1;
			let trimmed = line.trim_end_matches(['\r', '\n']);
			if trimmed.trim().is_empty() {
				continue; // blank lines carry no record
			}
			self.row += 1;
			return Ok(Some(RawRecord {
				columns: Arc::clone(&self.columns),
				values: split_fields(trimmed, self.delimiter),
				row: self.row,
			}));
		}
	}
}

/// Split one line into fields, honoring double quotes. A doubled quote
/// inside a quoted field is an escaped quote.
fn split_fields(line: &str, delimiter: char) -> Vec<String> {
	let mut fields = Vec::new();
	let mut field = String::new();
	let mut in_quotes = false;
	let mut chars = line.chars().peekable();
	while let Some(c) = chars.next() {
		if in_quotes {
			if c == '"' {
				if chars.peek() == Some(&'"') {
					chars.next();
					field.push('"');
				} else {
					in_quotes = false;
				}
			} else {
				field.push(c);
			}
		} else if c == '"' && field.is_empty() {
			in_quotes = true;
		} else if c == delimiter {
			fields.push(std::mem::take(&mut field));
		} else {
			field.push(c);
		}
	}
	fields.push(field);
	fields
}

/// In-memory record source, for tests and programmatic callers.
pub struct VecSource {
	columns: Arc<Vec<String>>,
	rows: std::collections::VecDeque<Vec<String>>,
	row: usize,
}

impl VecSource {
	pub fn new(columns: &[&str], rows: Vec<Vec<String>>) -> Self {
		Self {
			columns: Arc::new(columns.iter().map(|s| s.to_string()).collect()),
			rows: rows.into(),
			row: 0,
		}
	}
}

impl RecordSource for VecSource {
	fn columns(&self) -> &[String] {
		&self.columns
	}

	fn next_record(&mut self) -> SourceResult<Option<RawRecord>> {
		match self.rows.pop_front() {
			Some(values) => {
				self.row += 1;
				Ok(Some(RawRecord {
					columns: Arc::clone(&self.columns),
					values,
					row: self.row,
				}))
			}
			None => Ok(None),
		}
	}
}

/// Options for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
	/// Target batch width B; steady-state memory is O(B)
	pub batch_size: usize,
	/// Advisory memory ceiling checked after each batch
	pub memory_ceiling_mb: u64,
	/// How many converted entities to retain for preview
	pub preview_limit: usize,
	/// Validate without materializing entities
	pub validate_only: bool,
	/// Cooperative cancellation flag, checked before each record
	pub cancel: CancelToken,
}

impl Default for IngestOptions {
	fn default() -> Self {
		Self {
			batch_size: 1000,
			memory_ceiling_mb: 500,
			preview_limit: 10,
			validate_only: false,
			cancel: CancelToken::new(),
		}
	}
}

impl IngestOptions {
	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size.max(1);
		self
	}

	pub fn with_memory_ceiling_mb(mut self, mb: u64) -> Self {
		self.memory_ceiling_mb = mb;
		self
	}

	pub fn with_preview_limit(mut self, limit: usize) -> Self {
		self.preview_limit = limit;
		self
	}

	pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
		self.cancel = cancel;
		self
	}

	pub fn validate_only(mut self) -> Self {
		self.validate_only = true;
		self
	}
}

/// Parses, validates, and batches a record stream under a memory ceiling.
///
/// Records are pulled incrementally and buffered up to the batch width;
/// each completed batch is validated and yielded, and the buffer is
/// cleared before the next batch begins. Duplicate identifiers are tracked
/// globally across the run, so cross-batch duplicates are still caught.
#[derive(Default)]
pub struct StreamBatchIngestor {
	rules: ValidationRules,
	governor: Option<Arc<MemoryGovernor>>,
}

impl StreamBatchIngestor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_rules(mut self, rules: ValidationRules) -> Self {
		self.rules = rules;
		self
	}

	/// Attach a governor consulted (advisory, never blocking) after each
	/// batch emission.
	pub fn with_governor(mut self, governor: Arc<MemoryGovernor>) -> Self {
		self.governor = Some(governor);
		self
	}

	/// Lazy, cancellable route: one [`BatchResult`] per completed batch.
	pub fn stream<S: RecordSource>(&self, source: S, options: IngestOptions) -> IngestStream<S> {
		let header_issues = self.rules.check_header(source.columns());
		if !header_issues.is_empty() {
			warn!(
				"Ingest: header mismatch ({} issues), continuing fail-soft",
				header_issues.len()
			);
		}
		IngestStream {
			source,
			rules: self.rules.clone(),
			governor: self.governor.clone(),
			options,
			tracker: DuplicateTracker::new(),
			buffer: Vec::new(),
			preview: Vec::new(),
			header_issues: Some(header_issues),
			rows_seen: 0,
			done: false,
			last_yield: Instant::now(),
		}
	}

	/// Aggregate route: drive the stream to completion and fold every
	/// batch into one [`crate::data::RunSummary`].
	pub async fn run<S: RecordSource>(
		&self,
		source: S,
		options: IngestOptions,
	) -> crate::data::RunSummary {
		let mut stream = self.stream(source, options);
		let mut summary = crate::data::RunSummary::default();
		while let Some(batch) = stream.next_batch().await {
			summary.absorb(batch);
		}
		summary.preview = stream.preview().to_vec();
		info!(
			"Ingest: run complete, {} rows, {} valid, {} issues",
			summary.total_rows,
			summary.valid_rows,
			summary.issues.len()
		);
		summary
	}
}

/// Lazy sequence of batch results over one record source.
pub struct IngestStream<S: RecordSource> {
	source: S,
	rules: ValidationRules,
	governor: Option<Arc<MemoryGovernor>>,
	options: IngestOptions,
	tracker: DuplicateTracker,
	buffer: Vec<RawRecord>,
	preview: Vec<Entity>,
	/// Taken and attached to the first emission
	header_issues: Option<Vec<ValidationIssue>>,
	rows_seen: usize,
	done: bool,
	last_yield: Instant,
}

impl<S: RecordSource> IngestStream<S> {
	/// Produce the next batch, or `None` once the stream has terminated.
	/// Terminal markers (cancellation, stream-level failure) are emitted
	/// exactly once; calling again afterwards returns `None`.
	pub async fn next_batch(&mut self) -> Option<BatchResult> {
		if self.done {
			return None;
		}
		loop {
			// Cooperative cancellation checkpoint, once per record. The
			// in-flight batch is discarded, not partially emitted.
			if self.options.cancel.is_cancelled() {
				self.done = true;
				self.buffer.clear();
				info!("Ingest: cancelled after {} rows", self.rows_seen);
				return Some(BatchResult {
					total_rows: self.rows_seen,
					issues: self.header_issues.take().unwrap_or_default(),
					cancelled: true,
					..Default::default()
				});
			}

			if self.last_yield.elapsed() >= YIELD_INTERVAL {
				smol::future::yield_now().await;
				self.last_yield = Instant::now();
			}

			match self.source.next_record() {
				Err(e) => {
					// Stream-level failures abort the run with a single
					// terminal invalid-format issue.
					self.done = true;
					let consumed = self.buffer.len();
					self.buffer.clear();
					warn!("Ingest: stream-level failure: {}", e);
					let mut issues = self.header_issues.take().unwrap_or_default();
					issues.push(ValidationIssue::error(
						IssueKind::InvalidFormat,
						self.rows_seen + 1,
						"",
						e.to_string(),
					));
					return Some(BatchResult {
						total_rows: consumed,
						issues,
						..Default::default()
					});
				}
				Ok(None) => {
					self.done = true;
					if self.buffer.is_empty() {
						// Header issues still surface even for an
						// all-blank source.
						let issues = self.header_issues.take().unwrap_or_default();
						if issues.is_empty() {
							return None;
						}
						return Some(BatchResult {
							issues,
							..Default::default()
						});
					}
					let batch = self.emit_batch();
					self.check_ceiling();
					return Some(batch);
				}
				Ok(Some(record)) => {
					self.rows_seen += 1;
					self.buffer.push(record);
					if self.buffer.len() >= self.options.batch_size {
						let batch = self.emit_batch();
						self.check_ceiling();
						return Some(batch);
					}
				}
			}
		}
	}

	/// Validate the buffered records and clear the buffer. Clearing here
	/// is the core memory-bounding mechanism: steady-state memory is one
	/// batch width, not the whole source.
	fn emit_batch(&mut self) -> BatchResult {
		let records = std::mem::take(&mut self.buffer);
		let mut batch = BatchResult {
			total_rows: records.len(),
			issues: self.header_issues.take().unwrap_or_default(),
			..Default::default()
		};

		let id_column = self.rules.identifier_column();
		for record in &records {
			let mut issues = self.rules.validate_record(record);

			if let Some(ticket) = record.get(id_column).map(str::trim).filter(|t| !t.is_empty()) {
				if !self.tracker.observe(ticket) {
					issues.push(ValidationIssue::error(
						IssueKind::DuplicateIdentifier,
						record.row,
						id_column,
						format!("identifier '{ticket}' was already seen in this run"),
					));
					batch.duplicate_tickets.push(ticket.to_string());
				}
			}

			let convertible = !issues.iter().any(|i| i.is_error());
			batch.issues.append(&mut issues);
			if convertible {
				batch.valid_rows += 1;
				if !self.options.validate_only {
					let entity = Entity::from_record(record, id_column);
					if self.preview.len() < self.options.preview_limit {
						self.preview.push(entity.clone());
					}
					batch.entities.push(entity);
				}
			}
		}

		debug!(
			"Ingest: batch of {} rows, {} valid, {} issues",
			batch.total_rows,
			batch.valid_rows,
			batch.issues.len()
		);
		batch
	}

	/// Advisory post-batch memory check: over the ceiling means an
	/// eviction hint, never a stall.
	fn check_ceiling(&self) {
		let Some(governor) = &self.governor else {
			return;
		};
		let sample = governor.sample();
		let ceiling = self.options.memory_ceiling_mb * 1024 * 1024;
		if sample.used_bytes > ceiling {
			warn!(
				"Ingest: {} exceeds {}MB ceiling, issuing eviction hint",
				sample, self.options.memory_ceiling_mb
			);
			governor.evict();
		}
	}

	/// First few converted entities, bounded for the whole run.
	pub fn preview(&self) -> &[Entity] {
		&self.preview
	}

	/// Records currently buffered (always strictly less than one batch
	/// between emissions).
	pub fn buffered(&self) -> usize {
		self.buffer.len()
	}

	pub fn rows_seen(&self) -> usize {
		self.rows_seen
	}

	pub fn is_done(&self) -> bool {
		self.done
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::RunSummary;
	use crate::memory::{GovernorConfig, MemoryGovernor, ScriptedProbe};
	use crate::validate::{ColumnRule, FieldValidator};
	use std::io::Write;
	use tempfile::TempDir;

	fn csv_source(text: &'static str) -> DelimitedSource<Cursor<&'static str>> {
		DelimitedSource::from_text(text).unwrap()
	}

	fn rows_source(count: usize) -> VecSource {
		let rows = (0..count)
			.map(|i| vec![format!("T-{i}"), format!("Item {i}")])
			.collect();
		VecSource::new(&["ticket", "name"], rows)
	}

	#[test_log::test]
	fn test_split_fields_with_quotes() {
		assert_eq!(split_fields("a,b,c", ','), vec!["a", "b", "c"]);
		assert_eq!(
			split_fields("\"a,b\",c", ','),
			vec!["a,b".to_string(), "c".to_string()]
		);
		assert_eq!(
			split_fields("\"say \"\"hi\"\"\",x", ','),
			vec!["say \"hi\"".to_string(), "x".to_string()]
		);
		assert_eq!(split_fields("a,,c", ','), vec!["a", "", "c"]);
	}

	#[test_log::test]
	fn test_delimited_source_reads_header_and_rows() {
		let mut source = csv_source("ticket,name\nT-1,Alpha\n\nT-2,Beta\n");
		assert_eq!(source.columns(), &["ticket", "name"]);

		let rec = source.next_record().unwrap().unwrap();
		assert_eq!(rec.get("ticket"), Some("T-1"));
		assert_eq!(rec.row, 1);

		// Blank line is skipped, row numbering stays contiguous
		let rec = source.next_record().unwrap().unwrap();
		assert_eq!(rec.get("ticket"), Some("T-2"));
		assert_eq!(rec.row, 2);

		assert!(source.next_record().unwrap().is_none());
	}

	#[test_log::test]
	fn test_source_not_found() {
		let err = DelimitedSource::from_path(Path::new("/no/such/records.csv")).unwrap_err();
		assert!(matches!(err, SourceError::NotFound { .. }));
	}

	#[test_log::test]
	fn test_source_oversize() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("big.csv");
		std::fs::write(&path, "ticket,name\nT-1,Alpha\n").unwrap();
		let err = DelimitedSource::from_path_with_limit(&path, 4).unwrap_err();
		assert!(matches!(err, SourceError::Oversize { .. }));
	}

	#[test_log::test]
	fn test_encoding_failure_is_stream_level() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("bad.csv");
		let mut f = std::fs::File::create(&path).unwrap();
		f.write_all(b"ticket,name\nT-1,Alpha\n\xff\xfe broken\n").unwrap();
		drop(f);

		let source = DelimitedSource::from_path(&path).unwrap();
		let summary = smol::block_on(
			StreamBatchIngestor::new().run(source, IngestOptions::default().with_batch_size(10)),
		);
		// The run aborts with exactly one terminal issue; the buffered row
		// is discarded rather than partially emitted
		let errors: Vec<_> = summary.issues.iter().filter(|i| i.is_error()).collect();
		assert_eq!(errors.len(), 1);
		assert_eq!(errors[0].kind, IssueKind::InvalidFormat);
		assert!(errors[0].message.contains("Encoding failure"));
	}

	#[smol_potat::test]
	async fn test_scenario_10k_rows_in_10_batches() {
		let ingestor = StreamBatchIngestor::new();
		let mut stream = ingestor.stream(
			rows_source(10_000),
			IngestOptions::default().with_batch_size(1000),
		);

		let mut summary = RunSummary::default();
		let mut emissions = 0;
		while let Some(batch) = stream.next_batch().await {
			assert!(batch.total_rows <= 1000);
			// Memory bound: the buffer never persists across emissions
			assert_eq!(stream.buffered(), 0);
			summary.absorb(batch);
			emissions += 1;
		}

		assert_eq!(emissions, 10);
		assert_eq!(summary.total_rows, 10_000);
		assert_eq!(summary.valid_rows, 10_000);
		assert!(stream.preview().len() <= 10);
		assert_eq!(stream.preview()[0].ticket, "T-0");
	}

	#[smol_potat::test]
	async fn test_duplicates_detected_across_batches() {
		let rows = vec![
			vec!["T-1".to_string(), "a".to_string()],
			vec!["T-2".to_string(), "b".to_string()],
			vec!["T-1".to_string(), "c".to_string()],
			vec!["T-3".to_string(), "d".to_string()],
		];
		let source = VecSource::new(&["ticket", "name"], rows);
		let ingestor = StreamBatchIngestor::new();
		let mut stream = ingestor.stream(source, IngestOptions::default().with_batch_size(2));

		let first = stream.next_batch().await.unwrap();
		assert!(first.duplicate_tickets.is_empty());
		assert_eq!(first.valid_rows, 2);

		// Each batch is internally unique, yet the cross-batch duplicate
		// is still flagged.
		let second = stream.next_batch().await.unwrap();
		assert_eq!(second.duplicate_tickets, vec!["T-1".to_string()]);
		assert_eq!(second.valid_rows, 1);
		assert!(second
			.issues
			.iter()
			.any(|i| i.kind == IssueKind::DuplicateIdentifier && i.row == 3));
	}

	#[smol_potat::test]
	async fn test_cancellation_discards_in_flight_batch() {
		let cancel = CancelToken::new();
		let ingestor = StreamBatchIngestor::new();
		let mut stream = ingestor.stream(
			rows_source(100),
			IngestOptions::default()
				.with_batch_size(30)
				.with_cancel(cancel.clone()),
		);

		let first = stream.next_batch().await.unwrap();
		assert_eq!(first.total_rows, 30);

		cancel.cancel();
		let marker = stream.next_batch().await.unwrap();
		assert!(marker.cancelled);
		assert!(marker.entities.is_empty());
		assert_eq!(marker.total_rows, 30); // rows seen before cancellation

		// Idempotence: the stream stays terminal, cancelling again changes nothing
		assert!(stream.next_batch().await.is_none());
		cancel.cancel();
		assert!(stream.next_batch().await.is_none());
	}

	#[smol_potat::test]
	async fn test_cancel_after_completion_is_a_no_op() {
		let cancel = CancelToken::new();
		let ingestor = StreamBatchIngestor::new();
		let summary = ingestor
			.run(
				rows_source(5),
				IngestOptions::default().with_cancel(cancel.clone()),
			)
			.await;
		assert!(!summary.cancelled);
		assert_eq!(summary.total_rows, 5);
		cancel.cancel(); // terminal result already produced, nothing to change
	}

	#[smol_potat::test]
	async fn test_fail_soft_header_keeps_collecting_row_errors() {
		let rows = vec![
			vec!["Alpha".to_string()],
			vec!["Beta".to_string()],
		];
		let source = VecSource::new(&["name"], rows);
		let summary = StreamBatchIngestor::new()
			.run(source, IngestOptions::default())
			.await;

		// Header error surfaced, but both rows were still examined
		assert!(summary
			.issues
			.iter()
			.any(|i| i.kind == IssueKind::MissingColumn));
		assert_eq!(summary.total_rows, 2);
		assert_eq!(summary.valid_rows, 0);
		assert!(summary
			.issues
			.iter()
			.any(|i| i.kind == IssueKind::InvalidFormat && i.row == 2));
	}

	#[smol_potat::test]
	async fn test_custom_identifier_column_drives_conversion() {
		let rules = ValidationRules {
			columns: vec![
				ColumnRule::new("sku", true, FieldValidator::Ticket),
				ColumnRule::new("name", false, FieldValidator::Text { max_len: 200 }),
			],
		};
		let rows = vec![
			vec!["SKU-1".to_string(), "a".to_string()],
			vec!["SKU-2".to_string(), "b".to_string()],
			vec!["SKU-1".to_string(), "c".to_string()],
		];
		let source = VecSource::new(&["sku", "name"], rows);
		let summary = StreamBatchIngestor::new()
			.with_rules(rules)
			.run(source, IngestOptions::default())
			.await;

		// Entities key on the contract's identifier column, not on a
		// literal "ticket" header
		assert_eq!(summary.valid_rows, 2);
		assert_eq!(summary.entities[0].ticket, "SKU-1");
		assert_eq!(summary.duplicate_tickets, vec!["SKU-1".to_string()]);
		assert!(summary
			.issues
			.iter()
			.any(|i| i.kind == IssueKind::DuplicateIdentifier && i.column == "sku"));
	}

	#[smol_potat::test]
	async fn test_validate_only_skips_materialization() {
		let summary = StreamBatchIngestor::new()
			.run(rows_source(20), IngestOptions::default().validate_only())
			.await;
		assert_eq!(summary.valid_rows, 20);
		assert!(summary.entities.is_empty());
		assert!(summary.preview.is_empty());
	}

	#[smol_potat::test]
	async fn test_over_ceiling_issues_eviction_hint() {
		const MB: u64 = 1024 * 1024;
		// Probe reports 40MB used against a 10MB ceiling
		let governor = Arc::new(MemoryGovernor::new(
			GovernorConfig::with_limit_bytes(1000 * MB),
			Box::new(ScriptedProbe::new(vec![(40 * MB, 200 * MB)])),
		));
		governor.cache_image("stale", vec![0u8; 512].into());

		let ingestor = StreamBatchIngestor::new().with_governor(governor.clone());
		let summary = ingestor
			.run(
				rows_source(10),
				IngestOptions::default().with_memory_ceiling_mb(10),
			)
			.await;

		assert_eq!(summary.valid_rows, 10);
		// The hint evicted the image cache but never failed the run
		assert_eq!(governor.image_cache_stats(), (0, 0));
		assert!(governor.eviction_count() >= 1);
	}

	#[smol_potat::test]
	async fn test_preview_is_bounded() {
		let summary = StreamBatchIngestor::new()
			.run(
				rows_source(500),
				IngestOptions::default().with_preview_limit(10),
			)
			.await;
		assert_eq!(summary.preview.len(), 10);
		assert_eq!(summary.entities.len(), 500);
	}

	#[smol_potat::test]
	async fn test_quoted_csv_end_to_end() {
		let source = csv_source(
			"ticket,name,details,image_url\nT-1,\"Widget, large\",\"He said \"\"hi\"\"\",https://example.com/i.png\n",
		);
		let summary = StreamBatchIngestor::new()
			.run(source, IngestOptions::default())
			.await;
		assert_eq!(summary.valid_rows, 1);
		let entity = &summary.entities[0];
		assert_eq!(entity.name.as_deref(), Some("Widget, large"));
		assert_eq!(entity.details.as_deref(), Some("He said \"hi\""));
	}
}
