use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbosity: u8) {
    // Map -q/-v to tracing levels; default WARN
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr) // logs to stderr
        .with_target(false)
        .with_level(true)
        .compact()
        .finish();

    // Ignore error if already set in tests or env
    let _ = set_global_default(subscriber);
}

use bulkview::ingest::DelimitedSource;
use bulkview::{IngestOptions, IssueSeverity, RunSummary, StreamBatchIngestor};

fn main() {
    let opts = Opts::parse();
    init_tracing(opts.verbose.saturating_sub(opts.quiet));
    smol::block_on(async move {
        match run(opts).await {
            Ok(exit) => std::process::exit(exit),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
    });
}

async fn run(opts: Opts) -> anyhow::Result<i32> {
    match opts.command {
        Command::Ingest {
            file,
            batch_size,
            stream,
        } => {
            let source = DelimitedSource::from_path(&file)?;
            let options = IngestOptions::default().with_batch_size(batch_size);
            let ingestor = StreamBatchIngestor::new();
            let summary = if stream {
                // Batch-by-batch progress on stdout instead of one aggregate
                let mut stream = ingestor.stream(source, options);
                let mut summary = RunSummary::default();
                while let Some(batch) = stream.next_batch().await {
                    println!(
                        "batch {}: {} rows, {} valid, {} issues",
                        summary.batches + 1,
                        batch.total_rows,
                        batch.valid_rows,
                        batch.issues.len()
                    );
                    summary.absorb(batch);
                }
                summary.preview = stream.preview().to_vec();
                summary
            } else {
                ingestor.run(source, options).await
            };
            print_summary(&summary);
            Ok(if summary.has_errors() { 1 } else { 0 })
        }
        Command::Validate { file } => {
            let source = DelimitedSource::from_path(&file)?;
            let options = IngestOptions::default().validate_only();
            let summary = StreamBatchIngestor::new().run(source, options).await;
            print_summary(&summary);
            Ok(if summary.has_errors() { 1 } else { 0 })
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Total rows: {}", summary.total_rows);
    println!("Valid rows: {}", summary.valid_rows);
    println!("Batches: {}", summary.batches);
    if !summary.duplicate_tickets.is_empty() {
        println!("Duplicate tickets: {}", summary.duplicate_tickets.len());
    }
    if !summary.issues.is_empty() {
        println!("Issues:");
        for (kind, count) in summary.issue_counts() {
            println!("  {kind}: {count}");
        }
        for issue in summary.issues.iter().take(20) {
            let tag = match issue.severity {
                IssueSeverity::Error => "error",
                IssueSeverity::Warning => "warning",
            };
            println!(
                "  [{tag}] row {} column {}: {}",
                issue.row, issue.column, issue.message
            );
        }
        if summary.issues.len() > 20 {
            println!("  ... and {} more", summary.issues.len() - 20);
        }
    }
    if !summary.preview.is_empty() {
        let tickets: Vec<&str> = summary
            .preview
            .iter()
            .map(|e| e.ticket.as_str())
            .collect();
        println!("Preview: {}", tickets.join(", "));
    }
}

#[derive(Parser)]
#[command(version, about = "bulkview CLI")]
pub struct Opts {
    /// Increase verbosity (-v, -vv). Default WARN.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Decrease verbosity (-q). Each -q reduces level by one step.
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Ingest a delimited file into validated entities
    Ingest {
        file: PathBuf,
        /// Rows per batch
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
        /// Print per-batch progress instead of a single aggregate pass
        #[arg(long)]
        stream: bool,
    },
    /// Check a delimited file without materializing entities
    Validate { file: PathBuf },
}
