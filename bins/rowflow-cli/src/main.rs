//! # Rowflow CLI - CSV Streaming Runner
//!
//! Streams one or more CSV files through the rowflow ingestion core and
//! prints each record as a JSON line. Options can be loaded from a YAML
//! file and overridden with flags; Ctrl-C cancels the stream gracefully
//! through the reader's cancellation token.
//!
//! ```bash
//! # Stream a file with a header row
//! rowflow-cli --input data.csv --has-header
//!
//! # Stream a directory of files with inferred schemas and progress logs
//! RUST_LOG=info rowflow-cli --input 'data/*.csv' --infer --progress
//!
//! # Load the full option set from YAML
//! rowflow-cli --input data.csv --options read.yml
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rowflow_core::CsvOptions;
use rowflow_csv::{AsyncIoSource, CsvReaderBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the rowflow streaming runner
#[derive(Parser, Debug)]
#[command(name = "rowflow-cli")]
#[command(about = "Stream CSV files to JSON lines")]
struct Args {
    /// File path or glob pattern for the CSV files to stream
    #[arg(short, long)]
    input: String,

    /// Optional YAML file with the full read-option set
    #[arg(short, long)]
    options: Option<PathBuf>,

    /// Treat the first record of each file as a header row
    #[arg(long)]
    has_header: bool,

    /// Field separator (first character used)
    #[arg(long)]
    separator: Option<String>,

    /// Buffer a sample of rows and infer column names and types
    #[arg(long)]
    infer: bool,

    /// Log progress snapshots while streaming
    #[arg(long)]
    progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut options: CsvOptions = match &args.options {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("read options {}", path.display()))?;
            serde_yaml::from_str(&yaml).context("parse options")?
        }
        None => CsvOptions::default(),
    };
    if args.has_header {
        options.has_header = true;
    }
    if let Some(separator) = &args.separator {
        options.separator = separator.clone();
    }
    if args.infer {
        options.infer_schema = true;
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in glob::glob(&args.input).context("glob")? {
        paths.push(entry?);
    }
    if paths.is_empty() {
        anyhow::bail!("no files matched: {}", args.input);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, canceling stream");
                cancel.cancel();
            }
        });
    }

    let mut failed = false;
    for path in paths {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = stream_file(&path, options.clone(), cancel.clone(), args.progress).await {
            error!(path = %path.display(), error = ?e, "stream failed");
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn stream_file(
    path: &PathBuf,
    mut options: CsvOptions,
    cancel: CancellationToken,
    progress: bool,
) -> Result<()> {
    options.path = Some(path.clone());
    options.reader_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let total = file.metadata().await.map(|m| m.len()).ok();

    let mut source = AsyncIoSource::new(file);
    if let Some(total) = total {
        source = source.with_total_bytes(total);
    }

    let mut builder = CsvReaderBuilder::new(options).cancellation_token(cancel);
    if progress {
        builder = builder.progress(|snapshot| {
            info!(
                records = snapshot.records,
                lines = snapshot.lines,
                errors = snapshot.errors,
                percent = snapshot.percent.map(|p| p.round()),
                "progress"
            );
        });
    }

    info!(path = %path.display(), "streaming");
    let mut records = builder.build_async(source).records();
    let mut result = Ok(());
    while let Some(record) = records.next().await {
        match record {
            Ok(record) => {
                println!("{}", serde_json::to_string(&record)?);
            }
            Err(e) => {
                result = Err(e).context("stream ended early");
                break;
            }
        }
    }

    let metrics = records.metrics();
    info!(
        lines = metrics.lines_read,
        records = metrics.records_emitted,
        errors = metrics.errors_reported,
        terminated_early = metrics.terminated_early,
        "done"
    );
    result
}
