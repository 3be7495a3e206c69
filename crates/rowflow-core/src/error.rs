//! Error taxonomy, structured error records, and sinks.
//!
//! The parser core never unwinds: faults are written to the configured
//! [`ErrorSink`] as structured [`ErrorRecord`]s, and the configured
//! [`ErrorAction`] decides whether the stream skips, stops, or surfaces a
//! single fatal [`Error`] at the next yield.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The raw excerpt carried by every fault is capped at this many characters
/// of the offending record.
pub const EXCERPT_CHARS: usize = 128;

/// Fault categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Illegal quote in an unquoted field, trailing garbage after a closing
    /// quote, or an unterminated quoted field at end of stream.
    Quote,
    /// A record exceeded `max_columns_per_row` or `max_raw_record_length`.
    LimitExceeded,
    /// Missing naming strategy, or a row narrower/wider than the schema.
    Schema,
    /// A cell could not be parsed into its declared column type.
    Conversion,
    /// No viable constructor or feeding plan for the target type.
    Materialization,
    /// A cancellation signal was observed.
    Canceled,
    /// Upstream I/O or internal invariant failure.
    Fatal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultKind::Quote => "quote error",
            FaultKind::LimitExceeded => "limit exceeded",
            FaultKind::Schema => "schema error",
            FaultKind::Conversion => "conversion error",
            FaultKind::Materialization => "materialization error",
            FaultKind::Canceled => "canceled",
            FaultKind::Fatal => "fatal error",
        };
        f.write_str(name)
    }
}

/// What the reader does when a fault is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Flush already-buffered good records, then raise a fatal [`Error`].
    #[default]
    Throw,
    /// Record the fault, drop the offending record, continue.
    Skip,
    /// Record the fault, flush buffered good records, end the stream.
    Stop,
}

/// A structured fault, as delivered to the [`ErrorSink`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Reader identifier from the options.
    pub reader: String,
    pub path: Option<PathBuf>,
    /// Physical line on which the offending record started.
    pub line: u64,
    /// Logical record number (1-based, header excluded); 0 when no record
    /// context applies.
    pub record: u64,
    pub kind: FaultKind,
    pub message: String,
    /// First characters of the raw record, control-characters rendered
    /// printable. At most [`EXCERPT_CHARS`] input characters.
    pub excerpt: String,
    pub action: ErrorAction,
    pub timestamp: DateTime<Utc>,
}

/// Consumes structured error records. Sinks are infallible by signature and
/// may be called many times per stream.
pub trait ErrorSink {
    fn report(&mut self, record: &ErrorRecord);
}

impl<F: FnMut(&ErrorRecord)> ErrorSink for F {
    fn report(&mut self, record: &ErrorRecord) {
        self(record)
    }
}

/// An [`ErrorSink`] that collects records behind a shared handle, so tests
/// and callers can inspect them after the reader is consumed.
#[derive(Debug, Clone, Default)]
pub struct CollectSink {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

impl ErrorSink for CollectSink {
    fn report(&mut self, record: &ErrorRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record.clone());
        }
    }
}

/// Render a raw-record prefix control-character-safe for excerpts:
/// CR→`\r`, LF→`\n`, TAB→`\t`, other control characters → `0xHH`.
pub fn render_excerpt(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.chars().take(EXCERPT_CHARS) {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("0x{:02X}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// The error surfaced by reader iteration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A fault escalated by `ErrorAction::Throw`.
    #[error("{kind} at line {line}, record {record}: {message} [{excerpt}]")]
    Fault {
        kind: FaultKind,
        line: u64,
        record: u64,
        message: String,
        excerpt: String,
    },

    /// A cancellation signal fired.
    #[error("read canceled")]
    Canceled,

    /// Upstream reader failure.
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else, with context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn kind(&self) -> FaultKind {
        match self {
            Error::Fault { kind, .. } => *kind,
            Error::Canceled => FaultKind::Canceled,
            Error::Io(_) | Error::Other(_) => FaultKind::Fatal,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn excerpt_renders_control_characters() {
        assert_eq!(render_excerpt("a\r\nb\tc\u{1}"), "a\\r\\nb\\tc0x01");
    }

    #[test]
    fn excerpt_is_capped() {
        let long = "x".repeat(500);
        assert_eq!(render_excerpt(&long).chars().count(), EXCERPT_CHARS);
    }

    #[test]
    fn collect_sink_is_inspectable_after_reporting() {
        let sink = CollectSink::new();
        let mut handle = sink.clone();
        handle.report(&ErrorRecord {
            reader: "csv".into(),
            path: None,
            line: 3,
            record: 2,
            kind: FaultKind::Quote,
            message: "test".into(),
            excerpt: String::new(),
            action: ErrorAction::Skip,
            timestamp: Utc::now(),
        });
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].line, 3);
    }
}
