//! Stream counters and throttled progress snapshots.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters maintained across one stream.
#[derive(Debug, Clone, Serialize)]
pub struct ReadMetrics {
    /// Physical newline occurrences (CRLF counted once).
    pub lines_read: u64,
    /// Data records assembled by the parser, header excluded, including
    /// records later dropped by guard rails or error policy.
    pub raw_records_parsed: u64,
    pub records_emitted: u64,
    pub errors_reported: u64,
    /// Physical line number most recently observed.
    pub last_line: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when `ErrorAction::Stop` or `Throw` ended the stream before the
    /// input was exhausted, or when cancellation fired.
    pub terminated_early: bool,
}

impl ReadMetrics {
    pub fn new() -> Self {
        ReadMetrics {
            lines_read: 0,
            raw_records_parsed: 0,
            records_emitted: 0,
            errors_reported: 0,
            last_line: 0,
            started_at: Utc::now(),
            completed_at: None,
            terminated_early: false,
        }
    }

    pub fn complete(&mut self) {
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

impl Default for ReadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// One progress emission.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub lines: u64,
    pub records: u64,
    pub errors: u64,
    /// Percent of the input consumed, when the source exposes a position.
    pub percent: Option<f64>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Emits snapshots when either the emitted-record delta reaches the record
/// interval or the wall-clock delta reaches the time interval. Emission has
/// no effect on parsing.
pub struct ProgressEmitter {
    record_interval: u64,
    time_interval: Duration,
    started: Instant,
    last_emit: Instant,
    last_records: u64,
    callback: Box<dyn FnMut(&ProgressSnapshot)>,
}

impl ProgressEmitter {
    pub fn new(
        record_interval: u64,
        time_interval: Duration,
        callback: Box<dyn FnMut(&ProgressSnapshot)>,
    ) -> Self {
        let now = Instant::now();
        ProgressEmitter {
            record_interval: record_interval.max(1),
            time_interval,
            started: now,
            last_emit: now,
            last_records: 0,
            callback,
        }
    }

    pub fn observe(&mut self, metrics: &ReadMetrics, percent: Option<f64>) {
        let records_due = metrics.records_emitted - self.last_records >= self.record_interval;
        let time_due =
            !self.time_interval.is_zero() && self.last_emit.elapsed() >= self.time_interval;
        if !records_due && !time_due {
            return;
        }
        let snapshot = ProgressSnapshot {
            lines: metrics.lines_read,
            records: metrics.records_emitted,
            errors: metrics.errors_reported,
            percent,
            elapsed: self.started.elapsed(),
        };
        (self.callback)(&snapshot);
        self.last_records = metrics.records_emitted;
        self.last_emit = Instant::now();
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("record_interval", &self.record_interval)
            .field("time_interval", &self.time_interval)
            .field("last_records", &self.last_records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn record_interval_throttles_emission() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut emitter = ProgressEmitter::new(
            10,
            Duration::from_secs(3600),
            Box::new(move |s: &ProgressSnapshot| sink.borrow_mut().push(s.records)),
        );

        let mut metrics = ReadMetrics::new();
        for emitted in 1..=25u64 {
            metrics.records_emitted = emitted;
            emitter.observe(&metrics, None);
        }
        assert_eq!(*seen.borrow(), vec![10, 20]);
    }
}
