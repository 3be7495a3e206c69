//! The blocking reader surface.
//!
//! [`CsvReaderBuilder`] assembles options, sinks, observers, and
//! cancellation tokens; [`CsvReader`] drives the character pump and the
//! row pipeline; [`Records`] and [`Typed`] are the two lazy output
//! surfaces. The reader buffers each pump cycle's output so records and
//! faults from the same boundary are delivered in stream order: buffered
//! good records first, then the fault, then nothing further if the fault
//! was fatal.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use rowflow_core::{
    materialize_row, CancelProbe, ColumnDescriptor, CsvOptions, DynRecord, Error, ErrorSink,
    Materialize, Plan, PlanCache, ProgressSnapshot, ReadMetrics, Result, Value,
};
use tokio_util::sync::CancellationToken;

use crate::async_reader::AsyncCsvReader;
use crate::pipeline::{OutRow, Pipeline, PipelineParts};
use crate::source::{AsyncCharRead, CharRead};

/// Builder for both reader surfaces. Plain-data knobs come from
/// [`CsvOptions`]; everything that cannot be serialized attaches here.
pub struct CsvReaderBuilder {
    options: CsvOptions,
    sink: Option<Box<dyn ErrorSink>>,
    raw_observer: Option<Box<dyn FnMut(&str)>>,
    column_namer: Option<Box<dyn Fn(usize, &str) -> String>>,
    value_converter: Option<Box<dyn FnMut(&str, &ColumnDescriptor) -> Value>>,
    progress: Option<Box<dyn FnMut(&ProgressSnapshot)>>,
    tokens: Vec<CancellationToken>,
}

impl CsvReaderBuilder {
    pub fn new(options: CsvOptions) -> Self {
        CsvReaderBuilder {
            options,
            sink: None,
            raw_observer: None,
            column_namer: None,
            value_converter: None,
            progress: None,
            tokens: Vec::new(),
        }
    }

    pub fn error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Install a raw-record observer, enabling full per-record raw
    /// capture. Invoked for successfully emitted data records only.
    pub fn raw_observer(mut self, observer: impl FnMut(&str) + 'static) -> Self {
        self.raw_observer = Some(Box::new(observer));
        self
    }

    /// Custom synthetic-column-name generator. Receives the column index
    /// and the header cell (empty for generated columns).
    pub fn column_namer(mut self, namer: impl Fn(usize, &str) -> String + 'static) -> Self {
        self.column_namer = Some(Box::new(namer));
        self
    }

    /// Per-cell converter used when `field_type_inference` is `Custom`.
    pub fn value_converter(
        mut self,
        converter: impl FnMut(&str, &ColumnDescriptor) -> Value + 'static,
    ) -> Self {
        self.value_converter = Some(Box::new(converter));
        self
    }

    pub fn progress(mut self, callback: impl FnMut(&ProgressSnapshot) + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Add a cancellation signal. Both the caller-supplied token and an
    /// options-embedded token can be attached; either firing cancels the
    /// stream.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.tokens.push(token);
        self
    }

    fn into_pipeline(self) -> Pipeline {
        Pipeline::new(PipelineParts {
            probe: CancelProbe::new(self.tokens),
            options: self.options,
            sink: self.sink,
            raw_observer: self.raw_observer,
            column_namer: self.column_namer,
            value_converter: self.value_converter,
            progress: self.progress,
        })
    }

    pub fn build<S: CharRead>(self, source: S) -> CsvReader<S> {
        let pipeline = self.into_pipeline();
        CsvReader::new(source, pipeline)
    }

    pub fn build_async<S: AsyncCharRead>(self, source: S) -> AsyncCsvReader<S> {
        let pipeline = self.into_pipeline();
        AsyncCsvReader::new(source, pipeline)
    }
}

/// A blocking pull reader over one character source. The record sequence
/// is lazy, finite, and non-restartable.
pub struct CsvReader<S> {
    source: S,
    chunk: Vec<char>,
    pipeline: Pipeline,
    out: VecDeque<OutRow>,
    reading_done: bool,
    finished: bool,
}

impl<S: CharRead> CsvReader<S> {
    pub(crate) fn new(source: S, pipeline: Pipeline) -> Self {
        let chunk = vec!['\0'; pipeline.buffer_chars()];
        CsvReader {
            source,
            chunk,
            pipeline,
            out: VecDeque::new(),
            reading_done: false,
            finished: false,
        }
    }

    pub fn metrics(&self) -> &ReadMetrics {
        self.pipeline.metrics()
    }

    /// Iterate untyped records: column names zipped with converted values.
    pub fn records(self) -> Records<S> {
        Records {
            reader: self,
            names: None,
        }
    }

    /// Iterate records materialized into `T`.
    pub fn typed<T: Materialize>(self) -> Typed<S, T> {
        Typed {
            reader: self,
            cache: PlanCache::new(),
            plan: None,
            plan_failed: false,
            _marker: PhantomData,
        }
    }

    fn percent(&self) -> Option<f64> {
        self.source.position().map(|p| p.percent())
    }

    fn next_row(&mut self) -> Option<Result<OutRow>> {
        loop {
            if let Some(row) = self.out.pop_front() {
                return Some(Ok(row));
            }
            if self.finished {
                return None;
            }
            if self.reading_done || self.pipeline.is_stopping() {
                self.finished = true;
                self.pipeline.metrics_mut().complete();
                if let Some(error) = self.pipeline.take_fatal() {
                    return Some(Err(error));
                }
                return None;
            }
            if let Err(error) = self.pump_cycle() {
                self.reading_done = true;
                match error {
                    Error::Canceled => self.pipeline.note_canceled(),
                    other => self.pipeline.note_fatal(other),
                }
            }
        }
    }

    /// One pump iteration: poll cancellation, pull a chunk, fold it
    /// through the pipeline. End of stream flushes parser and inference
    /// state.
    fn pump_cycle(&mut self) -> Result<()> {
        self.pipeline.probe().check()?;
        let n = self.source.read_chars(&mut self.chunk)?;
        if n == 0 {
            // Cancellation outranks end-of-stream format faults.
            self.pipeline.probe().check()?;
            self.pipeline.finish(&mut self.out);
            self.reading_done = true;
            return Ok(());
        }
        self.pipeline.feed(&self.chunk[..n], &mut self.out)
    }
}

/// Iterator of [`DynRecord`]s.
pub struct Records<S> {
    reader: CsvReader<S>,
    names: Option<Vec<String>>,
}

impl<S: CharRead> Records<S> {
    pub fn metrics(&self) -> &ReadMetrics {
        self.reader.metrics()
    }
}

impl<S: CharRead> Iterator for Records<S> {
    type Item = Result<DynRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.reader.next_row()? {
            Ok(row) => row,
            Err(error) => return Some(Err(error)),
        };
        if self.names.is_none() {
            self.names = Some(self.reader.pipeline.column_names());
        }
        let names = self.names.as_deref().unwrap_or_default();
        let record = DynRecord::new(names.iter().cloned().zip(row.values).collect());
        let percent = self.reader.percent();
        if self.reader.pipeline.on_yield(percent).is_err() {
            // The record was already produced; cancellation surfaces on
            // the next pull.
            self.reader.pipeline.note_canceled();
            self.reader.reading_done = true;
        }
        Some(Ok(record))
    }
}

/// Iterator of typed records. The materialization plan is resolved on the
/// first row and reused for the rest of the stream.
pub struct Typed<S, T: Materialize> {
    reader: CsvReader<S>,
    cache: PlanCache,
    plan: Option<Arc<Plan>>,
    plan_failed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<S: CharRead, T: Materialize> Typed<S, T> {
    pub fn metrics(&self) -> &ReadMetrics {
        self.reader.metrics()
    }
}

impl<S: CharRead, T: Materialize> Iterator for Typed<S, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut row = match self.reader.next_row()? {
                Ok(row) => row,
                Err(error) => return Some(Err(error)),
            };
            if self.plan_failed {
                // The stream keeps draining so buffered good records ahead
                // of the failure were already delivered; nothing further
                // materializes.
                continue;
            }
            let plan = match &self.plan {
                Some(plan) => Arc::clone(plan),
                None => {
                    let resolved = match self.reader.pipeline.schema() {
                        Some(schema) => self.cache.plan_for::<T>(schema),
                        None => continue,
                    };
                    match resolved {
                        Ok(plan) => {
                            self.plan = Some(Arc::clone(&plan));
                            plan
                        }
                        Err(error) => {
                            self.plan_failed = true;
                            self.reader.pipeline.report(
                                error.kind(),
                                error.to_string(),
                                row.line,
                                row.record,
                                &row.prefix,
                            );
                            continue;
                        }
                    }
                }
            };
            match materialize_row::<T>(&plan, &mut row.values) {
                Ok(instance) => {
                    let percent = self.reader.percent();
                    if self.reader.pipeline.on_yield(percent).is_err() {
                        self.reader.pipeline.note_canceled();
                        self.reader.reading_done = true;
                    }
                    return Some(Ok(instance));
                }
                Err(error) => {
                    self.reader.pipeline.report(
                        error.kind(),
                        error.to_string(),
                        row.line,
                        row.record,
                        &row.prefix,
                    );
                    continue;
                }
            }
        }
    }
}
