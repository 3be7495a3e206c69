//! The suspendable reader surface.
//!
//! Same pipeline as the blocking reader, driven by an [`AsyncCharRead`]
//! source: control yields back to the runtime at every upstream read, and
//! nothing else crosses tasks. Consumption is a pull loop:
//!
//! ```text
//! let mut records = reader.records();
//! while let Some(record) = records.next().await { ... }
//! ```

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use rowflow_core::{
    materialize_row, DynRecord, Error, Materialize, Plan, PlanCache, ReadMetrics, Result,
};

use crate::pipeline::{OutRow, Pipeline};
use crate::source::AsyncCharRead;

/// The suspendable pull reader over one async character source.
pub struct AsyncCsvReader<S> {
    source: S,
    chunk: Vec<char>,
    pipeline: Pipeline,
    out: VecDeque<OutRow>,
    reading_done: bool,
    finished: bool,
}

impl<S: AsyncCharRead> AsyncCsvReader<S> {
    pub(crate) fn new(source: S, pipeline: Pipeline) -> Self {
        let chunk = vec!['\0'; pipeline.buffer_chars()];
        AsyncCsvReader {
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

    pub fn records(self) -> AsyncRecords<S> {
        AsyncRecords {
            reader: self,
            names: None,
        }
    }

    pub fn typed<T: Materialize>(self) -> AsyncTyped<S, T> {
        AsyncTyped {
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

    async fn next_row(&mut self) -> Option<Result<OutRow>> {
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
            if let Err(error) = self.pump_cycle().await {
                self.reading_done = true;
                match error {
                    Error::Canceled => self.pipeline.note_canceled(),
                    other => self.pipeline.note_fatal(other),
                }
            }
        }
    }

    async fn pump_cycle(&mut self) -> Result<()> {
        self.pipeline.probe().check()?;
        let n = self.source.read_chars(&mut self.chunk).await?;
        if n == 0 {
            self.pipeline.probe().check()?;
            self.pipeline.finish(&mut self.out);
            self.reading_done = true;
            return Ok(());
        }
        self.pipeline.feed(&self.chunk[..n], &mut self.out)
    }
}

/// Pull surface yielding [`DynRecord`]s.
pub struct AsyncRecords<S> {
    reader: AsyncCsvReader<S>,
    names: Option<Vec<String>>,
}

impl<S: AsyncCharRead> AsyncRecords<S> {
    pub fn metrics(&self) -> &ReadMetrics {
        self.reader.metrics()
    }

    pub async fn next(&mut self) -> Option<Result<DynRecord>> {
        let row = match self.reader.next_row().await? {
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
            self.reader.pipeline.note_canceled();
            self.reader.reading_done = true;
        }
        Some(Ok(record))
    }
}

/// Pull surface yielding typed records.
pub struct AsyncTyped<S, T: Materialize> {
    reader: AsyncCsvReader<S>,
    cache: PlanCache,
    plan: Option<Arc<Plan>>,
    plan_failed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<S: AsyncCharRead, T: Materialize> AsyncTyped<S, T> {
    pub fn metrics(&self) -> &ReadMetrics {
        self.reader.metrics()
    }

    pub async fn next(&mut self) -> Option<Result<T>> {
        loop {
            let mut row = match self.reader.next_row().await? {
                Ok(row) => row,
                Err(error) => return Some(Err(error)),
            };
            if self.plan_failed {
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
