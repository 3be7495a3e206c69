//! The row-processing engine shared by the blocking and suspendable
//! reader surfaces.
//!
//! Each assembled [`RawRow`] flows through: quote-fault handling, header
//! consumption, guard rails, schema resolution (header, caller schema, or
//! buffered inference), field conversion, and emission. Faults are routed
//! through the configured sink and [`ErrorAction`]; the engine itself
//! never unwinds except for cancellation.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use rowflow_core::{
    render_excerpt, CancelProbe, ColumnDescriptor, ColumnType, CsvOptions, Error, ErrorAction,
    ErrorRecord, ErrorSink, FaultKind, FieldTypeInference, ProgressEmitter, ProgressSnapshot,
    ReadMetrics, Result, Schema, SchemaInferenceMode, Value, RECORDS_PER_POLL,
};
use tracing::{debug, info, warn};

use crate::convert;
use crate::guard;
use crate::infer::TypeInference;
use crate::parser::{Parser, RawRow};

pub(crate) type RawObserver = Box<dyn FnMut(&str)>;
pub(crate) type ColumnNamer = Box<dyn Fn(usize, &str) -> String>;
pub(crate) type ValueConverter = Box<dyn FnMut(&str, &ColumnDescriptor) -> Value>;
pub(crate) type ProgressCallback = Box<dyn FnMut(&ProgressSnapshot)>;

/// One converted row, ready to become a `DynRecord` or a typed instance.
#[derive(Debug)]
pub(crate) struct OutRow {
    pub values: Vec<Value>,
    pub line: u64,
    pub record: u64,
    pub prefix: String,
}

#[derive(Debug)]
struct BufferedRow {
    row: RawRow,
    record: u64,
}

pub(crate) struct Pipeline {
    options: CsvOptions,
    probe: CancelProbe,
    parser: Parser,
    schema: Option<Schema>,
    header_pending: bool,
    /// Rows buffered while schema inference waits for its sample window.
    inference: Option<Vec<BufferedRow>>,
    sink: Option<Box<dyn ErrorSink>>,
    raw_observer: Option<RawObserver>,
    column_namer: Option<ColumnNamer>,
    value_converter: Option<ValueConverter>,
    progress: Option<ProgressEmitter>,
    metrics: ReadMetrics,
    /// Logical record counter (header excluded, dropped records included).
    logical: u64,
    emit_poll_budget: u64,
    fatal: Option<Error>,
    stopping: bool,
    rows_scratch: Vec<RawRow>,
}

pub(crate) struct PipelineParts {
    pub options: CsvOptions,
    pub probe: CancelProbe,
    pub sink: Option<Box<dyn ErrorSink>>,
    pub raw_observer: Option<RawObserver>,
    pub column_namer: Option<ColumnNamer>,
    pub value_converter: Option<ValueConverter>,
    pub progress: Option<ProgressCallback>,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        let PipelineParts {
            options,
            probe,
            sink,
            raw_observer,
            column_namer,
            value_converter,
            progress,
        } = parts;
        let parser = Parser::new(&options, raw_observer.is_some());
        let schema = options
            .schema
            .as_ref()
            .map(|names| Schema::from_names(names.iter().cloned()));
        // Inference buffers rows whenever it has something left to decide:
        // the column set itself, or (with a header or caller schema) just
        // the column types.
        let inference = if options.infer_schema
            && (schema.is_none()
                || options.schema_inference_mode == SchemaInferenceMode::NamesAndTypes)
        {
            Some(Vec::new())
        } else {
            None
        };
        let progress = progress.map(|callback| {
            ProgressEmitter::new(
                options.progress_record_interval,
                Duration::from_millis(options.progress_time_interval_ms),
                callback,
            )
        });
        Pipeline {
            header_pending: options.has_header,
            parser,
            schema,
            inference,
            sink,
            raw_observer,
            column_namer,
            value_converter,
            progress,
            metrics: ReadMetrics::new(),
            logical: 0,
            emit_poll_budget: RECORDS_PER_POLL,
            fatal: None,
            stopping: false,
            rows_scratch: Vec::new(),
            options,
            probe,
        }
    }

    pub fn probe(&self) -> &CancelProbe {
        &self.probe
    }

    pub fn metrics(&self) -> &ReadMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut ReadMetrics {
        &mut self.metrics
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema
            .as_ref()
            .map(|s| s.names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn take_fatal(&mut self) -> Option<Error> {
        self.fatal.take()
    }

    pub fn buffer_chars(&self) -> usize {
        self.options.buffer_chars.max(1)
    }

    /// Fold one pump chunk through the parser and row pipeline.
    pub fn feed(&mut self, chunk: &[char], out: &mut VecDeque<OutRow>) -> Result<()> {
        let mut rows = std::mem::take(&mut self.rows_scratch);
        rows.clear();
        let fed = self.parser.feed(chunk, &mut rows, &self.probe);
        for row in rows.drain(..) {
            if self.stopping {
                break;
            }
            self.process_row(row, out);
        }
        self.rows_scratch = rows;
        self.sync_line_metrics();
        fed
    }

    /// Flush end-of-stream state: the parser's pending record and any
    /// partially filled inference sample.
    pub fn finish(&mut self, out: &mut VecDeque<OutRow>) {
        let mut rows = std::mem::take(&mut self.rows_scratch);
        rows.clear();
        self.parser.finish(&mut rows);
        for row in rows.drain(..) {
            if self.stopping {
                break;
            }
            self.process_row(row, out);
        }
        self.rows_scratch = rows;
        if !self.stopping {
            self.flush_inference(out);
        }
        self.sync_line_metrics();
        self.metrics.complete();
    }

    fn sync_line_metrics(&mut self) {
        self.metrics.lines_read = self.parser.lines_read();
        self.metrics.last_line = self.parser.current_line();
    }

    fn process_row(&mut self, mut row: RawRow, out: &mut VecDeque<OutRow>) {
        if self.options.trim_whitespace {
            for field in &mut row.fields {
                let trimmed = field.trim();
                if trimmed.len() != field.len() {
                    *field = trimmed.to_string();
                }
            }
        }

        if self.header_pending {
            self.header_pending = false;
            for fault in std::mem::take(&mut row.faults) {
                self.report(FaultKind::Quote, fault.message, row.line, 0, &row.prefix);
            }
            if self.stopping {
                return;
            }
            // A caller-supplied schema wins; the header row is discarded.
            if self.schema.is_none() {
                let names: Vec<String> = row
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(index, cell)| match &self.column_namer {
                        Some(namer) => namer(index, cell),
                        None => cell.clone(),
                    })
                    .collect();
                debug!(columns = names.len(), "schema resolved from header row");
                self.schema = Some(Schema::from_names(names));
            }
            return;
        }

        self.logical += 1;
        self.metrics.raw_records_parsed += 1;
        let record = self.logical;

        let mut drop_row = false;
        for fault in std::mem::take(&mut row.faults) {
            self.report(FaultKind::Quote, fault.message, row.line, record, &row.prefix);
            drop_row = true;
        }
        if self.stopping || drop_row {
            return;
        }

        if let Some(message) = guard::check(&row, &self.options) {
            self.report(FaultKind::LimitExceeded, message, row.line, record, &row.prefix);
            // Limit violations never emit, even in skip mode.
            return;
        }

        if let Some(buffer) = self.inference.as_mut() {
            buffer.push(BufferedRow { row, record });
            let window_full = buffer.len() >= self.options.schema_inference_sample_rows.max(1);
            if window_full {
                self.flush_inference(out);
            }
            return;
        }
        if self.schema.is_none() {
            self.report(
                FaultKind::Schema,
                "no header row, caller schema, or schema inference to resolve columns".to_string(),
                row.line,
                record,
                &row.prefix,
            );
            return;
        }

        self.emit_row(row, record, out);
    }

    /// Resolve column names (when the header or caller did not) and types
    /// from the buffered sample, then release the buffered rows through
    /// the normal emission path.
    fn flush_inference(&mut self, out: &mut VecDeque<OutRow>) {
        let Some(buffer) = self.inference.take() else {
            return;
        };
        if buffer.is_empty() {
            return;
        }
        if self.schema.is_none() {
            let width = buffer.iter().map(|b| b.row.fields.len()).max().unwrap_or(0);
            let schema = match &self.column_namer {
                Some(namer) => Schema::from_names((0..width).map(|index| namer(index, ""))),
                None => Schema::synthetic(width),
            };
            self.schema = Some(schema);
        }
        if self.options.schema_inference_mode == SchemaInferenceMode::NamesAndTypes {
            let width = self.schema.as_ref().map(Schema::width).unwrap_or(0);
            let mut engine = TypeInference::new(width, &self.options);
            for buffered in &buffer {
                engine.observe(&buffered.row.fields);
            }
            let types = engine.finish();
            if let Some(schema) = &mut self.schema {
                schema.set_types(types);
            }
        }
        info!(
            columns = self.schema.as_ref().map(Schema::width).unwrap_or(0),
            sample = buffer.len(),
            "schema inference complete"
        );
        for buffered in buffer {
            if self.stopping {
                break;
            }
            self.emit_row(buffered.row, buffered.record, out);
        }
    }

    fn emit_row(&mut self, row: RawRow, record: u64, out: &mut VecDeque<OutRow>) {
        let width = match &self.schema {
            Some(schema) => schema.width(),
            None => return,
        };

        let mut fields = row.fields;
        if fields.len() > width {
            if !self.options.allow_extra_fields {
                self.report(
                    FaultKind::Schema,
                    format!(
                        "row has {} fields but the schema has {width} columns",
                        fields.len()
                    ),
                    row.line,
                    record,
                    &row.prefix,
                );
                return;
            }
            fields.truncate(width);
        } else if fields.len() < width {
            if !self.options.allow_missing_trailing_fields {
                self.report(
                    FaultKind::Schema,
                    format!(
                        "row has {} fields but the schema has {width} columns",
                        fields.len()
                    ),
                    row.line,
                    record,
                    &row.prefix,
                );
                return;
            }
            fields.resize(width, String::new());
        }

        let descriptors: Vec<ColumnDescriptor> = match &self.schema {
            Some(schema) => schema.columns().to_vec(),
            None => return,
        };
        let mut values = Vec::with_capacity(width);
        let mut demotions: Vec<(usize, String)> = Vec::new();
        for (index, cell) in fields.iter().enumerate() {
            let descriptor = &descriptors[index];
            let trimmed = cell.trim();
            let value = if trimmed.is_empty() {
                Value::Null
            } else if descriptor.finalized || descriptor.ty == Some(ColumnType::Str) {
                Value::Str(cell.clone())
            } else if let Some(ty) = descriptor.ty {
                match convert::convert_cell(trimmed, ty, &self.options.format) {
                    Ok(value) => value,
                    Err(e) => {
                        demotions.push((index, format!("{e} in column {}", descriptor.name)));
                        Value::Str(cell.clone())
                    }
                }
            } else {
                match self.options.field_type_inference {
                    FieldTypeInference::None => Value::Str(cell.clone()),
                    FieldTypeInference::Primitive => convert::infer_primitive(
                        cell,
                        &self.options.format,
                        self.options.preserve_numeric_strings_with_leading_zeros,
                        self.options.preserve_large_integer_strings,
                    ),
                    FieldTypeInference::Custom => match &mut self.value_converter {
                        Some(converter) => converter(cell, descriptor),
                        None => Value::Str(cell.clone()),
                    },
                }
            };
            values.push(value);
        }

        for (index, message) in demotions {
            if let Some(schema) = &mut self.schema {
                schema.demote(index);
            }
            warn!(column = index, "column pinned to string after conversion failure");
            self.report(FaultKind::Conversion, message, row.line, record, &row.prefix);
        }
        if self.stopping {
            return;
        }

        if let Some(observer) = &mut self.raw_observer {
            if let Some(raw) = &row.raw {
                observer(raw);
            }
        }
        out.push_back(OutRow {
            values,
            line: row.line,
            record,
            prefix: row.prefix,
        });
    }

    /// Bookkeeping for one record actually yielded to the consumer:
    /// counters, throttled progress, and the emission-path cancel poll.
    pub fn on_yield(&mut self, percent: Option<f64>) -> Result<()> {
        self.metrics.records_emitted += 1;
        if let Some(progress) = &mut self.progress {
            progress.observe(&self.metrics, percent);
        }
        self.emit_poll_budget -= 1;
        if self.emit_poll_budget == 0 {
            self.emit_poll_budget = RECORDS_PER_POLL;
            self.probe.check()?;
        }
        Ok(())
    }

    /// Record a fault, apply the configured error action, and remember the
    /// first fatal error for `Throw` mode.
    pub fn report(
        &mut self,
        kind: FaultKind,
        message: String,
        line: u64,
        record: u64,
        prefix: &str,
    ) {
        let action = self.options.error_action;
        let excerpt = render_excerpt(prefix);
        warn!(%kind, line, record, %message, "csv fault");
        self.metrics.errors_reported += 1;
        let entry = ErrorRecord {
            reader: self.options.reader_name.clone(),
            path: self.options.path.clone(),
            line,
            record,
            kind,
            message: message.clone(),
            excerpt: excerpt.clone(),
            action,
            timestamp: Utc::now(),
        };
        if let Some(sink) = &mut self.sink {
            sink.report(&entry);
        }
        match action {
            ErrorAction::Skip => {}
            ErrorAction::Stop => {
                self.stopping = true;
                self.metrics.terminated_early = true;
            }
            ErrorAction::Throw => {
                self.stopping = true;
                self.metrics.terminated_early = true;
                if self.fatal.is_none() {
                    self.fatal = Some(Error::Fault {
                        kind,
                        line,
                        record,
                        message,
                        excerpt,
                    });
                }
            }
        }
    }

    /// Cancellation observed: it outranks any other pending fault.
    pub fn note_canceled(&mut self) {
        self.stopping = true;
        self.metrics.terminated_early = true;
        self.metrics.errors_reported += 1;
        let entry = ErrorRecord {
            reader: self.options.reader_name.clone(),
            path: self.options.path.clone(),
            line: self.metrics.last_line,
            record: self.logical,
            kind: FaultKind::Canceled,
            message: "read canceled".to_string(),
            excerpt: String::new(),
            action: self.options.error_action,
            timestamp: Utc::now(),
        };
        if let Some(sink) = &mut self.sink {
            sink.report(&entry);
        }
        self.fatal = Some(Error::Canceled);
        self.metrics.complete();
    }

    /// An upstream I/O or invariant failure: fatal, stream over.
    pub fn note_fatal(&mut self, error: Error) {
        self.stopping = true;
        self.metrics.terminated_early = true;
        self.metrics.errors_reported += 1;
        let entry = ErrorRecord {
            reader: self.options.reader_name.clone(),
            path: self.options.path.clone(),
            line: self.metrics.last_line,
            record: self.logical,
            kind: FaultKind::Fatal,
            message: error.to_string(),
            excerpt: String::new(),
            action: self.options.error_action,
            timestamp: Utc::now(),
        };
        if let Some(sink) = &mut self.sink {
            sink.report(&entry);
        }
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        self.metrics.complete();
    }
}
