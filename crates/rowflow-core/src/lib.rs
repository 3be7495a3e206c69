//! # Rowflow Core
//!
//! Foundational types for the rowflow streaming ingestion pipeline: the
//! cell value model and column type ladder, resolved schemas, the error
//! taxonomy with structured error records and sinks, plain-data read
//! options, cooperative cancellation, stream metrics with throttled
//! progress snapshots, and the object materializer that turns rows of
//! converted values into caller types through an immutable, once-per-stream
//! construction plan.
//!
//! The CSV parser itself lives in `rowflow-csv`; this crate is
//! format-agnostic.

pub mod cancel;
pub mod error;
pub mod materialize;
pub mod options;
pub mod progress;
pub mod schema;
pub mod value;

pub use cancel::{CancelProbe, CHARS_PER_POLL, RECORDS_PER_POLL};
pub use error::{
    render_excerpt, CollectSink, Error, ErrorAction, ErrorRecord, ErrorSink, FaultKind, Result,
    EXCERPT_CHARS,
};
pub use materialize::{
    materialize_row, nested_param, resolve_plan, CtorShape, Materialize, MaterializeError,
    MemberShape, ParamShape, Plan, PlanCache, SlotKind, TypeShape,
};
pub use options::{CsvOptions, FieldTypeInference, Format, QuoteMode, SchemaInferenceMode};
pub use progress::{ProgressEmitter, ProgressSnapshot, ReadMetrics};
pub use schema::{ColumnDescriptor, Schema};
pub use value::{
    ColumnType, DynRecord, FromValue, SlotType, Value, ValueTypeError, TYPE_LADDER,
};
