//! # Rowflow CSV
//!
//! A streaming CSV ingestion core: an incremental RFC 4180 parser fed by
//! fixed-size character chunks, schema resolution with bounded-sample type
//! inference, locale-aware field conversion with smart decimal
//! normalization, and lazy materialization of rows into untyped records or
//! caller types, under cooperative cancellation and a structured error
//! policy.
//!
//! ```
//! use rowflow_core::{CsvOptions, Value};
//! use rowflow_csv::{CsvReaderBuilder, StrSource};
//!
//! # fn main() -> rowflow_core::Result<()> {
//! let options = CsvOptions {
//!     has_header: true,
//!     ..CsvOptions::default()
//! };
//! let reader = CsvReaderBuilder::new(options).build(StrSource::new("name,age\nada,36\n"));
//! let records = reader.records().collect::<rowflow_core::Result<Vec<_>>>()?;
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].get("age"), Some(&Value::I32(36)));
//! # Ok(())
//! # }
//! ```

pub mod async_reader;
pub mod convert;
mod guard;
mod infer;
pub mod parser;
mod pipeline;
mod raw;
pub mod reader;
pub mod source;

pub use async_reader::{AsyncCsvReader, AsyncRecords, AsyncTyped};
pub use convert::{convert_cell, infer_primitive, normalize_decimal_str, ConvertError};
pub use reader::{CsvReader, CsvReaderBuilder, Records, Typed};
pub use source::{AsyncCharRead, AsyncIoSource, CharRead, IoSource, SourcePosition, StrSource};
