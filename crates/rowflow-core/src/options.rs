//! Read options.
//!
//! [`CsvOptions`] is plain serde data, so option sets can be loaded from
//! YAML the same way pipeline specs are. Callbacks (sinks, observers,
//! progress, cancellation tokens) attach through the reader builder
//! instead.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorAction;

/// Quote handling policy for unquoted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteMode {
    /// A quote inside an unquoted field is a fault; the literal `"` is
    /// still appended to the field.
    #[default]
    Strict,
    /// A quote inside an unquoted field toggles into quoted mode.
    Lenient,
    /// A quote inside an unquoted field is a fault and the character is
    /// dropped.
    ErrorOnIllegal,
}

/// What schema inference derives from the sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaInferenceMode {
    NamesOnly,
    #[default]
    NamesAndTypes,
}

/// Per-cell conversion policy for columns without a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTypeInference {
    /// Cells stay strings.
    None,
    /// Try the primitive ladder per cell; first success wins.
    #[default]
    Primitive,
    /// Delegate to the builder-supplied value converter.
    Custom,
}

/// Caller-supplied numeric and datetime format hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    #[serde(default = "default_decimal_separator")]
    pub decimal_separator: char,
    #[serde(default = "default_group_separator")]
    pub group_separator: char,
    /// chrono format strings, tried in order. A format that only consumes a
    /// date yields midnight.
    #[serde(default = "default_datetime_formats")]
    pub datetime_formats: Vec<String>,
}

impl Default for Format {
    fn default() -> Self {
        Format {
            decimal_separator: default_decimal_separator(),
            group_separator: default_group_separator(),
            datetime_formats: default_datetime_formats(),
        }
    }
}

fn default_decimal_separator() -> char {
    '.'
}

fn default_group_separator() -> char {
    ','
}

fn default_datetime_formats() -> Vec<String> {
    crate::value::DEFAULT_DATETIME_FORMATS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// All plain-data knobs of one read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    /// Field delimiter; only the first character is used.
    pub separator: String,
    /// Consume the first record as the header row.
    pub has_header: bool,
    /// Caller-supplied column names; overrides header use.
    pub schema: Option<Vec<String>>,
    pub quote_mode: QuoteMode,
    /// Fault on characters between a closing quote and the next separator.
    pub error_on_trailing_garbage: bool,
    /// Tolerate rows wider than the schema by truncating them.
    pub allow_extra_fields: bool,
    /// Tolerate rows narrower than the schema by padding with empty cells.
    pub allow_missing_trailing_fields: bool,
    /// Trim surrounding whitespace from every field after assembly.
    pub trim_whitespace: bool,
    /// Include the record terminator in raw-observer text.
    pub preserve_line_endings: bool,
    /// Rewrite CRLF to LF inside quoted fields in raw-observer text.
    pub normalize_newlines_in_fields: bool,
    /// Buffer a sample of rows and infer column names (and types).
    pub infer_schema: bool,
    pub schema_inference_sample_rows: usize,
    pub schema_inference_mode: SchemaInferenceMode,
    pub field_type_inference: FieldTypeInference,
    /// Keep all-digit cells with a leading zero as text.
    pub preserve_numeric_strings_with_leading_zeros: bool,
    /// Keep all-digit cells longer than 18 digits as text.
    pub preserve_large_integer_strings: bool,
    /// Guard rail; 0 disables.
    pub max_columns_per_row: usize,
    /// Guard rail, in characters including quotes and separators; 0
    /// disables.
    pub max_raw_record_length: usize,
    pub format: Format,
    pub error_action: ErrorAction,
    /// Emit a progress snapshot every this many emitted records.
    pub progress_record_interval: u64,
    /// Emit a progress snapshot at least every this many milliseconds.
    pub progress_time_interval_ms: u64,
    /// Pump chunk size, in characters.
    pub buffer_chars: usize,
    /// Reader identifier stamped on error records.
    pub reader_name: String,
    /// Input path stamped on error records, if known.
    pub path: Option<PathBuf>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            separator: ",".to_string(),
            has_header: false,
            schema: None,
            quote_mode: QuoteMode::default(),
            error_on_trailing_garbage: false,
            allow_extra_fields: false,
            allow_missing_trailing_fields: false,
            trim_whitespace: false,
            preserve_line_endings: false,
            normalize_newlines_in_fields: false,
            infer_schema: false,
            schema_inference_sample_rows: 100,
            schema_inference_mode: SchemaInferenceMode::default(),
            field_type_inference: FieldTypeInference::default(),
            preserve_numeric_strings_with_leading_zeros: true,
            preserve_large_integer_strings: true,
            max_columns_per_row: 0,
            max_raw_record_length: 0,
            format: Format::default(),
            error_action: ErrorAction::default(),
            progress_record_interval: 10_000,
            progress_time_interval_ms: 1_000,
            buffer_chars: 64 * 1024,
            reader_name: "csv".to_string(),
            path: None,
        }
    }
}

impl CsvOptions {
    /// The effective single-character delimiter.
    pub fn separator_char(&self) -> char {
        self.separator.chars().next().unwrap_or(',')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_rfc4180ish() {
        let options = CsvOptions::default();
        assert_eq!(options.separator_char(), ',');
        assert_eq!(options.quote_mode, QuoteMode::Strict);
        assert_eq!(options.schema_inference_sample_rows, 100);
        assert!(options.preserve_large_integer_strings);
    }

    #[test]
    fn options_deserialize_from_partial_yaml() {
        let yaml = "separator: \";\"\nhas_header: true\nmax_columns_per_row: 12\n";
        let options: CsvOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(options.separator_char(), ';');
        assert!(options.has_header);
        assert_eq!(options.max_columns_per_row, 12);
        assert_eq!(options.buffer_chars, 64 * 1024);
    }
}
