//! Per-record guard rails.

use rowflow_core::CsvOptions;

use crate::parser::RawRow;

/// Check the assembled record against the configured caps. Column count
/// first, raw length second; at most one message per record.
pub(crate) fn check(row: &RawRow, options: &CsvOptions) -> Option<String> {
    if options.max_columns_per_row > 0 && row.fields.len() > options.max_columns_per_row {
        return Some(format!(
            "record has {} columns, limit is {}",
            row.fields.len(),
            options.max_columns_per_row
        ));
    }
    if options.max_raw_record_length > 0 && row.raw_len > options.max_raw_record_length as u64 {
        return Some(format!(
            "record is {} characters long, limit is {}",
            row.raw_len, options.max_raw_record_length
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(fields: &[&str], raw_len: u64) -> RawRow {
        RawRow {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            line: 1,
            prefix: String::new(),
            raw: None,
            raw_len,
            faults: Vec::new(),
        }
    }

    #[test]
    fn column_check_wins_when_both_limits_trip() {
        let options = CsvOptions {
            max_columns_per_row: 2,
            max_raw_record_length: 4,
            ..CsvOptions::default()
        };
        let message = check(&row(&["a", "b", "c"], 100), &options).unwrap();
        assert!(message.contains("columns"));
    }

    #[test]
    fn zero_disables_both_limits() {
        let options = CsvOptions::default();
        assert_eq!(check(&row(&["a"; 500], 1_000_000), &options), None);
    }
}
