//! Cell-to-value conversion and smart decimal normalization.

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use rowflow_core::{ColumnType, Format, Value, TYPE_LADDER};
use rust_decimal::Decimal;
use uuid::Uuid;

lazy_static! {
    /// Anything that smart decimal analysis should even look at.
    static ref NUMERIC_LOOKING_RE: Regex = Regex::new(r"^[+-]?[\d.,\u{a0} ]+$").unwrap();
}

/// A cell could not be parsed into its declared column type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot parse {cell:?} as {ty}")]
pub struct ConvertError {
    pub cell: String,
    pub ty: ColumnType,
}

/// Rewrite a numeric-looking string into dot-decimal form, locale-free.
///
/// Returns `None` when the string is not numeric-looking or when the
/// separator pattern is genuinely ambiguous (a single separator followed
/// by exactly three digits, where the leading group could plausibly be a
/// thousands group); callers then defer to the caller-supplied format.
/// Idempotent: normalizing an already-normalized string returns it
/// unchanged.
pub fn normalize_decimal_str(s: &str) -> Option<String> {
    let stripped: String = s.chars().filter(|c| *c != ' ' && *c != '\u{a0}').collect();
    if !NUMERIC_LOOKING_RE.is_match(&stripped) {
        return None;
    }
    let (sign, digits) = match stripped.strip_prefix(['+', '-']) {
        Some(rest) => (&stripped[..1], rest),
        None => ("", stripped.as_str()),
    };
    if digits.is_empty() || !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let dots = digits.matches('.').count();
    let commas = digits.matches(',').count();

    let rebuilt = match (dots, commas) {
        (0, 0) => digits.to_string(),
        // Both present: the rightmost separator is the decimal point,
        // everything before it is grouping.
        (_, _) if dots > 0 && commas > 0 => {
            let decimal_pos = digits.rfind(['.', ','])?;
            let (int_part, frac_part) = digits.split_at(decimal_pos);
            let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
            format!("{int_digits}.{}", &frac_part[1..])
        }
        // A repeated single separator is pure grouping.
        (d, 0) if d > 1 => digits.chars().filter(|c| *c != '.').collect(),
        (0, c) if c > 1 => digits.chars().filter(|c| *c != ',').collect(),
        // One separator: ambiguous when it could be a thousands group.
        (1, 0) | (0, 1) => {
            let sep = if dots == 1 { '.' } else { ',' };
            let pos = digits.find(sep)?;
            let (int_part, frac_part) = digits.split_at(pos);
            let frac_part = &frac_part[1..];
            if frac_part.len() == 3
                && (1..=3).contains(&int_part.len())
                && !int_part.starts_with('0')
            {
                return None;
            }
            format!("{int_part}.{frac_part}")
        }
        _ => return None,
    };
    Some(format!("{sign}{rebuilt}"))
}

/// Reduce a cell to plain dot-decimal text for numeric parsing: smart
/// normalization when unambiguous, the caller format otherwise.
fn numeric_text(cell: &str, format: &Format) -> String {
    if let Some(normalized) = normalize_decimal_str(cell) {
        return normalized;
    }
    cell.chars()
        .filter(|c| *c != ' ' && *c != '\u{a0}' && *c != format.group_separator)
        .map(|c| {
            if c == format.decimal_separator {
                '.'
            } else {
                c
            }
        })
        .collect()
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Convert one trimmed, non-empty cell into its declared column type.
pub fn convert_cell(cell: &str, ty: ColumnType, format: &Format) -> Result<Value, ConvertError> {
    let fail = || ConvertError {
        cell: cell.to_string(),
        ty,
    };
    let value = match ty {
        ColumnType::Bool => parse_bool(cell).map(Value::Bool),
        ColumnType::I32 => i32::from_str(&numeric_text(cell, format))
            .ok()
            .map(Value::I32),
        ColumnType::I64 => i64::from_str(&numeric_text(cell, format))
            .ok()
            .map(Value::I64),
        ColumnType::Decimal => Decimal::from_str(&numeric_text(cell, format))
            .ok()
            .map(Value::Decimal),
        ColumnType::F64 => f64::from_str(&numeric_text(cell, format))
            .ok()
            .map(Value::F64),
        ColumnType::DateTime => rowflow_core::value::parse_datetime_with(
            cell,
            format.datetime_formats.iter().map(String::as_str),
        )
        .map(Value::DateTime),
        ColumnType::Guid => Uuid::parse_str(cell).ok().map(Value::Guid),
        ColumnType::Str => Some(Value::Str(cell.to_string())),
    };
    value.ok_or_else(fail)
}

/// The primitive-inference default: try the ladder per cell, first success
/// wins, strings otherwise. Leading-zero and very-long digit runs stay
/// text when the preservation knobs are on.
pub fn infer_primitive(
    cell: &str,
    format: &Format,
    preserve_leading_zeros: bool,
    preserve_large_integers: bool,
) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        let preserved = (preserve_leading_zeros && trimmed.len() > 1 && trimmed.starts_with('0'))
            || (preserve_large_integers && trimmed.len() > 18);
        if preserved {
            return Value::Str(cell.to_string());
        }
    }
    for ty in TYPE_LADDER {
        if let Ok(value) = convert_cell(trimmed, ty, format) {
            return value;
        }
    }
    Value::Str(cell.to_string())
}
