//! Schema type inference over the bounded sample window.
//!
//! Each column starts with the full candidate ladder. A candidate is
//! removed on its second parse failure, which tolerates a single outlier
//! cell. All-digit cells with a leading zero, and digit runs longer than
//! 18, knock out the numeric candidates so the values survive as text.

use rowflow_core::{ColumnType, CsvOptions, Format, TYPE_LADDER};

use crate::convert::convert_cell;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    ty: ColumnType,
    failures: u8,
}

const FAILURES_TO_REMOVE: u8 = 2;

#[derive(Debug)]
pub(crate) struct TypeInference {
    columns: Vec<Vec<Candidate>>,
    format: Format,
    preserve_leading_zeros: bool,
    preserve_large_integers: bool,
}

impl TypeInference {
    pub fn new(width: usize, options: &CsvOptions) -> Self {
        let ladder: Vec<Candidate> = TYPE_LADDER
            .iter()
            .map(|&ty| Candidate { ty, failures: 0 })
            .collect();
        TypeInference {
            columns: vec![ladder; width],
            format: options.format.clone(),
            preserve_leading_zeros: options.preserve_numeric_strings_with_leading_zeros,
            preserve_large_integers: options.preserve_large_integer_strings,
        }
    }

    pub fn observe(&mut self, fields: &[String]) {
        for (index, candidates) in self.columns.iter_mut().enumerate() {
            let cell = fields.get(index).map(|f| f.trim()).unwrap_or("");
            if cell.is_empty() {
                continue;
            }

            if cell.chars().all(|c| c.is_ascii_digit()) {
                let preserved = (self.preserve_leading_zeros
                    && cell.len() > 1
                    && cell.starts_with('0'))
                    || (self.preserve_large_integers && cell.len() > 18);
                if preserved {
                    // The remaining candidates still get a parse attempt,
                    // so a column of preserved digit runs ends up string.
                    candidates.retain(|c| !c.ty.is_numeric());
                }
            }

            for candidate in candidates.iter_mut() {
                if convert_cell(cell, candidate.ty, &self.format).is_err() {
                    candidate.failures += 1;
                }
            }
            candidates.retain(|c| c.failures < FAILURES_TO_REMOVE);
        }
    }

    /// The first surviving candidate per column, or string.
    pub fn finish(self) -> Vec<Option<ColumnType>> {
        self.columns
            .into_iter()
            .map(|candidates| Some(candidates.first().map_or(ColumnType::Str, |c| c.ty)))
            .collect()
    }
}
