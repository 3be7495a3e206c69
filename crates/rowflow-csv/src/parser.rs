//! The RFC 4180 parser state machine.
//!
//! An incremental, buffer-fed fold over decoded characters. The machine
//! never unwinds on malformed input: quote faults are attached to the row
//! under assembly and handled downstream by the error policy. The only
//! state that crosses a chunk boundary is the machine itself plus the
//! one-shot "previous character was CR" bit, which is what makes a CRLF
//! straddling two chunks count as a single line advance.

use rowflow_core::{render_excerpt, CancelProbe, CsvOptions, QuoteMode, Result, CHARS_PER_POLL};

use crate::raw::RawCapture;

/// A fault recorded while assembling one row. All parser faults are quote
/// faults; guard rails and schema checks run downstream.
#[derive(Debug, Clone)]
pub struct RowFault {
    pub message: String,
}

/// One assembled record, before guard rails and schema resolution.
#[derive(Debug)]
pub struct RawRow {
    pub fields: Vec<String>,
    /// Physical line on which the record started (1-based).
    pub line: u64,
    /// Raw prefix for fault excerpts.
    pub prefix: String,
    /// Full raw text, when a raw observer is installed.
    pub raw: Option<String>,
    /// Raw length in characters, including quotes and separators,
    /// excluding the record terminator.
    pub raw_len: u64,
    pub faults: Vec<RowFault>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    InUnquoted,
    InQuoted,
    AfterClosingQuote,
}

#[derive(Debug)]
pub struct Parser {
    separator: char,
    quote_mode: QuoteMode,
    error_on_trailing_garbage: bool,
    normalize_newlines: bool,
    preserve_line_endings: bool,

    state: State,
    field: String,
    fields: Vec<String>,
    faults: Vec<RowFault>,
    raw: RawCapture,

    /// Current physical line, 1-based.
    line: u64,
    /// Newline occurrences observed (CRLF counts once).
    newlines: u64,
    record_line: u64,
    record_active: bool,
    /// One-shot CR flag; survives chunk boundaries.
    last_was_cr: bool,
    /// A CR inside a quoted field, withheld from the full raw tier until
    /// we know whether an LF follows (CRLF→LF normalization).
    quoted_cr_pending: bool,
    /// A finished row waiting to learn whether its CR terminator grows
    /// into CRLF (`preserve_line_endings` only).
    held: Option<RawRow>,

    poll_budget: u32,
}

impl Parser {
    pub fn new(options: &CsvOptions, capture_full: bool) -> Self {
        Parser {
            separator: options.separator_char(),
            quote_mode: options.quote_mode,
            error_on_trailing_garbage: options.error_on_trailing_garbage,
            normalize_newlines: options.normalize_newlines_in_fields,
            preserve_line_endings: options.preserve_line_endings,
            state: State::FieldStart,
            field: String::new(),
            fields: Vec::new(),
            faults: Vec::new(),
            raw: RawCapture::new(capture_full),
            line: 1,
            newlines: 0,
            record_line: 1,
            record_active: false,
            last_was_cr: false,
            quoted_cr_pending: false,
            held: None,
            poll_budget: CHARS_PER_POLL,
        }
    }

    /// Physical newline occurrences seen so far.
    pub fn lines_read(&self) -> u64 {
        self.newlines
    }

    /// The physical line the machine is currently on.
    pub fn current_line(&self) -> u64 {
        self.line
    }

    /// Fold one chunk into the machine, appending finished rows to `out`.
    /// The cancellation probe is polled every [`CHARS_PER_POLL`]
    /// characters; cancellation is the only error this returns.
    pub fn feed(
        &mut self,
        chunk: &[char],
        out: &mut Vec<RawRow>,
        probe: &CancelProbe,
    ) -> Result<()> {
        for &c in chunk {
            self.poll_budget -= 1;
            if self.poll_budget == 0 {
                self.poll_budget = CHARS_PER_POLL;
                probe.check()?;
            }
            self.step(c, out);
        }
        Ok(())
    }

    /// Flush end-of-stream state: an unterminated quoted field faults, and
    /// any pending field data still becomes a final record.
    pub fn finish(&mut self, out: &mut Vec<RawRow>) {
        if let Some(row) = self.held.take() {
            out.push(row);
        }
        if self.quoted_cr_pending {
            self.quoted_cr_pending = false;
            self.raw.push_full_only('\r');
        }
        if self.state == State::InQuoted {
            self.fault("unterminated quoted field at end of stream".to_string());
        }
        if self.record_active || !self.fields.is_empty() || !self.field.is_empty() {
            self.fields.push(std::mem::take(&mut self.field));
            let parts = self.raw.take();
            out.push(RawRow {
                fields: std::mem::take(&mut self.fields),
                line: self.record_line,
                prefix: parts.prefix,
                raw: parts.full,
                raw_len: parts.len,
                faults: std::mem::take(&mut self.faults),
            });
            self.record_active = false;
        }
        self.state = State::FieldStart;
        self.last_was_cr = false;
    }

    fn step(&mut self, c: char, out: &mut Vec<RawRow>) {
        // Release a row held for the second half of its CRLF terminator.
        if let Some(mut row) = self.held.take() {
            if c == '\n' && self.last_was_cr {
                self.last_was_cr = false;
                if let Some(raw) = &mut row.raw {
                    raw.push('\n');
                }
                out.push(row);
                return;
            }
            out.push(row);
        }

        let after_cr = self.last_was_cr;
        self.last_was_cr = false;

        if self.quoted_cr_pending {
            self.quoted_cr_pending = false;
            if c != '\n' {
                // No LF followed; the withheld CR stays in the full tier.
                self.raw.push_full_only('\r');
            }
        }

        if c == '\n' && after_cr {
            // Second half of a CRLF; the line was counted at the CR.
            if self.state == State::InQuoted {
                self.raw.push('\n');
                self.field.push('\n');
            }
            return;
        }

        match self.state {
            State::FieldStart => {
                if c == '"' {
                    self.touch();
                    self.raw.push(c);
                    self.state = State::InQuoted;
                } else if c == self.separator {
                    self.touch();
                    self.raw.push(c);
                    self.commit_field();
                } else if c == '\r' || c == '\n' {
                    self.terminate(c, out);
                } else {
                    self.touch();
                    self.raw.push(c);
                    self.field.push(c);
                    self.state = State::InUnquoted;
                }
            }
            State::InUnquoted => {
                if c == '"' {
                    self.raw.push(c);
                    match self.quote_mode {
                        QuoteMode::Strict => {
                            self.fault("quote character in unquoted field".to_string());
                            self.field.push('"');
                        }
                        QuoteMode::ErrorOnIllegal => {
                            self.fault("quote character in unquoted field".to_string());
                        }
                        QuoteMode::Lenient => {
                            self.state = State::InQuoted;
                        }
                    }
                } else if c == self.separator {
                    self.raw.push(c);
                    self.commit_field();
                } else if c == '\r' || c == '\n' {
                    self.terminate(c, out);
                } else {
                    self.raw.push(c);
                    self.field.push(c);
                }
            }
            State::InQuoted => {
                if c == '"' {
                    self.raw.push(c);
                    self.state = State::AfterClosingQuote;
                } else if c == '\r' {
                    // Newlines inside quoted fields are content, but still
                    // advance the physical line counter.
                    self.newlines += 1;
                    self.line += 1;
                    self.last_was_cr = true;
                    if self.normalize_newlines {
                        self.raw.push_prefix_only('\r');
                        self.quoted_cr_pending = true;
                    } else {
                        self.raw.push('\r');
                    }
                    self.field.push('\r');
                } else if c == '\n' {
                    self.newlines += 1;
                    self.line += 1;
                    self.raw.push('\n');
                    self.field.push('\n');
                } else {
                    self.raw.push(c);
                    self.field.push(c);
                }
            }
            State::AfterClosingQuote => {
                if c == '"' {
                    // Doubled quote: a literal quote inside the field.
                    self.raw.push(c);
                    self.field.push('"');
                    self.state = State::InQuoted;
                } else if c == self.separator {
                    self.raw.push(c);
                    self.commit_field();
                } else if c == '\r' || c == '\n' {
                    self.terminate(c, out);
                } else {
                    self.raw.push(c);
                    if self.error_on_trailing_garbage {
                        self.fault(format!(
                            "unexpected character '{}' after closing quote",
                            render_excerpt(&c.to_string())
                        ));
                    } else {
                        self.field.push(c);
                    }
                    self.state = State::InUnquoted;
                }
            }
        }
    }

    fn touch(&mut self) {
        if !self.record_active {
            self.record_active = true;
            self.record_line = self.line;
        }
    }

    fn commit_field(&mut self) {
        self.fields.push(std::mem::take(&mut self.field));
        self.state = State::FieldStart;
    }

    fn fault(&mut self, message: String) {
        self.touch();
        self.faults.push(RowFault { message });
    }

    /// Consume a record terminator: count the newline, assemble the row,
    /// and either emit it or hold it for a possible trailing LF.
    fn terminate(&mut self, c: char, out: &mut Vec<RawRow>) {
        let row_line = if self.record_active {
            self.record_line
        } else {
            self.line
        };
        self.newlines += 1;
        self.line += 1;
        if c == '\r' {
            self.last_was_cr = true;
        }

        // A blank line still terminates a record of one empty field.
        self.fields.push(std::mem::take(&mut self.field));
        let parts = self.raw.take();
        let mut row = RawRow {
            fields: std::mem::take(&mut self.fields),
            line: row_line,
            prefix: parts.prefix,
            raw: parts.full,
            raw_len: parts.len,
            faults: std::mem::take(&mut self.faults),
        };
        self.record_active = false;
        self.state = State::FieldStart;

        if self.preserve_line_endings {
            if let Some(raw) = &mut row.raw {
                raw.push(c);
                if c == '\r' {
                    self.held = Some(row);
                    return;
                }
            }
        }
        out.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str, options: &CsvOptions, chunk: usize) -> (Vec<RawRow>, u64) {
        let mut parser = Parser::new(options, true);
        let probe = CancelProbe::default();
        let chars: Vec<char> = input.chars().collect();
        let mut rows = Vec::new();
        for piece in chars.chunks(chunk.max(1)) {
            parser.feed(piece, &mut rows, &probe).unwrap();
        }
        parser.finish(&mut rows);
        (rows, parser.lines_read())
    }

    fn fields(rows: &[RawRow]) -> Vec<Vec<&str>> {
        rows.iter()
            .map(|r| r.fields.iter().map(|f| f.as_str()).collect())
            .collect()
    }

    #[test]
    fn plain_records() {
        let (rows, lines) = parse("a,b,c\nd,e,f\n", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["a", "b", "c"], vec!["d", "e", "f"]]);
        assert_eq!(lines, 2);
    }

    #[test]
    fn quoted_fields_with_escapes_and_newlines() {
        let input = "\"a\",\"b with \"\"quote\"\"\",\"c,d\",\"e\nf\"\n";
        let (rows, lines) = parse(input, &CsvOptions::default(), 64);
        assert_eq!(
            fields(&rows),
            vec![vec!["a", "b with \"quote\"", "c,d", "e\nf"]]
        );
        // The newline inside the quoted field counts as a physical line.
        assert_eq!(lines, 2);
    }

    #[test]
    fn identical_output_across_chunk_sizes() {
        let input = "x,\"multi\r\nline\",3\r\n\"q\"\"q\",,tail\r\n";
        let baseline = parse(input, &CsvOptions::default(), 4096);
        for chunk in [1usize, 2, 4, 16, 64] {
            let candidate = parse(input, &CsvOptions::default(), chunk);
            assert_eq!(fields(&candidate.0), fields(&baseline.0), "chunk {chunk}");
            assert_eq!(candidate.1, baseline.1, "chunk {chunk}");
        }
    }

    #[test]
    fn crlf_across_chunk_boundary_counts_once() {
        // CR is the last character of the first chunk, LF the first of the
        // next.
        let input = "Id,Text\r\n1,A\r\n";
        let (rows, lines) = parse(input, &CsvOptions::default(), 8);
        assert_eq!(fields(&rows), vec![vec!["Id", "Text"], vec!["1", "A"]]);
        assert_eq!(lines, 2);
    }

    #[test]
    fn blank_line_is_a_single_empty_field_record() {
        let (rows, _) = parse("a\n\nb\n", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["a"], vec![""], vec!["b"]]);
    }

    #[test]
    fn trailing_separator_emits_empty_trailing_field() {
        let (rows, _) = parse("a,\n", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["a", ""]]);
    }

    #[test]
    fn final_record_without_terminator() {
        let (rows, lines) = parse("a,b\nc,d", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["a", "b"], vec!["c", "d"]]);
        assert_eq!(lines, 1);
    }

    #[test]
    fn strict_mode_keeps_illegal_quote_and_faults() {
        let (rows, _) = parse("a\"b,c\n", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["a\"b", "c"]]);
        assert_eq!(rows[0].faults.len(), 1);
    }

    #[test]
    fn error_on_illegal_mode_drops_the_quote() {
        let options = CsvOptions {
            quote_mode: QuoteMode::ErrorOnIllegal,
            ..CsvOptions::default()
        };
        let (rows, _) = parse("a\"b,c\n", &options, 64);
        assert_eq!(fields(&rows), vec![vec!["ab", "c"]]);
        assert_eq!(rows[0].faults.len(), 1);
    }

    #[test]
    fn lenient_mode_toggles_into_quoted() {
        let options = CsvOptions {
            quote_mode: QuoteMode::Lenient,
            ..CsvOptions::default()
        };
        let (rows, _) = parse("a\"b,c\"d,e\n", &options, 64);
        assert_eq!(fields(&rows), vec![vec!["ab,cd", "e"]]);
        assert!(rows[0].faults.is_empty());
    }

    #[test]
    fn trailing_garbage_faults_when_enabled() {
        let options = CsvOptions {
            error_on_trailing_garbage: true,
            ..CsvOptions::default()
        };
        let (rows, _) = parse("\"a\"x,b\n", &options, 64);
        assert_eq!(fields(&rows), vec![vec!["a", "b"]]);
        assert_eq!(rows[0].faults.len(), 1);
    }

    #[test]
    fn trailing_garbage_continues_unquoted_by_default() {
        let (rows, _) = parse("\"a\"x,b\n", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["ax", "b"]]);
        assert!(rows[0].faults.is_empty());
    }

    #[test]
    fn unterminated_quote_faults_and_still_emits() {
        let (rows, _) = parse("\"Unfinished", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["Unfinished"]]);
        assert_eq!(rows[0].faults.len(), 1);
        assert!(rows[0].faults[0].message.contains("unterminated"));
    }

    #[test]
    fn cr_inside_quoted_field_advances_line_counter() {
        let (rows, lines) = parse("\"a\rb\",c\n", &CsvOptions::default(), 64);
        assert_eq!(fields(&rows), vec![vec!["a\rb", "c"]]);
        assert_eq!(lines, 2);
    }

    #[test]
    fn raw_capture_mirrors_record_without_terminator() {
        let (rows, _) = parse("a,\"b\nc\"\r\nd\r\n", &CsvOptions::default(), 64);
        assert_eq!(rows[0].raw.as_deref(), Some("a,\"b\nc\""));
        assert_eq!(rows[0].raw_len, 7);
        assert_eq!(rows[1].raw.as_deref(), Some("d"));
    }

    #[test]
    fn preserve_line_endings_includes_terminator() {
        let options = CsvOptions {
            preserve_line_endings: true,
            ..CsvOptions::default()
        };
        // Split so the CRLF straddles two chunks.
        let (rows, _) = parse("a\r\nb\n", &options, 2);
        assert_eq!(rows[0].raw.as_deref(), Some("a\r\n"));
        assert_eq!(rows[1].raw.as_deref(), Some("b\n"));
    }

    #[test]
    fn normalize_newlines_rewrites_crlf_in_quoted_fields() {
        let options = CsvOptions {
            normalize_newlines_in_fields: true,
            ..CsvOptions::default()
        };
        let (rows, _) = parse("\"a\r\nb\",c\n", &options, 1);
        // Field content keeps the literal CRLF; only the raw tier rewrites.
        assert_eq!(rows[0].fields[0], "a\r\nb");
        assert_eq!(rows[0].raw.as_deref(), Some("\"a\nb\",c"));
    }

    #[test]
    fn bare_cr_in_quoted_field_survives_normalization() {
        let options = CsvOptions {
            normalize_newlines_in_fields: true,
            ..CsvOptions::default()
        };
        let (rows, _) = parse("\"a\rb\",c\n", &options, 1);
        assert_eq!(rows[0].raw.as_deref(), Some("\"a\rb\",c"));
    }

    #[test]
    fn record_line_is_the_starting_line() {
        let (rows, _) = parse("a\n\"x\ny\",z\nb\n", &CsvOptions::default(), 64);
        assert_eq!(rows[0].line, 1);
        assert_eq!(rows[1].line, 2);
        // The quoted field spanned lines 2-3, so the next record starts on 4.
        assert_eq!(rows[2].line, 4);
    }
}
