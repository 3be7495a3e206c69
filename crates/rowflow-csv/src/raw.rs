//! Two-tier raw-record capture.
//!
//! The prefix tier is always on: the first [`EXCERPT_CHARS`] characters of
//! the current record back every fault excerpt. The full tier only exists
//! when a raw observer is installed, so the fast path stays free of
//! per-record string growth.

use rowflow_core::EXCERPT_CHARS;

#[derive(Debug)]
pub(crate) struct RawCapture {
    prefix: String,
    prefix_chars: usize,
    full: Option<String>,
    capture_full: bool,
    len: u64,
}

/// The captured text of one finished record.
#[derive(Debug)]
pub(crate) struct RawParts {
    pub prefix: String,
    pub full: Option<String>,
    pub len: u64,
}

impl RawCapture {
    pub fn new(capture_full: bool) -> Self {
        RawCapture {
            prefix: String::new(),
            prefix_chars: 0,
            full: capture_full.then(String::new),
            capture_full,
            len: 0,
        }
    }

    /// Record one consumed character in both tiers.
    pub fn push(&mut self, c: char) {
        self.len += 1;
        if self.prefix_chars < EXCERPT_CHARS {
            self.prefix.push(c);
            self.prefix_chars += 1;
        }
        if let Some(full) = &mut self.full {
            full.push(c);
        }
    }

    /// Record a character that is withheld from the full tier, pending
    /// CRLF normalization.
    pub fn push_prefix_only(&mut self, c: char) {
        self.len += 1;
        if self.prefix_chars < EXCERPT_CHARS {
            self.prefix.push(c);
            self.prefix_chars += 1;
        }
    }

    /// Append to the full tier only; used for withheld normalization
    /// characters and preserved record terminators, which do not count
    /// toward the raw length.
    pub fn push_full_only(&mut self, c: char) {
        if let Some(full) = &mut self.full {
            full.push(c);
        }
    }

    /// Finish the current record and reset for the next one.
    pub fn take(&mut self) -> RawParts {
        let parts = RawParts {
            prefix: std::mem::take(&mut self.prefix),
            full: self.full.take(),
            len: self.len,
        };
        self.prefix_chars = 0;
        self.len = 0;
        if self.capture_full {
            self.full = Some(String::new());
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prefix_caps_at_excerpt_length() {
        let mut capture = RawCapture::new(false);
        for _ in 0..200 {
            capture.push('x');
        }
        let parts = capture.take();
        assert_eq!(parts.prefix.chars().count(), EXCERPT_CHARS);
        assert_eq!(parts.len, 200);
        assert!(parts.full.is_none());
    }

    #[test]
    fn full_tier_resets_per_record() {
        let mut capture = RawCapture::new(true);
        capture.push('a');
        let first = capture.take();
        capture.push('b');
        let second = capture.take();
        assert_eq!(first.full.as_deref(), Some("a"));
        assert_eq!(second.full.as_deref(), Some("b"));
    }
}
