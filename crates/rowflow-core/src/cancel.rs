//! Cooperative cancellation.

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Poll cadence inside the parser state machine, in consumed characters.
pub const CHARS_PER_POLL: u32 = 8_192;

/// Poll cadence on the emission path, in emitted records.
pub const RECORDS_PER_POLL: u64 = 256;

/// Merges the caller-supplied and options-embedded cancellation signals.
/// Either one firing cancels the stream; a token set before the first read
/// still raises [`Error::Canceled`] on the first iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelProbe {
    tokens: Vec<CancellationToken>,
}

impl CancelProbe {
    pub fn new(tokens: Vec<CancellationToken>) -> Self {
        CancelProbe { tokens }
    }

    pub fn is_canceled(&self) -> bool {
        self.tokens.iter().any(|t| t.is_cancelled())
    }

    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_token_cancels() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let probe = CancelProbe::new(vec![a.clone(), b.clone()]);
        assert!(probe.check().is_ok());

        b.cancel();
        assert!(probe.is_canceled());
        assert!(matches!(probe.check(), Err(Error::Canceled)));
    }

    #[test]
    fn empty_probe_never_cancels() {
        assert!(CancelProbe::default().check().is_ok());
    }
}
