//! Transfer progress reporting.
//!
//! Strategies report raw units: bytes for the chunked writer, blocks for the
//! negotiated protocol. Callers that only care about a percentage wrap their
//! callback in a [`ProgressTracker`], which maps units to 0..=100 and drops
//! updates that would not move the needle.

/// Raw progress callback: `(sent_units, total_units)`.
///
/// Invoked on the thread running the transfer. UI code has to marshal to its
/// own thread before touching widgets.
pub type ProgressFn<'a> = dyn FnMut(usize, usize) + Send + 'a;

/// Map `sent` of `total` units to a whole percentage.
pub fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let sent = sent.min(total) as u128;
    (sent * 100 / total as u128) as u8
}

/// Forwards percentage changes to a callback.
pub struct ProgressTracker<F: FnMut(u8)> {
    last: Option<u8>,
    on_percent: F,
}

impl<F: FnMut(u8)> ProgressTracker<F> {
    /// Create a tracker around `on_percent`.
    pub fn new(on_percent: F) -> Self {
        Self {
            last: None,
            on_percent,
        }
    }

    /// Feed a raw update; the callback only fires when the percentage changes.
    pub fn update(&mut self, sent: usize, total: usize) {
        let pct = percent(sent, total);
        if self.last != Some(pct) {
            self.last = Some(pct);
            (self.on_percent)(pct);
        }
    }

    /// Last percentage forwarded, if any.
    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
