//! High-water marks for pages in use.
//!
//! Cheap enough to update on every allocation; read by stats writers.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct HighWater {
    peak: AtomicUsize,
}

impl HighWater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current level; keeps the maximum seen.
    pub fn record(&self, level: usize) {
        self.peak.fetch_max(level, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        tracing::trace!(level, peak = self.peak.load(Ordering::Relaxed), "pages in use");
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_maximum() {
        let hw = HighWater::new();
        hw.record(3);
        hw.record(7);
        hw.record(2);
        assert_eq!(hw.peak(), 7);
    }
}
