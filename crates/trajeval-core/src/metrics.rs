//! Global atomic counters for trajeval observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an evaluation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, updated without locking.
pub struct Metrics {
    files_scanned: AtomicU64,
    lines_skipped: AtomicU64,
    events_ingested: AtomicU64,
    episodes_extracted: AtomicU64,
    pairs_built: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            files_scanned: AtomicU64::new(0),
            lines_skipped: AtomicU64::new(0),
            events_ingested: AtomicU64::new(0),
            episodes_extracted: AtomicU64::new(0),
            pairs_built: AtomicU64::new(0),
        }
    }

    /// Increment the files-scanned counter by one.
    pub fn inc_files_scanned(&self) {
        self.files_scanned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "files_scanned", "counter incremented");
    }

    /// Add to the skipped-lines counter.
    pub fn add_lines_skipped(&self, n: u64) {
        self.lines_skipped.fetch_add(n, Ordering::Relaxed);
    }

    /// Add to the events-ingested counter.
    pub fn add_events_ingested(&self, n: u64) {
        self.events_ingested.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment the episodes-extracted counter by one.
    pub fn inc_episodes_extracted(&self) {
        self.episodes_extracted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "episodes_extracted", "counter incremented");
    }

    /// Add to the pairs-built counter.
    pub fn add_pairs_built(&self, n: u64) {
        self.pairs_built.fetch_add(n, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of an evaluation) rather than on
    /// every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            files_scanned = self.files_scanned(),
            lines_skipped = self.lines_skipped(),
            events_ingested = self.events_ingested(),
            episodes_extracted = self.episodes_extracted(),
            pairs_built = self.pairs_built(),
        );
    }

    pub fn files_scanned(&self) -> u64 {
        self.files_scanned.load(Ordering::Relaxed)
    }

    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped.load(Ordering::Relaxed)
    }

    pub fn events_ingested(&self) -> u64 {
        self.events_ingested.load(Ordering::Relaxed)
    }

    pub fn episodes_extracted(&self) -> u64 {
        self.episodes_extracted.load(Ordering::Relaxed)
    }

    pub fn pairs_built(&self) -> u64 {
        self.pairs_built.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.files_scanned.store(0, Ordering::Relaxed);
        self.lines_skipped.store(0, Ordering::Relaxed);
        self.events_ingested.store(0, Ordering::Relaxed);
        self.episodes_extracted.store(0, Ordering::Relaxed);
        self.pairs_built.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.files_scanned(), 0);
        m.inc_files_scanned();
        m.inc_files_scanned();
        assert_eq!(m.files_scanned(), 2);

        m.add_lines_skipped(3);
        assert_eq!(m.lines_skipped(), 3);

        m.inc_episodes_extracted();
        m.add_pairs_built(4);
        m.add_events_ingested(10);
        assert_eq!(m.episodes_extracted(), 1);
        assert_eq!(m.pairs_built(), 4);
        assert_eq!(m.events_ingested(), 10);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_files_scanned();
        m.add_lines_skipped(1);
        m.inc_episodes_extracted();
        m.add_pairs_built(1);
        m.reset();
        assert_eq!(m.files_scanned(), 0);
        assert_eq!(m.lines_skipped(), 0);
        assert_eq!(m.episodes_extracted(), 0);
        assert_eq!(m.pairs_built(), 0);
    }
}
