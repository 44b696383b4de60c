//! Bandwidth statistics for the synchronizer.

use serde::Serialize;

/// Counters across every client served by one [`SyncContext`](crate::SyncContext).
///
/// `bytes_sent` counts serialized payloads before compression;
/// `bytes_saved` is what sending deltas saved over sending full
/// snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatistics {
    pub total_updates: u64,
    pub delta_updates: u64,
    pub full_updates: u64,
    pub compressed_updates: u64,
    pub bytes_sent: u64,
    pub bytes_saved: u64,
    /// `(bytes_sent + bytes_saved) / bytes_sent`. Keeps its previous
    /// value while nothing has been sent.
    pub compression_ratio: f64,
}

impl SyncStatistics {
    pub(crate) fn record_full(&mut self, size: usize) {
        self.total_updates += 1;
        self.full_updates += 1;
        self.bytes_sent += size as u64;
    }

    pub(crate) fn record_delta(&mut self, size: usize, full_size: usize) {
        self.total_updates += 1;
        self.delta_updates += 1;
        self.bytes_sent += size as u64;
        self.bytes_saved += full_size.saturating_sub(size) as u64;
    }

    pub(crate) fn record_compressed(&mut self) {
        self.compressed_updates += 1;
    }

    pub(crate) fn refresh_ratio(&mut self) {
        if self.bytes_sent > 0 {
            self.compression_ratio = (self.bytes_sent + self.bytes_saved)
                as f64
                / self.bytes_sent as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_ratio_nothing_sent_keeps_previous() {
        let mut stats = SyncStatistics::default();
        stats.refresh_ratio();
        assert_eq!(stats.compression_ratio, 0.0);
    }

    #[test]
    fn test_refresh_ratio_counts_saved_bytes() {
        let mut stats = SyncStatistics::default();
        stats.record_full(100);
        stats.record_delta(20, 100);
        stats.refresh_ratio();

        assert_eq!(stats.bytes_sent, 120);
        assert_eq!(stats.bytes_saved, 80);
        assert!((stats.compression_ratio - 200.0 / 120.0).abs() < 1e-9);
    }
}
