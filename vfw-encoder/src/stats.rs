use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the steady-state errors the pipeline absorbs.
#[derive(Debug, Default)]
pub struct PipelineStats {
    submitted: AtomicU64,
    admission_drops: AtomicU64,
    codec_failures: AtomicU64,
    delivered: AtomicU64,
}

impl PipelineStats {
    pub fn record_submitted(&self) -> u64 {
        self.submitted.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the running total, for throttled logging.
    pub fn record_admission_drop(&self) -> u64 {
        self.admission_drops.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_codec_failure(&self) -> u64 {
        self.codec_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_delivered(&self) -> u64 {
        self.delivered.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            admission_drops: self.admission_drops.load(Ordering::Relaxed),
            codec_failures: self.codec_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub admission_drops: u64,
    pub codec_failures: u64,
    pub delivered: u64,
}

impl Display for StatsSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "submitted: {}, delivered: {}, admission drops: {}, codec failures: {}",
            self.submitted, self.delivered, self.admission_drops, self.codec_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = PipelineStats::default();
        assert_eq!(stats.record_submitted(), 1);
        assert_eq!(stats.record_submitted(), 2);
        assert_eq!(stats.record_admission_drop(), 1);
        stats.record_codec_failure();
        stats.record_delivered();

        let snap = stats.snapshot();
        assert_eq!(
            snap,
            StatsSnapshot {
                submitted: 2,
                admission_drops: 1,
                codec_failures: 1,
                delivered: 1,
            }
        );
        assert_eq!(
            snap.to_string(),
            "submitted: 2, delivered: 1, admission drops: 1, codec failures: 1"
        );
    }
}
