//! Rough context-window accounting
//!
//! Tokens are estimated as `max(1, bytes / 4)` for every prompt sent and
//! every chunk of output read. The estimate only grows until `reset`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Estimate the token count of `bytes` bytes of text.
pub fn estimate_tokens(bytes: usize) -> u64 {
    ((bytes / 4) as u64).max(1)
}

/// Cumulative token estimate for one agent process
#[derive(Debug)]
pub struct ContextMonitor {
    estimated_tokens: AtomicU64,
    max_tokens: u64,
    compaction_threshold: f64,
}

impl ContextMonitor {
    /// `max_tokens == 0` disables usage reporting and compaction.
    pub fn new(max_tokens: u64, compaction_threshold: f64) -> Self {
        Self {
            estimated_tokens: AtomicU64::new(0),
            max_tokens,
            compaction_threshold,
        }
    }

    pub fn track_input(&self, bytes: usize) {
        self.estimated_tokens
            .fetch_add(estimate_tokens(bytes), Ordering::Relaxed);
    }

    pub fn track_output(&self, bytes: usize) {
        self.estimated_tokens
            .fetch_add(estimate_tokens(bytes), Ordering::Relaxed);
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.estimated_tokens.load(Ordering::Relaxed)
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    /// Usage in whole percent, clamped to 100.
    pub fn usage_percent(&self) -> u8 {
        if self.max_tokens == 0 {
            return 0;
        }
        let pct = self.estimated_tokens().saturating_mul(100) / self.max_tokens;
        pct.min(100) as u8
    }

    pub fn needs_compaction(&self) -> bool {
        if self.max_tokens == 0 {
            return false;
        }
        self.estimated_tokens() as f64 / self.max_tokens as f64 >= self.compaction_threshold
    }

    /// Forget everything counted so far (after a compaction restart).
    pub fn reset(&self) {
        self.estimated_tokens.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_minimum_one() {
        assert_eq!(estimate_tokens(0), 1);
        assert_eq!(estimate_tokens(3), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(9), 2);
        assert_eq!(estimate_tokens(400), 100);
    }

    #[test]
    fn test_tracking_accumulates() {
        let m = ContextMonitor::new(1000, 0.8);
        m.track_input(400);
        m.track_output(2);
        assert_eq!(m.estimated_tokens(), 101);
        assert_eq!(m.usage_percent(), 10);
    }

    #[test]
    fn test_usage_is_monotonic_until_reset() {
        let m = ContextMonitor::new(100, 0.8);
        let mut last = 0;
        for _ in 0..60 {
            m.track_output(16);
            let now = m.usage_percent();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 100);
        m.reset();
        assert_eq!(m.usage_percent(), 0);
        assert_eq!(m.estimated_tokens(), 0);
    }

    #[test]
    fn test_needs_compaction_at_threshold() {
        let m = ContextMonitor::new(100, 0.8);
        m.track_input(316); // 79 tokens
        assert!(!m.needs_compaction());
        m.track_input(4); // 80 tokens
        assert!(m.needs_compaction());
    }

    #[test]
    fn test_zero_max_tokens_disables() {
        let m = ContextMonitor::new(0, 0.8);
        m.track_input(1_000_000);
        assert_eq!(m.usage_percent(), 0);
        assert!(!m.needs_compaction());
    }
}
