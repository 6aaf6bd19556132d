use crate::message::RangeStats;

/// `true` when the range carries at least `min_messages` messages from at
/// least `min_unique_users` distinct authors.
pub fn meets_threshold(stats: &RangeStats, min_messages: usize, min_unique_users: usize) -> bool {
    stats.message_count >= min_messages && stats.unique_user_count >= min_unique_users
}

/// Minimum-evidence thresholds for a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityGate {
    pub min_messages: usize,
    pub min_unique_users: usize,
}

impl ActivityGate {
    pub fn new(min_messages: usize, min_unique_users: usize) -> Self {
        Self {
            min_messages,
            min_unique_users,
        }
    }

    pub fn passes(&self, stats: &RangeStats) -> bool {
        meets_threshold(stats, self.min_messages, self.min_unique_users)
    }

    /// Reason attached to an insufficient digest.
    pub fn shortfall(&self, stats: &RangeStats) -> String {
        format!(
            "not enough activity: {} messages from {} participants (need at least {} messages from {} participants)",
            stats.message_count, stats.unique_user_count, self.min_messages, self.min_unique_users
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(messages: usize, users: usize) -> RangeStats {
        RangeStats {
            message_count: messages,
            unique_user_count: users,
            first_ts: None,
            last_ts: None,
        }
    }

    #[test]
    fn passes_at_exact_thresholds() {
        assert!(meets_threshold(&stats(5, 2), 5, 2));
        assert!(!meets_threshold(&stats(4, 2), 5, 2));
        assert!(!meets_threshold(&stats(5, 1), 5, 2));
    }

    #[test]
    fn too_few_messages_fails_regardless_of_users() {
        for users in [0, 1, 2, 10, 1_000] {
            assert!(!meets_threshold(&stats(3, users), 4, 1));
        }
    }

    #[test]
    fn monotonic_in_both_counters() {
        let (min_m, min_u) = (6, 3);
        for m in 0..15 {
            for u in 0..8 {
                if meets_threshold(&stats(m, u), min_m, min_u) {
                    assert!(meets_threshold(&stats(m + 1, u), min_m, min_u));
                    assert!(meets_threshold(&stats(m, u + 1), min_m, min_u));
                }
            }
        }
    }

    #[test]
    fn zero_thresholds_accept_empty_range() {
        assert!(meets_threshold(&stats(0, 0), 0, 0));
    }

    #[test]
    fn shortfall_mentions_counts() {
        let gate = ActivityGate::new(5, 2);
        let reason = gate.shortfall(&stats(3, 1));
        assert!(reason.contains("3 messages from 1 participants"));
        assert!(!gate.passes(&stats(3, 1)));
    }
}
