//! Intentional packet loss for testing under lossy links.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::settings::{DropKind, DropPolicy};

/// Decides, per outbound packet, whether to discard it.
///
/// Deterministic mode drops the first `burst` packets of every period of
/// `round(burst / rate)` packets. Below a rate of 1 the period always leaves
/// at least one packet through. Probabilistic mode starts a burst with
/// probability `rate` whenever no burst is in progress.
#[derive(Debug)]
pub struct PacketScheduler {
    policy: DropPolicy,
    rng: StdRng,
    sent: u64,
    dropped: u64,
    burst_remaining: u32,
}

impl PacketScheduler {
    /// Scheduler for `policy`. A policy seed makes probabilistic runs repeatable.
    #[must_use]
    pub fn new(policy: DropPolicy) -> Self {
        let rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            policy,
            rng,
            sent: 0,
            dropped: 0,
            burst_remaining: 0,
        }
    }

    /// Replace the policy and reset counters.
    pub fn reset(&mut self, policy: DropPolicy) {
        *self = Self::new(policy);
    }

    /// Current policy.
    #[must_use]
    pub const fn policy(&self) -> &DropPolicy {
        &self.policy
    }

    /// Packets let through.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Packets discarded.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Consult the policy for the next packet. True means drop it.
    pub fn should_drop(&mut self) -> bool {
        let drop = self.decide();
        if drop {
            self.dropped += 1;
        } else {
            self.sent += 1;
        }
        drop
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn decide(&mut self) -> bool {
        let rate = self.policy.rate.clamp(0.0, 1.0);
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let burst = self.policy.burst.max(1);
        match self.policy.kind {
            DropKind::Deterministic => {
                let period = ((f64::from(burst) / rate).round() as u64).max(u64::from(burst) + 1);
                let position = (self.sent + self.dropped) % period;
                position < u64::from(burst)
            }
            DropKind::Probabilistic => {
                if self.burst_remaining > 0 {
                    self.burst_remaining -= 1;
                    return true;
                }
                if self.rng.random_bool(rate) {
                    self.burst_remaining = burst - 1;
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(scheduler: &mut PacketScheduler, n: usize) -> Vec<bool> {
        (0..n).map(|_| scheduler.should_drop()).collect()
    }

    #[test]
    fn test_inactive_policy_never_drops() {
        let mut scheduler = PacketScheduler::new(DropPolicy::none());
        assert!(pattern(&mut scheduler, 50).iter().all(|d| !d));
        assert_eq!(scheduler.sent(), 50);
    }

    #[test]
    fn test_deterministic_every_other() {
        let mut scheduler = PacketScheduler::new(DropPolicy::deterministic(0.5, 1));
        assert_eq!(
            pattern(&mut scheduler, 6),
            vec![true, false, true, false, true, false]
        );
    }

    #[test]
    fn test_deterministic_bursts() {
        let mut scheduler = PacketScheduler::new(DropPolicy::deterministic(0.25, 2));
        let drops = pattern(&mut scheduler, 16);
        assert_eq!(&drops[..8], &[true, true, false, false, false, false, false, false]);
        assert_eq!(scheduler.dropped(), 4);
    }

    #[test]
    fn test_high_rate_still_lets_packets_through() {
        let mut scheduler = PacketScheduler::new(DropPolicy::deterministic(0.9, 2));
        assert_eq!(pattern(&mut scheduler, 6), vec![true, true, false, true, true, false]);
        assert_eq!(scheduler.sent(), 2);
    }

    #[test]
    fn test_full_rate_drops_everything() {
        let mut scheduler = PacketScheduler::new(DropPolicy::probabilistic(1.0, 1));
        assert!(pattern(&mut scheduler, 20).iter().all(|d| *d));
    }

    #[test]
    fn test_probabilistic_rate_is_roughly_honoured() {
        let policy = DropPolicy::probabilistic(0.3, 1).with_seed(7);
        let mut scheduler = PacketScheduler::new(policy);
        let drops = pattern(&mut scheduler, 10_000).into_iter().filter(|d| *d).count();
        assert!((2_500..3_500).contains(&drops), "dropped {drops}");
    }

    #[test]
    fn test_probabilistic_bursts_are_contiguous() {
        let policy = DropPolicy::probabilistic(0.1, 3).with_seed(11);
        let mut scheduler = PacketScheduler::new(policy);
        let drops = pattern(&mut scheduler, 2_000);
        let mut run = 0;
        for d in drops {
            if d {
                run += 1;
            } else {
                if run > 0 {
                    assert!(run >= 3, "burst of {run}");
                }
                run = 0;
            }
        }
    }
}
