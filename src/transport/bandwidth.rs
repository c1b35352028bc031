//! Sliding-window bandwidth accounting and send-side shaping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::filters::RecordBatch;

/// Default averaging window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Byte counter over a sliding time window.
#[derive(Debug)]
pub struct BandwidthMonitor {
    window: Duration,
    events: Mutex<VecDeque<(Instant, usize)>>,
}

impl Default for BandwidthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl BandwidthMonitor {
    /// Monitor with the given window. Zero windows are raised to one second.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let window = if window.is_zero() {
            Duration::from_secs(1)
        } else {
            window
        };
        Self {
            window,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record `bytes` at the current instant.
    pub fn add(&self, bytes: usize) {
        self.add_at(Instant::now(), bytes);
    }

    fn add_at(&self, at: Instant, bytes: usize) {
        let mut events = self.events.lock();
        Self::expire(&mut events, at, self.window);
        events.push_back((at, bytes));
    }

    fn expire(events: &mut VecDeque<(Instant, usize)>, now: Instant, window: Duration) {
        while let Some((at, _)) = events.front() {
            if now.duration_since(*at) > window {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes seen inside the window.
    #[must_use]
    pub fn bytes_in_window(&self) -> u64 {
        let mut events = self.events.lock();
        Self::expire(&mut events, Instant::now(), self.window);
        events.iter().map(|(_, b)| *b as u64).sum()
    }

    /// Average bytes per second over the window.
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        let secs = self.window.as_secs().max(1);
        self.bytes_in_window() / secs
    }

    /// Forget all samples.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Drop the least valuable records until the batch fits `budget` bytes.
///
/// Victims go in order of ascending quality, then ascending clock, then
/// batch position. Greedy: a record is removed whole even if a smaller
/// removal would have sufficed. Returns the number of records dropped.
pub(crate) fn shape(
    batch: &mut RecordBatch,
    budget: u64,
    overhead: usize,
    entry_len: impl Fn(&str, &crate::Record) -> usize,
) -> usize {
    let sizes: Vec<usize> = batch.iter().map(|(k, r)| entry_len(k, r)).collect();
    let mut total = sizes
        .iter()
        .fold(overhead as u64, |acc, &size| acc.saturating_add(size as u64));
    if total <= budget {
        return 0;
    }

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    let entries = batch.entries();
    order.sort_by_key(|&i| (entries[i].1.quality, entries[i].1.clock, i));

    let mut victims = vec![false; sizes.len()];
    let mut dropped = 0;
    for i in order {
        if total <= budget {
            break;
        }
        victims[i] = true;
        total = total.saturating_sub(sizes[i] as u64);
        dropped += 1;
    }

    let mut idx = 0;
    batch.retain(|key, _| {
        let keep = !victims[idx];
        if !keep {
            debug!(key, "bandwidth limit dropped record");
        }
        idx += 1;
        keep
    });
    dropped
}
