use core::time::Duration;

use crate::{Error, Result};

/// Backoff strategies for waiting on a standby segment.
///
/// When the active segment is exhausted before the background prefetch has
/// filled the standby, [`SegmentIdGenerator::next_id`] waits using one of
/// these strategies between retries.
///
/// [`SegmentIdGenerator::next_id`]: crate::SegmentIdGenerator::next_id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Busy-waits in a tight loop.
    ///
    /// Offers the lowest latency at the cost of high CPU usage.
    Spin,

    /// Yields to the OS scheduler to allow other threads to run.
    ///
    /// More CPU-friendly than spinning, but may still busy-wait if no other
    /// threads are ready.
    Yield,

    /// Sleeps for [`GeneratorConfig::retry_interval`].
    ///
    /// Lowest CPU usage, but may oversleep depending on platform-specific
    /// scheduler resolution.
    #[default]
    Sleep,
}

impl Backoff {
    /// Blocks the current thread once according to the strategy.
    pub fn wait(self, interval: Duration) {
        match self {
            Self::Spin => core::hint::spin_loop(),
            Self::Yield => std::thread::yield_now(),
            Self::Sleep => std::thread::sleep(interval),
        }
    }
}

/// Step adaptation driven by how quickly segments are consumed.
///
/// On every prefetch the generator compares the time since the previous fetch
/// with `segment_duration`:
///
/// - faster than `segment_duration`: the step doubles (capped at `max_step`)
/// - between one and two `segment_duration`s: the step is kept
/// - slower: the step halves, never below the tag's configured step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveStep {
    /// Target lifetime of one segment.
    pub segment_duration: Duration,
    /// Upper bound for the adapted step.
    pub max_step: u64,
}

impl Default for AdaptiveStep {
    fn default() -> Self {
        Self {
            segment_duration: Duration::from_secs(15 * 60),
            max_step: 1_000_000,
        }
    }
}

impl AdaptiveStep {
    /// Computes the step for the next fetch.
    ///
    /// `current` is the step of the last fetched segment, `min_step` the
    /// tag's configured step and `elapsed` the time since the last fetch.
    pub fn next_step(&self, current: u64, min_step: u64, elapsed: Duration) -> u64 {
        if elapsed < self.segment_duration {
            match current.checked_mul(2) {
                Some(doubled) if doubled <= self.max_step => doubled,
                _ => current,
            }
        } else if elapsed < self.segment_duration.saturating_mul(2) {
            current
        } else {
            (current / 2).max(min_step)
        }
    }
}

/// Tuning knobs for a [`SegmentIdGenerator`](crate::SegmentIdGenerator).
///
/// The defaults favor prefetching early so that callers almost never block on
/// the ID store.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Fraction of a segment's step that may remain before the standby
    /// segment is prefetched.
    ///
    /// A prefetch is scheduled once `remaining <= step * low_water_ratio`.
    /// The default of `0.9` refills as soon as 10% of a segment is consumed;
    /// `0.1` waits until only 10% remain. Must be within `0.0..=1.0`.
    pub low_water_ratio: f64,

    /// How long a prefetch may run before its guard is considered stuck and
    /// may be reclaimed by a new prefetch. The stuck task's range, if it ever
    /// arrives, is discarded.
    pub prefetch_timeout: Duration,

    /// How long [`next_id`](crate::SegmentIdGenerator::next_id) waits for the
    /// standby segment when the active one is exhausted.
    pub exhaustion_timeout: Duration,

    /// Strategy used between retries while waiting for the standby segment.
    pub backoff: Backoff,

    /// Sleep duration of [`Backoff::Sleep`] and of the async sleep providers.
    pub retry_interval: Duration,

    /// Number of threads in the default prefetch [`ThreadPool`].
    ///
    /// [`ThreadPool`]: crate::ThreadPool
    pub prefetch_workers: usize,

    /// Enables step adaptation. `None` fetches the configured step every time.
    pub adaptive_step: Option<AdaptiveStep>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            low_water_ratio: 0.9,
            prefetch_timeout: Duration::from_secs(30),
            exhaustion_timeout: Duration::from_secs(1),
            backoff: Backoff::Sleep,
            retry_interval: Duration::from_millis(1),
            prefetch_workers: 5,
            adaptive_step: None,
        }
    }
}

impl GeneratorConfig {
    /// The remaining-ID threshold at or below which a segment of `step` IDs
    /// triggers a prefetch.
    pub fn low_water_mark(&self, step: u64) -> u64 {
        // Float rounding is fine for a heuristic threshold.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let mark = (step as f64 * self.low_water_ratio) as u64;
        mark
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first rejected setting.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.low_water_ratio) {
            return Err(Error::invalid_config(format!(
                "low_water_ratio must be within 0.0..=1.0, got {}",
                self.low_water_ratio
            )));
        }
        if self.prefetch_timeout < Duration::from_millis(1) {
            return Err(Error::invalid_config(
                "prefetch_timeout must be at least 1ms",
            ));
        }
        if self.prefetch_workers == 0 {
            return Err(Error::invalid_config(
                "prefetch_workers must be greater than 0",
            ));
        }
        if let Some(adaptive) = &self.adaptive_step {
            if adaptive.max_step == 0 {
                return Err(Error::invalid_config("max_step must be greater than 0"));
            }
            if adaptive.segment_duration.is_zero() {
                return Err(Error::invalid_config(
                    "segment_duration must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}
