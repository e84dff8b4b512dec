use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// A trait for time sources that return a millisecond timestamp.
///
/// The generator reads the clock to stamp prefetch leases (so a stuck prefetch
/// can be detected) and to measure how fast segments are consumed when the
/// adaptive step is enabled. Plug in a mocked time source in tests.
///
/// # Example
///
/// ```
/// use segid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the clock's origin.
    fn current_millis(&self) -> u64;
}

impl<C> TimeSource for Arc<C>
where
    C: TimeSource + ?Sized,
{
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// A monotonic time source anchored to the Unix epoch.
///
/// The wall-clock offset is captured once at construction. Every later
/// reading adds the time elapsed on a monotonic [`Instant`], so readings never
/// go backward even if the system clock is adjusted (e.g., by NTP).
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
    epoch_offset: u64, // in milliseconds
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::with_epoch(Duration::ZERO)
    }
}

impl MonotonicClock {
    /// Constructs a monotonic clock whose zero point is `epoch`, given as a
    /// [`Duration`] since 1970-01-01 UTC.
    ///
    /// If the system time is earlier than `epoch` the clock starts at zero.
    pub fn with_epoch(epoch: Duration) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let offset = now.saturating_sub(epoch);
        Self {
            start: Instant::now(),
            epoch_offset: u64::try_from(offset.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.epoch_offset.saturating_add(elapsed)
    }
}
