use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{
    Result,
    lock::{self, RwLock, RwLockReadGuard, RwLockWriteGuard},
    segment::{Segment, SegmentRange},
};

/// Read guard over a buffer's [`BufferState`]. Held while serving IDs.
pub type StateReadGuard<'a> = RwLockReadGuard<'a, BufferState>;

/// Write guard over a buffer's [`BufferState`]. Held while swapping segments
/// or installing a freshly fetched range.
pub type StateWriteGuard<'a> = RwLockWriteGuard<'a, BufferState>;

/// The role a segment plays inside its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Slot {
    /// The segment IDs are currently served from.
    Active,
    /// The segment being refilled, or filled and waiting for the swap.
    Standby,
}

/// The double buffer of one tag: two segments, which one is active, and
/// whether the standby is ready.
///
/// Obtained through [`SegmentBuffer::read`]. Mutation is crate-internal and
/// requires the write lock.
#[derive(Debug, Default)]
pub struct BufferState {
    segments: [Segment; 2],
    current: usize,
    next_ready: bool,
    step: u64,
    min_step: u64,
    updated_at: u64,
}

impl BufferState {
    /// The active segment.
    #[inline]
    pub fn current_segment(&self) -> &Segment {
        &self.segments[self.current]
    }

    /// The segment playing `slot`.
    pub fn segment(&self, slot: Slot) -> &Segment {
        match slot {
            Slot::Active => &self.segments[self.current],
            Slot::Standby => &self.segments[self.next_segment_index()],
        }
    }

    /// Index (0 or 1) of the active segment.
    pub const fn current_index(&self) -> usize {
        self.current
    }

    /// Index (0 or 1) of the standby segment.
    pub const fn next_segment_index(&self) -> usize {
        (self.current + 1) % 2
    }

    /// Whether the standby segment holds a fresh range.
    pub const fn is_next_ready(&self) -> bool {
        self.next_ready
    }

    /// Step of the most recently fetched range.
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// The tag's configured step. The adaptive step never shrinks below it.
    pub const fn min_step(&self) -> u64 {
        self.min_step
    }

    /// Clock reading (milliseconds) of the most recent fetch.
    pub const fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Makes the standby segment active.
    pub(crate) fn switch_current_segment(&mut self) {
        self.current = self.next_segment_index();
    }

    pub(crate) fn set_next_ready(&mut self, ready: bool) {
        self.next_ready = ready;
    }

    /// Fills the active segment. Only used for the first range of a tag.
    pub(crate) fn fill_current(&mut self, range: SegmentRange, min_step: u64, at: u64) {
        self.segments[self.current].reset(range);
        self.record_fetch(range, min_step, at);
    }

    /// Fills the standby segment and marks it ready.
    pub(crate) fn fill_standby(&mut self, range: SegmentRange, min_step: u64, at: u64) {
        let next = self.next_segment_index();
        self.segments[next].reset(range);
        self.record_fetch(range, min_step, at);
        self.next_ready = true;
    }

    fn record_fetch(&mut self, range: SegmentRange, min_step: u64, at: u64) {
        self.step = range.len();
        self.min_step = min_step;
        self.updated_at = at;
    }

    fn snapshot_segment(&self, index: usize) -> SegmentSnapshot {
        let segment = &self.segments[index];
        SegmentSnapshot {
            cursor: segment.cursor(),
            max: segment.max(),
            step: segment.step(),
        }
    }
}

/// Proof of holding a tag's prefetch guard.
///
/// Carries the start time of the prefetch (plus one, so zero can mean idle).
/// A buffer only accepts a range from the task whose lease is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease(u64);

impl Lease {
    /// Clock reading (milliseconds) at which the prefetch started.
    pub const fn started_at(self) -> u64 {
        self.0 - 1
    }
}

const IDLE: u64 = 0;

/// At most one in-flight prefetch per tag.
///
/// The guard stores the lease stamp of the running prefetch. A stamp older
/// than the prefetch timeout is considered stuck and may be taken over, so a
/// hung store call cannot disable prefetching for a tag forever.
#[derive(Debug, Default)]
struct PrefetchGuard {
    stamp: AtomicU64,
}

impl PrefetchGuard {
    fn try_acquire(&self, now: u64, timeout_ms: u64) -> Option<Lease> {
        let current = self.stamp.load(Ordering::Acquire);
        if current != IDLE {
            let started = current - 1;
            if now.saturating_sub(started) < timeout_ms {
                return None;
            }
            #[cfg(feature = "tracing")]
            tracing::warn!(
                started,
                now,
                "prefetch exceeded its timeout, reclaiming the guard"
            );
        }
        let stamp = now.saturating_add(1);
        self.stamp
            .compare_exchange(current, stamp, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Lease(stamp))
    }

    fn holds(&self, lease: Lease) -> bool {
        self.stamp.load(Ordering::Acquire) == lease.0
    }

    fn release(&self, lease: Lease) -> bool {
        self.stamp
            .compare_exchange(lease.0, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_held(&self) -> bool {
        self.stamp.load(Ordering::Acquire) != IDLE
    }
}

/// The double buffer serving one business tag.
///
/// Holds two [`Segment`]s behind a single reader/writer lock: the read lock is
/// held while an ID is taken from the active segment, the write lock while the
/// segments are swapped or a fetched range is installed. The `initialized`
/// flag and the prefetch guard live outside the lock so the hot path can check
/// them cheaply.
#[derive(Debug)]
pub struct SegmentBuffer {
    tag: String,
    state: RwLock<BufferState>,
    initialized: AtomicBool,
    prefetch: PrefetchGuard,
}

impl SegmentBuffer {
    /// Creates an uninitialized buffer with two empty segments.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            state: RwLock::new(BufferState::default()),
            initialized: AtomicBool::new(false),
            prefetch: PrefetchGuard::default(),
        }
    }

    /// The business tag this buffer serves.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Whether the first range has been fetched.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Acquires the read lock on the segment state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`](crate::Error) if a thread panicked while
    /// holding the lock (std locks only).
    pub fn read(&self) -> Result<StateReadGuard<'_>> {
        lock::read(&self.state)
    }

    pub(crate) fn write(&self) -> Result<StateWriteGuard<'_>> {
        lock::write(&self.state)
    }

    /// Whether the standby segment is filled and waiting for the swap.
    ///
    /// # Errors
    ///
    /// See [`SegmentBuffer::read`].
    pub fn is_next_ready(&self) -> Result<bool> {
        Ok(self.read()?.is_next_ready())
    }

    /// Whether a prefetch holds the guard (possibly a stuck one).
    pub fn is_prefetching(&self) -> bool {
        self.prefetch.is_held()
    }

    pub(crate) fn try_begin_prefetch(&self, now: u64, timeout_ms: u64) -> Option<Lease> {
        self.prefetch.try_acquire(now, timeout_ms)
    }

    pub(crate) fn holds_lease(&self, lease: Lease) -> bool {
        self.prefetch.holds(lease)
    }

    pub(crate) fn end_prefetch(&self, lease: Lease) -> bool {
        self.prefetch.release(lease)
    }

    /// A consistent view of the buffer for monitoring.
    ///
    /// # Errors
    ///
    /// See [`SegmentBuffer::read`].
    pub fn snapshot(&self) -> Result<BufferSnapshot> {
        let state = self.read()?;
        Ok(BufferSnapshot {
            tag: self.tag.clone(),
            initialized: self.is_initialized(),
            next_ready: state.is_next_ready(),
            current_index: state.current_index(),
            prefetching: self.is_prefetching(),
            step: state.step(),
            min_step: state.min_step(),
            updated_at: state.updated_at(),
            segments: [state.snapshot_segment(0), state.snapshot_segment(1)],
        })
    }
}

/// Monitoring view of one [`Segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentSnapshot {
    /// Next ID to be served (may exceed `max` once exhausted).
    pub cursor: u64,
    /// Exclusive upper bound.
    pub max: u64,
    /// Size of the range.
    pub step: u64,
}

/// Monitoring view of one [`SegmentBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferSnapshot {
    /// The business tag.
    pub tag: String,
    /// Whether the first range has been fetched.
    pub initialized: bool,
    /// Whether the standby segment is ready.
    pub next_ready: bool,
    /// Index of the active segment.
    pub current_index: usize,
    /// Whether a prefetch holds the guard.
    pub prefetching: bool,
    /// Step of the most recent fetch.
    pub step: u64,
    /// The tag's configured step.
    pub min_step: u64,
    /// Clock reading of the most recent fetch.
    pub updated_at: u64,
    /// Both segments, by index.
    pub segments: [SegmentSnapshot; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_empty_and_uninitialized() {
        let buffer = SegmentBuffer::new("bookmark");
        assert_eq!(buffer.tag(), "bookmark");
        assert!(!buffer.is_initialized());
        assert!(!buffer.is_prefetching());

        let state = buffer.read().unwrap();
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.next_segment_index(), 1);
        assert!(!state.is_next_ready());
        assert!(state.current_segment().is_exhausted());
        assert!(state.segment(Slot::Standby).is_exhausted());
    }

    #[test]
    fn standby_swap_alternates_between_slots() {
        let buffer = SegmentBuffer::new("bookmark");
        let mut state = buffer.write().unwrap();
        state.fill_current(SegmentRange::new(0, 5), 5, 1);
        state.fill_standby(SegmentRange::new(5, 10), 5, 2);
        assert!(state.is_next_ready());
        assert_eq!(state.segment(Slot::Standby).cursor(), 5);

        state.switch_current_segment();
        state.set_next_ready(false);
        assert_eq!(state.current_index(), 1);
        assert_eq!(state.current_segment().cursor(), 5);
        assert_eq!(state.segment(Slot::Standby).max(), 5);

        state.switch_current_segment();
        assert_eq!(state.current_index(), 0);
    }

    #[test]
    fn fill_records_step_bookkeeping() {
        let buffer = SegmentBuffer::new("comment");
        let mut state = buffer.write().unwrap();
        state.fill_current(SegmentRange::new(100, 200), 50, 7);
        assert_eq!(state.step(), 100);
        assert_eq!(state.min_step(), 50);
        assert_eq!(state.updated_at(), 7);
        assert!(!state.is_next_ready());
    }

    #[test]
    fn prefetch_guard_admits_one_task() {
        let buffer = SegmentBuffer::new("bookmark");
        let lease = buffer.try_begin_prefetch(10, 1_000).unwrap();
        assert!(buffer.is_prefetching());
        assert!(buffer.try_begin_prefetch(11, 1_000).is_none());
        assert!(buffer.holds_lease(lease));
        assert_eq!(lease.started_at(), 10);

        assert!(buffer.end_prefetch(lease));
        assert!(!buffer.is_prefetching());
        assert!(buffer.try_begin_prefetch(12, 1_000).is_some());
    }

    #[test]
    fn stuck_prefetch_lease_is_reclaimed_after_timeout() {
        let buffer = SegmentBuffer::new("bookmark");
        let stuck = buffer.try_begin_prefetch(0, 100).unwrap();
        assert!(buffer.try_begin_prefetch(99, 100).is_none());

        let fresh = buffer.try_begin_prefetch(100, 100).unwrap();
        assert_ne!(stuck, fresh);
        assert!(!buffer.holds_lease(stuck));
        assert!(buffer.holds_lease(fresh));

        // The stale task finishing late must not clear the new lease.
        assert!(!buffer.end_prefetch(stuck));
        assert!(buffer.is_prefetching());
        assert!(buffer.end_prefetch(fresh));
    }

    #[test]
    fn snapshot_reflects_state() {
        let buffer = SegmentBuffer::new("bookmark");
        {
            let mut state = buffer.write().unwrap();
            state.fill_current(SegmentRange::new(0, 10), 10, 3);
        }
        buffer.mark_initialized();
        buffer.read().unwrap().current_segment().next_id();

        let snapshot = buffer.snapshot().unwrap();
        assert_eq!(snapshot.tag, "bookmark");
        assert!(snapshot.initialized);
        assert!(!snapshot.next_ready);
        assert_eq!(snapshot.current_index, 0);
        assert_eq!(
            snapshot.segments[0],
            SegmentSnapshot {
                cursor: 1,
                max: 10,
                step: 10
            }
        );
        assert_eq!(snapshot.segments[1].max, 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn snapshot_serializes_to_json() {
        let buffer = SegmentBuffer::new("bookmark");
        let json = serde_json::to_value(buffer.snapshot().unwrap()).unwrap();
        assert_eq!(json["tag"], "bookmark");
        assert_eq!(json["initialized"], false);
        assert_eq!(json["segments"].as_array().unwrap().len(), 2);

        let back: BufferSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, buffer.snapshot().unwrap());
    }
}
