use portable_atomic::{AtomicU64, Ordering};

/// A half-open range of IDs, `[start, end)`, leased from the ID store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentRange {
    /// First ID of the range (the store's max ID before the bump).
    pub start: u64,
    /// Exclusive upper bound (the store's max ID after the bump).
    pub end: u64,
}

impl SegmentRange {
    /// Creates a range. `end` is exclusive.
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of IDs in the range.
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if the range holds no IDs.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An allocatable range `[cursor, max)` with an atomic cursor.
///
/// Serving an ID is a single `fetch_add` on the cursor, so many threads can
/// draw from the same segment while holding only the owning buffer's read
/// lock. The cursor may run past `max`, and wraps at `u64::MAX`; the caller
/// checks every returned ID with [`Segment::contains`].
///
/// `start`, `max` and `step` only change through `&mut self`, i.e. while the owning
/// [`SegmentBuffer`](crate::SegmentBuffer)'s write lock is held.
#[derive(Debug, Default)]
pub struct Segment {
    #[cfg(feature = "cache-padded")]
    cursor: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    cursor: AtomicU64,
    start: u64,
    max: u64,
    step: u64,
}

impl Segment {
    /// Creates a segment serving `range`.
    pub fn from_range(range: SegmentRange) -> Self {
        let mut segment = Self::default();
        segment.reset(range);
        segment
    }

    /// Takes the next ID: increments the cursor and returns its previous
    /// value.
    ///
    /// There is no bounds check. A value outside the range (see
    /// [`contains`](Self::contains)) means the segment is exhausted and must
    /// not be handed out.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.cursor.fetch_add(1, Ordering::Relaxed)
    }

    /// Point-in-time number of IDs left, `max - cursor`.
    ///
    /// The value is racy under concurrent consumption. It only decides *when*
    /// to prefetch, never whether an ID is valid, so it is read without
    /// synchronizing with other consumers.
    #[inline]
    pub fn remaining(&self) -> u64 {
        let cursor = self.cursor.load(Ordering::Relaxed);
        if cursor < self.start {
            // Wrapped past u64::MAX.
            return 0;
        }
        self.max.saturating_sub(cursor)
    }

    /// Returns `true` if `id`, as returned by [`next_id`](Self::next_id), lies
    /// within `[start, max)` and may be handed out.
    ///
    /// A cursor that wrapped past `u64::MAX` yields IDs below `start`, which
    /// are rejected.
    #[inline]
    pub const fn contains(&self, id: u64) -> bool {
        self.start <= id && id < self.max
    }

    /// Returns `true` once every ID of the range has been taken.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Current cursor, the next ID to be served if it is below `max`.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// First ID of the range.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive upper bound of the range.
    pub const fn max(&self) -> u64 {
        self.max
    }

    /// Size of the range this segment was filled with.
    pub const fn step(&self) -> u64 {
        self.step
    }

    pub(crate) fn reset(&mut self, range: SegmentRange) {
        *self.cursor.get_mut() = range.start;
        self.start = range.start;
        self.max = range.end;
        self.step = range.len();
    }
}
