use std::sync::Arc;

use crate::SegmentRange;

/// How far to bump a tag's max ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Bump by the step stored with the tag.
    Configured,
    /// Bump by an explicit step (adaptive step sizing).
    Custom(u64),
}

/// A range handed out by [`IdStore::bump_max_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The tag's max ID before the bump. First ID of the range.
    pub start: u64,
    /// The tag's max ID after the bump. Exclusive upper bound.
    pub end: u64,
    /// The step stored with the tag, regardless of the step actually used.
    pub configured_step: u64,
}

impl Allocation {
    /// The allocated IDs as a [`SegmentRange`].
    pub const fn range(&self) -> SegmentRange {
        SegmentRange::new(self.start, self.end)
    }
}

/// The persistent service that tracks the last issued max ID per business
/// tag.
///
/// Ranges are only ever obtained through [`IdStore::bump_max_id`], which must
/// be atomic: two concurrent bumps of the same tag (from this process or any
/// other) never return overlapping ranges. All methods are synchronous and may
/// block on I/O; the generator only calls them from the initialization path
/// and from prefetch tasks.
pub trait IdStore: Send + Sync + 'static {
    /// The store's own error type. Boxed into [`crate::Error`] as a `source`.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Atomically advances `tag`'s max ID and returns the leased range
    /// `[old_max, new_max)`.
    ///
    /// Returns `Ok(None)` if the tag does not exist.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the bump could not be performed. No range
    /// is consumed in that case.
    fn bump_max_id(&self, tag: &str, step: Step) -> Result<Option<Allocation>, Self::Error>;

    /// Lists every tag known to the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the listing failed.
    fn tags(&self) -> Result<Vec<String>, Self::Error>;

    /// The current max ID of `tag`, or `None` if the tag does not exist.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read failed.
    fn max_id(&self, tag: &str) -> Result<Option<u64>, Self::Error>;
}

impl<S> IdStore for Arc<S>
where
    S: IdStore + ?Sized,
{
    type Error = S::Error;

    fn bump_max_id(&self, tag: &str, step: Step) -> Result<Option<Allocation>, Self::Error> {
        (**self).bump_max_id(tag, step)
    }

    fn tags(&self) -> Result<Vec<String>, Self::Error> {
        (**self).tags()
    }

    fn max_id(&self, tag: &str) -> Result<Option<u64>, Self::Error> {
        (**self).max_id(tag)
    }
}
