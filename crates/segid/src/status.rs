/// Represents the result of attempting to allocate an ID without waiting.
///
/// This type models the outcome of
/// [`SegmentIdGenerator::try_next_id`](crate::SegmentIdGenerator::try_next_id):
///
/// - [`IdGenStatus::Ready`] indicates an ID was taken from the active segment.
/// - [`IdGenStatus::Pending`] means the active segment is exhausted and the
///   standby segment has not been refilled yet.
///
/// This allows non-blocking allocation loops and custom backoff strategies.
///
/// # Example
///
/// ```
/// use segid::{GeneratorConfig, IdGenStatus, MemoryIdStore, SegmentIdGenerator};
///
/// let store = MemoryIdStore::new().with_tag("bookmark", 1000);
/// let generator = SegmentIdGenerator::new(store, GeneratorConfig::default()).unwrap();
///
/// match generator.try_next_id("bookmark").unwrap() {
///     IdGenStatus::Ready { id } => println!("ID: {id}"),
///     IdGenStatus::Pending { prefetching } => println!("waiting (refill running: {prefetching})"),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    /// A unique ID was allocated and is ready to use.
    Ready {
        /// The allocated ID.
        id: u64,
    },
    /// No ID could be allocated because both segments are drained.
    ///
    /// Back off briefly and retry; the standby segment becomes ready once the
    /// in-flight prefetch completes.
    Pending {
        /// Whether a prefetch for the standby segment is in flight.
        prefetching: bool,
    },
}
