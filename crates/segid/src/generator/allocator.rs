use core::fmt;
use std::{sync::Arc, time::Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    BufferSnapshot, Error, Executor, GeneratorConfig, IdGenStatus, IdStore, MonotonicClock, Result,
    SegmentBuffer, Step, TagRegistry, TagSync, Task, ThreadPool, TimeSource,
    generator::prefetch::Shared,
};

/// A double-buffered, store-backed ID generator.
///
/// Each business tag gets a [`SegmentBuffer`] holding two segments leased from
/// the [`IdStore`]. IDs are served from the active segment with a single
/// atomic increment under a read lock. Once the active segment drops to the
/// low-water mark, a prefetch fills the standby segment on the [`Executor`],
/// so the store is off the request path except for the first request of a tag
/// and the rare case where a segment is drained before its successor arrived.
///
/// IDs are unique and increase per tag within a process. They are not
/// contiguous: ranges left unused at shutdown, or discarded by an expired
/// prefetch, are never handed out again.
///
/// The generator is cheap to clone; clones share the registry, store and
/// executor.
///
/// ## Recommended When
/// - IDs must be unique across processes sharing one store
/// - Short, increasing integers are preferred over time-based IDs
/// - The store round-trip must stay off the hot path
///
/// # Example
///
/// ```
/// use segid::{GeneratorConfig, MemoryIdStore, SegmentIdGenerator};
///
/// let store = MemoryIdStore::new().with_tag("bookmark", 5);
/// let generator = SegmentIdGenerator::new(store, GeneratorConfig::default()).unwrap();
///
/// let ids: Vec<u64> = (0..5).map(|_| generator.next_id("bookmark").unwrap()).collect();
/// assert_eq!(ids, [0, 1, 2, 3, 4]);
/// assert_eq!(generator.next_id("bookmark").unwrap(), 5);
/// ```
pub struct SegmentIdGenerator<S, E = ThreadPool, T = MonotonicClock>
where
    S: IdStore,
    E: Executor,
    T: TimeSource + Send + Sync + 'static,
{
    shared: Arc<Shared<S, T>>,
    executor: Arc<E>,
}

impl<S> SegmentIdGenerator<S>
where
    S: IdStore,
{
    /// Creates a generator that prefetches on a [`ThreadPool`] of
    /// `config.prefetch_workers` threads.
    ///
    /// No store call is made; tags are registered lazily on first use or by
    /// [`init`](Self::init).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` is rejected and
    /// [`Error::Executor`] if the worker threads cannot be spawned.
    pub fn new(store: S, config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPool::new(config.prefetch_workers)?;
        Self::from_parts(store, pool, MonotonicClock::default(), config)
    }
}

impl<S, E> SegmentIdGenerator<S, E>
where
    S: IdStore,
    E: Executor,
{
    /// Creates a generator that prefetches on `executor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` is rejected.
    pub fn with_executor(store: S, executor: E, config: GeneratorConfig) -> Result<Self> {
        Self::from_parts(store, executor, MonotonicClock::default(), config)
    }
}

impl<S, E, T> SegmentIdGenerator<S, E, T>
where
    S: IdStore,
    E: Executor,
    T: TimeSource + Send + Sync + 'static,
{
    /// Creates a generator from explicit parts.
    ///
    /// The `clock` stamps prefetch leases and measures segment consumption
    /// for [`AdaptiveStep`](crate::AdaptiveStep). Plug in a mock to test
    /// timeouts deterministically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` is rejected.
    pub fn from_parts(store: S, executor: E, clock: T, config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                registry: TagRegistry::new(),
                config,
                clock,
            }),
            executor: Arc::new(executor),
        })
    }

    /// Warms up the registry with every tag the store knows.
    ///
    /// Buffers are created uninitialized; the first range of each tag is still
    /// fetched on its first request. Returns the number of registered tags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TagScan`] if the store cannot list its tags.
    pub fn init(&self) -> Result<usize> {
        self.refresh_tags()?;
        let count = self.shared.registry.len();
        #[cfg(feature = "tracing")]
        tracing::info!(tags = count, "segment id generator initialized");
        Ok(count)
    }

    /// Mirrors the store's tag list: registers new tags and drops buffers of
    /// tags deleted from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TagScan`] if the store cannot list its tags. The
    /// registry is left untouched in that case.
    pub fn refresh_tags(&self) -> Result<TagSync> {
        let registered = self.shared.registry.buffers();
        let tags = self.shared.store.tags().map_err(Error::tag_scan)?;
        let sync = self.shared.registry.sync(&registered, &tags);
        #[cfg(feature = "tracing")]
        if !sync.is_unchanged() {
            tracing::info!(added = ?sync.added, removed = ?sync.removed, "synchronized business tags");
        }
        Ok(sync)
    }

    /// Returns the next ID for `tag`, waiting for the standby segment if the
    /// active one is drained.
    ///
    /// The wait uses [`GeneratorConfig::backoff`] and gives up after
    /// [`GeneratorConfig::exhaustion_timeout`].
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownTag`] if the store does not know `tag`
    /// - [`Error::StoreUnavailable`] if the first range cannot be fetched
    /// - [`Error::SegmentsNotReady`] if the standby did not arrive in time
    /// - [`Error::LockPoisoned`] (std locks only)
    pub fn next_id(&self, tag: &str) -> Result<u64> {
        let buffer = self.initialize(tag)?;
        let config = &self.shared.config;
        let mut started: Option<Instant> = None;
        loop {
            match self.try_next_from(&buffer)? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { .. } => {
                    let waited = started.get_or_insert_with(Instant::now).elapsed();
                    if waited >= config.exhaustion_timeout {
                        return Err(Self::cold_not_ready(tag, waited));
                    }
                    config.backoff.wait(config.retry_interval);
                }
            }
        }
    }

    /// Attempts to take the next ID for `tag` without waiting on the store.
    ///
    /// Returns [`IdGenStatus::Pending`] if both segments are drained, after
    /// making sure a prefetch is in flight. The first call for a tag still
    /// blocks on the store to fetch the initial range.
    ///
    /// # Errors
    ///
    /// Same as [`next_id`](Self::next_id), except
    /// [`Error::SegmentsNotReady`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_next_id(&self, tag: &str) -> Result<IdGenStatus> {
        let buffer = self.initialize(tag)?;
        self.try_next_from(&buffer)
    }

    /// Resolves `tag` and fetches its first range if that has not happened
    /// yet. Returns the tag's buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTag`] or [`Error::StoreUnavailable`]; the
    /// buffer stays uninitialized and the next call retries.
    pub fn initialize(&self, tag: &str) -> Result<Arc<SegmentBuffer>> {
        let buffer = self.resolve(tag)?;
        if !buffer.is_initialized() {
            self.cold_initialize(&buffer)?;
        }
        Ok(buffer)
    }

    /// The store's current max ID for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the store read fails.
    pub fn max_id(&self, tag: &str) -> Result<Option<u64>> {
        self.shared
            .store
            .max_id(tag)
            .map_err(|e| Error::store(tag, e))
    }

    /// The registered buffer of `tag`, if any.
    pub fn buffer(&self, tag: &str) -> Option<Arc<SegmentBuffer>> {
        self.shared.registry.get(tag)
    }

    /// Snapshots of every registered buffer, sorted by tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] (std locks only).
    pub fn snapshots(&self) -> Result<Vec<BufferSnapshot>> {
        self.shared
            .registry
            .buffers()
            .iter()
            .map(|buffer| buffer.snapshot())
            .collect()
    }

    /// The registry of tag buffers.
    pub fn registry(&self) -> &TagRegistry {
        &self.shared.registry
    }

    /// The backing ID store.
    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// The generator's settings.
    pub fn config(&self) -> &GeneratorConfig {
        &self.shared.config
    }

    /// The executor running prefetches.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Finds `tag`'s buffer, registering it if the store knows the tag.
    fn resolve(&self, tag: &str) -> Result<Arc<SegmentBuffer>> {
        if let Some(buffer) = self.shared.registry.get(tag) {
            return Ok(buffer);
        }
        match self.shared.store.max_id(tag) {
            Ok(Some(_)) => Ok(self.shared.registry.get_or_register(tag)),
            Ok(None) => Err(Error::unknown_tag(tag)),
            Err(e) => Err(Error::store(tag, e)),
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_initialize(&self, buffer: &SegmentBuffer) -> Result<()> {
        let mut state = buffer.write()?;
        if buffer.is_initialized() {
            return Ok(());
        }
        let allocation = self.shared.fetch(buffer.tag(), Step::Configured)?;
        state.fill_current(
            allocation.range(),
            allocation.configured_step,
            self.shared.now(),
        );
        buffer.mark_initialized();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            tag = buffer.tag(),
            start = allocation.start,
            end = allocation.end,
            "initialized segment buffer"
        );
        Ok(())
    }

    #[cold]
    #[inline(never)]
    fn cold_not_ready(tag: &str, waited: core::time::Duration) -> Error {
        #[cfg(feature = "tracing")]
        tracing::warn!(tag, ?waited, "both segments exhausted, standby not ready");
        Error::SegmentsNotReady {
            tag: tag.to_owned(),
            waited,
        }
    }

    pub(crate) fn try_next_from(&self, buffer: &Arc<SegmentBuffer>) -> Result<IdGenStatus> {
        loop {
            {
                let state = buffer.read()?;
                let segment = state.current_segment();
                if !state.is_next_ready()
                    && segment.remaining() <= self.shared.config.low_water_mark(segment.step())
                {
                    self.schedule_prefetch(buffer);
                }
                let id = segment.next_id();
                if segment.contains(id) {
                    return Ok(IdGenStatus::Ready { id });
                }
            }

            // Drained: swap under the write lock, unless someone already did.
            let mut state = buffer.write()?;
            let id = state.current_segment().next_id();
            if state.current_segment().contains(id) {
                return Ok(IdGenStatus::Ready { id });
            }
            if state.is_next_ready() {
                state.switch_current_segment();
                state.set_next_ready(false);
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    tag = buffer.tag(),
                    current = state.current_index(),
                    "switched to standby segment"
                );
                continue;
            }
            drop(state);

            let prefetching = self.schedule_prefetch(buffer) || buffer.is_prefetching();
            return Ok(IdGenStatus::Pending { prefetching });
        }
    }

    /// Hands a prefetch of `buffer`'s standby segment to the executor unless
    /// one is already running. Returns whether a task was queued.
    fn schedule_prefetch(&self, buffer: &Arc<SegmentBuffer>) -> bool {
        let Some(lease) =
            buffer.try_begin_prefetch(self.shared.now(), self.shared.prefetch_timeout_ms())
        else {
            return false;
        };

        let shared = Arc::clone(&self.shared);
        let target = Arc::clone(buffer);
        let task: Task = Box::new(move || shared.prefetch(&target, lease));
        match self.executor.execute(task) {
            Ok(()) => true,
            Err(_e) => {
                buffer.end_prefetch(lease);
                #[cfg(feature = "tracing")]
                tracing::warn!(tag = buffer.tag(), error = %_e, "failed to schedule prefetch");
                false
            }
        }
    }
}

impl<S, E, T> Clone for SegmentIdGenerator<S, E, T>
where
    S: IdStore,
    E: Executor,
    T: TimeSource + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<S, E, T> fmt::Debug for SegmentIdGenerator<S, E, T>
where
    S: IdStore,
    E: Executor,
    T: TimeSource + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentIdGenerator")
            .field("tags", &self.shared.registry.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
