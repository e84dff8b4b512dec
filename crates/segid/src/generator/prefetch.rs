use core::time::Duration;

use crate::{
    Allocation, Error, GeneratorConfig, IdStore, Lease, Result, SegmentBuffer, Step, TagRegistry,
    TimeSource,
};

/// State shared between a generator, its clones, and in-flight prefetch
/// tasks. Tasks own an `Arc` of it, never the executor that runs them.
pub(crate) struct Shared<S, T> {
    pub(crate) store: S,
    pub(crate) registry: TagRegistry,
    pub(crate) config: GeneratorConfig,
    pub(crate) clock: T,
}

/// Releases a prefetch lease when dropped, including on unwind.
struct LeaseRelease<'a> {
    buffer: &'a SegmentBuffer,
    lease: Lease,
}

impl Drop for LeaseRelease<'_> {
    fn drop(&mut self) {
        self.buffer.end_prefetch(self.lease);
    }
}

impl<S, T> Shared<S, T>
where
    S: IdStore,
    T: TimeSource,
{
    pub(crate) fn now(&self) -> u64 {
        self.clock.current_millis()
    }

    pub(crate) fn prefetch_timeout_ms(&self) -> u64 {
        u64::try_from(self.config.prefetch_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Leases the next range for `tag` from the store.
    pub(crate) fn fetch(&self, tag: &str, step: Step) -> Result<Allocation> {
        match self.store.bump_max_id(tag, step) {
            Ok(Some(allocation)) => Ok(allocation),
            Ok(None) => Err(Error::unknown_tag(tag)),
            Err(e) => Err(Error::store(tag, e)),
        }
    }

    /// Fills `buffer`'s standby segment. Runs on the executor.
    ///
    /// Failures are logged and leave the standby empty; the next trigger or
    /// an exhausted caller schedules another attempt.
    pub(crate) fn prefetch(&self, buffer: &SegmentBuffer, lease: Lease) {
        let _release = LeaseRelease { buffer, lease };

        let installed = self
            .plan_step(buffer)
            .and_then(|step| self.fetch(buffer.tag(), step))
            .and_then(|allocation| self.install(buffer, lease, allocation));

        match installed {
            #[cfg(feature = "tracing")]
            Ok(false) => tracing::debug!(tag = buffer.tag(), "discarded prefetched range"),
            Ok(_) => {}
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    tag = buffer.tag(),
                    error = %_e,
                    "prefetch failed, standby segment stays empty"
                );
            }
        }
    }

    fn plan_step(&self, buffer: &SegmentBuffer) -> Result<Step> {
        let Some(adaptive) = &self.config.adaptive_step else {
            return Ok(Step::Configured);
        };
        let state = buffer.read()?;
        let elapsed = Duration::from_millis(self.now().saturating_sub(state.updated_at()));
        let next = adaptive.next_step(state.step(), state.min_step(), elapsed);
        #[cfg(feature = "tracing")]
        if next != state.step() {
            tracing::debug!(
                tag = buffer.tag(),
                from = state.step(),
                to = next,
                ?elapsed,
                "adjusted segment step"
            );
        }
        Ok(Step::Custom(next))
    }

    /// Installs `allocation` in the standby segment if `lease` is still the
    /// current one and the standby is free. Returns whether it was installed.
    fn install(&self, buffer: &SegmentBuffer, lease: Lease, allocation: Allocation) -> Result<bool> {
        let mut state = buffer.write()?;
        if !buffer.holds_lease(lease) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                tag = buffer.tag(),
                started_at = lease.started_at(),
                "prefetch lease expired before the range arrived"
            );
            return Ok(false);
        }
        if state.is_next_ready() {
            return Ok(false);
        }
        state.fill_standby(allocation.range(), allocation.configured_step, self.now());
        #[cfg(feature = "tracing")]
        tracing::debug!(
            tag = buffer.tag(),
            start = allocation.start,
            end = allocation.end,
            "standby segment ready"
        );
        Ok(true)
    }
}
