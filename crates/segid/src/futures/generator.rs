use core::future::Future;
use std::time::Instant;

use super::SleepProvider;
use crate::{Error, Executor, IdGenStatus, IdStore, Result, SegmentIdGenerator, TimeSource};

/// Extension trait for asynchronously allocating IDs.
///
/// When both segments of a tag are drained, the returned future sleeps with
/// the given [`SleepProvider`] for [`GeneratorConfig::retry_interval`] and
/// retries, instead of blocking the thread. It gives up after
/// [`GeneratorConfig::exhaustion_timeout`].
///
/// The first request of a tag still fetches the initial range synchronously;
/// see [`SegmentIdGeneratorTokioExt::next_id_async`] to move that onto the
/// blocking pool.
///
/// [`GeneratorConfig::retry_interval`]: crate::GeneratorConfig::retry_interval
/// [`GeneratorConfig::exhaustion_timeout`]: crate::GeneratorConfig::exhaustion_timeout
/// [`SegmentIdGeneratorTokioExt::next_id_async`]: crate::SegmentIdGeneratorTokioExt::next_id_async
pub trait SegmentIdGeneratorAsyncExt {
    /// Returns a future that resolves to the next ID of `tag`.
    ///
    /// # Errors
    ///
    /// Resolves to the same errors as
    /// [`SegmentIdGenerator::next_id`].
    fn try_next_id_async<SP>(&self, tag: &str) -> impl Future<Output = Result<u64>> + Send
    where
        SP: SleepProvider;
}

impl<S, E, T> SegmentIdGeneratorAsyncExt for SegmentIdGenerator<S, E, T>
where
    S: IdStore,
    E: Executor,
    T: TimeSource + Send + Sync + 'static,
{
    fn try_next_id_async<SP>(&self, tag: &str) -> impl Future<Output = Result<u64>> + Send
    where
        SP: SleepProvider,
    {
        async move {
            let mut started: Option<Instant> = None;
            loop {
                match self.try_next_id(tag)? {
                    IdGenStatus::Ready { id } => return Ok(id),
                    IdGenStatus::Pending { .. } => {
                        let waited = started.get_or_insert_with(Instant::now).elapsed();
                        if waited >= self.config().exhaustion_timeout {
                            return Err(Error::SegmentsNotReady {
                                tag: tag.to_owned(),
                                waited,
                            });
                        }
                    }
                }
                SP::sleep_for(self.config().retry_interval).await;
            }
        }
    }
}
