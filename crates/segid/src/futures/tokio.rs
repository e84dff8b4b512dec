use core::{future::Future, time::Duration};

use super::{SegmentIdGeneratorAsyncExt, SleepProvider};
use crate::{Error, Executor, IdStore, Result, SegmentIdGenerator, TimeSource};

/// An implementation of [`SleepProvider`] using Tokio's timer.
///
/// This is the default provider for use in async applications built on Tokio.
pub struct TokioSleep;
impl SleepProvider for TokioSleep {
    fn sleep_for(dur: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(dur)
    }
}

/// An implementation of [`SleepProvider`] using Tokio's yield.
///
/// This strategy avoids timer-based delays by yielding to the scheduler
/// immediately, which can improve responsiveness while a prefetch is about to
/// land.
///
/// However, it comes at the cost of more frequent rescheduling, which can
/// result in tighter polling loops and increased CPU usage under load. In
/// highly concurrent cases, a timer-based sleep (e.g., [`TokioSleep`]) is often
/// more efficient due to reduced scheduler churn.
pub struct TokioYield;
impl SleepProvider for TokioYield {
    fn sleep_for(_dur: Duration) -> impl Future<Output = ()> + Send {
        tokio::task::yield_now()
    }
}

/// Tokio-specific async allocation.
pub trait SegmentIdGeneratorTokioExt {
    /// Returns a future that resolves to the next ID of `tag`.
    ///
    /// Tag resolution and the initial range fetch run on Tokio's blocking
    /// pool, so the first request of a tag does not stall a runtime worker.
    /// Exhaustion waits use [`TokioSleep`].
    ///
    /// # Errors
    ///
    /// Resolves to the same errors as [`SegmentIdGenerator::next_id`], plus
    /// [`Error::Executor`] if the blocking task was cancelled.
    fn next_id_async(&self, tag: &str) -> impl Future<Output = Result<u64>> + Send;
}

impl<S, E, T> SegmentIdGeneratorTokioExt for SegmentIdGenerator<S, E, T>
where
    S: IdStore,
    E: Executor,
    T: TimeSource + Send + Sync + 'static,
{
    fn next_id_async(&self, tag: &str) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let ready = self.buffer(tag).is_some_and(|buffer| buffer.is_initialized());
            if !ready {
                let generator = self.clone();
                let owned = tag.to_owned();
                tokio::task::spawn_blocking(move || generator.initialize(&owned).map(drop))
                    .await
                    .map_err(|e| Error::Executor {
                        reason: e.to_string(),
                    })??;
            }
            self.try_next_id_async::<TokioSleep>(tag).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backoff, GeneratorConfig, MemoryIdStore, Task, TokioExecutor};
    use std::collections::HashSet;

    struct RejectingExecutor;

    impl Executor for RejectingExecutor {
        fn execute(&self, _task: Task) -> Result<()> {
            Err(Error::Executor {
                reason: "closed".to_owned(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_ids_are_unique_across_tasks() {
        const TASKS: usize = 16;
        const PER_TASK: usize = 500;

        let store = MemoryIdStore::new().with_tag("bookmark", 50);
        let generator = SegmentIdGenerator::with_executor(
            store,
            TokioExecutor::current().unwrap(),
            GeneratorConfig {
                exhaustion_timeout: Duration::from_secs(10),
                ..GeneratorConfig::default()
            },
        )
        .unwrap();

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let generator = generator.clone();
                tokio::spawn(async move {
                    let mut ids = Vec::with_capacity(PER_TASK);
                    for _ in 0..PER_TASK {
                        ids.push(generator.next_id_async("bookmark").await.unwrap());
                    }
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::with_capacity(TASKS * PER_TASK);
        for handle in handles {
            let ids = handle.await.unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), TASKS * PER_TASK);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generic_ext_works_with_yield_provider() {
        let store = MemoryIdStore::new().with_tag("bookmark", 5);
        let generator = SegmentIdGenerator::new(store, GeneratorConfig::default()).unwrap();
        for expected in 0..20 {
            let id = generator
                .try_next_id_async::<TokioYield>("bookmark")
                .await
                .unwrap();
            assert_eq!(id, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_tag_fails_async() {
        let store = MemoryIdStore::new();
        let generator = SegmentIdGenerator::new(store, GeneratorConfig::default()).unwrap();
        assert!(matches!(
            generator.next_id_async("missing").await,
            Err(Error::UnknownTag { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_wait_is_bounded() {
        let store = MemoryIdStore::new().with_tag("bookmark", 1);
        let generator = SegmentIdGenerator::with_executor(
            store,
            RejectingExecutor,
            GeneratorConfig {
                exhaustion_timeout: Duration::from_millis(20),
                backoff: Backoff::Yield,
                ..GeneratorConfig::default()
            },
        )
        .unwrap();

        assert_eq!(generator.next_id_async("bookmark").await.unwrap(), 0);
        assert!(matches!(
            generator.next_id_async("bookmark").await,
            Err(Error::SegmentsNotReady { .. })
        ));
    }
}
