use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    thread,
};

use crossbeam_channel::{Sender, unbounded};

use crate::{Error, Result};

/// A unit of background work: one prefetch.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs prefetch tasks in the background.
///
/// Implementations must never run a task on the calling thread: the generator
/// schedules prefetches while holding a buffer's read lock, and the task takes
/// the same buffer's write lock to install its range.
pub trait Executor: Send + Sync + 'static {
    /// Queues `task` for background execution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`] if the task cannot be queued (e.g. the
    /// runtime is shutting down). The caller releases the prefetch guard so a
    /// later request retries.
    fn execute(&self, task: Task) -> Result<()>;
}

impl<E> Executor for Arc<E>
where
    E: Executor + ?Sized,
{
    fn execute(&self, task: Task) -> Result<()> {
        (**self).execute(task)
    }
}

/// A fixed pool of named worker threads fed by an unbounded channel.
///
/// This is the default prefetch executor. Workers are detached: dropping the
/// pool closes the channel and each worker exits after draining the queued
/// tasks. A panicking task is contained to that task.
#[derive(Debug)]
pub struct ThreadPool {
    sender: Sender<Task>,
    size: usize,
}

impl ThreadPool {
    /// Spawns `size` worker threads named `segid-prefetch-{n}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `size` is zero and
    /// [`Error::Executor`] if a thread cannot be spawned.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_config(
                "thread pool size must be greater than 0",
            ));
        }
        let (sender, receiver) = unbounded::<Task>();
        for n in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("segid-prefetch-{n}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        if catch_unwind(AssertUnwindSafe(task)).is_err() {
                            #[cfg(feature = "tracing")]
                            tracing::error!("prefetch task panicked");
                        }
                    }
                })
                .map_err(|e| Error::Executor {
                    reason: format!("failed to spawn prefetch worker {n}: {e}"),
                })?;
        }
        Ok(Self { sender, size })
    }

    /// Number of worker threads.
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) -> Result<()> {
        self.sender.send(task).map_err(|_| Error::Executor {
            reason: "prefetch workers have exited".to_owned(),
        })
    }
}

/// Runs prefetches on Tokio's blocking thread pool.
///
/// Store calls are synchronous, so they are kept off the async worker threads
/// with [`tokio::task::spawn_blocking`].
#[cfg_attr(docsrs, doc(cfg(feature = "async-tokio")))]
#[cfg(feature = "async-tokio")]
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "async-tokio")]
impl TokioExecutor {
    /// Spawns onto the runtime behind `handle`.
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawns onto the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Executor`] when called outside a Tokio runtime.
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Executor {
                reason: e.to_string(),
            })
    }
}

#[cfg(feature = "async-tokio")]
impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<()> {
        // The returned JoinHandle is dropped: the task is detached.
        let _ = self.handle.spawn_blocking(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn rejects_empty_pool() {
        assert!(matches!(ThreadPool::new(0), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn runs_tasks_on_named_workers() {
        let pool = ThreadPool::new(2).unwrap();
        assert_eq!(pool.size(), 2);
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send(name).unwrap();
            }))
            .unwrap();
        }
        for _ in 0..4 {
            let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
            assert!(name.starts_with("segid-prefetch-"), "{name}");
        }
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = ThreadPool::new(1).unwrap();
        pool.execute(Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[cfg(feature = "async-tokio")]
    #[tokio::test(flavor = "multi_thread")]
    async fn tokio_executor_runs_on_blocking_pool() {
        let executor = TokioExecutor::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        executor
            .execute(Box::new(move || {
                let _ = tx.send(42);
            }))
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[cfg(feature = "async-tokio")]
    #[test]
    fn tokio_executor_requires_runtime() {
        assert!(matches!(TokioExecutor::current(), Err(Error::Executor { .. })));
    }
}
