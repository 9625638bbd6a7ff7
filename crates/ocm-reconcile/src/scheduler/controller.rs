//! Worker loop driving a reconcile function from a [`WorkQueue`]

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::queue::{QueueKey, WorkQueue};

/// What the scheduler does with a key after a successful reconcile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile again after `delay` even without a change notification
    pub fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Wait for the next change notification
    pub fn await_change() -> Self {
        Self::default()
    }

    /// Requested delay, if any
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// A named controller: one queue, a fixed pool of workers
pub struct Controller<K> {
    name: String,
    queue: WorkQueue<K>,
    workers: usize,
    token: CancellationToken,
}

impl<K: QueueKey> Controller<K> {
    /// Controller with one worker and the default backoff
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: WorkQueue::default(),
            workers: 1,
            token: CancellationToken::new(),
        }
    }

    /// Number of concurrent workers (at least one)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Failure backoff of the queue, shared with watches already registered
    pub fn backoff(self, backoff: Backoff) -> Self {
        self.queue.set_backoff(backoff);
        self
    }

    /// Stop when `token` is cancelled
    pub fn shutdown_on(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Controller name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to the underlying queue
    pub fn queue(&self) -> WorkQueue<K> {
        self.queue.clone()
    }

    /// Queue `key` for reconciliation
    pub fn enqueue(&self, key: K) {
        self.queue.add(key);
    }

    /// Feed a change stream into the queue through `mapper`
    ///
    /// The feeding task ends with the stream or on shutdown. Stream errors
    /// are logged and skipped.
    pub fn watches<S, T, E, F>(self, stream: S, mapper: F) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(T) -> Vec<K> + Send + Sync + 'static,
    {
        let queue = self.queue.clone();
        let token = self.token.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(item)) => {
                        for key in mapper(item) {
                            queue.add(key);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(controller = %name, error = %e, "watch stream error");
                    }
                    None => {
                        debug!(controller = %name, "watch stream ended");
                        break;
                    }
                }
            }
        });
        self
    }

    /// Run workers until shutdown
    ///
    /// A reconcile still in flight at shutdown is dropped at its next await.
    pub async fn run<Ctx, F, Fut, E>(self, reconcile: F, ctx: Arc<Ctx>)
    where
        Ctx: Send + Sync,
        F: Fn(K, Arc<Ctx>) -> Fut,
        Fut: Future<Output = Result<Action, E>>,
        E: Display,
    {
        info!(controller = %self.name, workers = self.workers, "starting controller");

        let stopper = async {
            self.token.cancelled().await;
            self.queue.shutdown();
        };
        let workers = futures::future::join_all(
            (0..self.workers).map(|worker| self.work(worker, &reconcile, &ctx)),
        );
        tokio::join!(stopper, workers);

        info!(controller = %self.name, "controller stopped");
    }

    async fn work<Ctx, F, Fut, E>(&self, worker: usize, reconcile: &F, ctx: &Arc<Ctx>)
    where
        F: Fn(K, Arc<Ctx>) -> Fut,
        Fut: Future<Output = Result<Action, E>>,
        E: Display,
    {
        loop {
            let key = tokio::select! {
                _ = self.token.cancelled() => break,
                key = self.queue.get() => match key {
                    Some(key) => key,
                    None => break,
                },
            };

            let result = tokio::select! {
                _ = self.token.cancelled() => {
                    self.queue.done(&key);
                    break;
                }
                result = reconcile(key.clone(), Arc::clone(ctx)) => result,
            };

            match result {
                Ok(action) => {
                    self.queue.forget(&key);
                    if let Some(delay) = action.requeue_after() {
                        debug!(controller = %self.name, ?key, ?delay, "requeue requested");
                        self.queue.add_after(key.clone(), delay);
                    }
                }
                Err(e) => {
                    warn!(
                        controller = %self.name,
                        worker,
                        ?key,
                        error = %e,
                        retries = self.queue.num_requeues(&key),
                        "reconcile failed, will retry"
                    );
                    self.queue.add_rate_limited(key.clone());
                }
            }
            self.queue.done(&key);
        }
    }
}
