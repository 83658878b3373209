use std::fmt::Debug;
use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::{
    batch_function::BatchFunction,
    config::BatchConfig,
    error::BatchError,
    flush_coordinator::FlushCoordinator,
    task::{Task, TaskResult},
    worker_pool::WorkerPool,
};

/// Lifecycle of an [`Aggregator`]. It only ever moves forward, from `Created` to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Created = 0,
    Running = 1,
}

/// Coalesces concurrently submitted items into batches and processes each batch once.
///
/// Callers [`submit`](Aggregator::submit) items from any number of tasks. A single flush
/// coordinator collects them into batches, cutting a batch when it reaches
/// [`BatchConfig::max_size`] items or when [`BatchConfig::max_wait`] has passed since its first
/// item, whichever comes first. Cut batches are handed to a fixed pool of workers, each of which
/// runs the [`BatchFunction`] on one batch at a time. Every submitter then observes the result of
/// its own item through its [`Task`].
///
/// The aggregator is inert until [`Aggregator::start`] is called. Items submitted before that are
/// queued and batched once it starts.
///
/// Dropping the aggregator closes its intake: the coordinator flushes what it has collected and
/// the workers finish the remaining batches in the background. Items queued on an aggregator that
/// was never started fail with [`BatchError::Closed`]. Use [`Aggregator::shutdown`] to
/// wait for that to complete.
pub struct Aggregator<T, R> {
    config: BatchConfig,
    batch_fn: Arc<dyn BatchFunction<T, R>>,
    state: AtomicU8,
    intake_tx: mpsc::UnboundedSender<Task<T, R>>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<Task<T, R>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T, R> Aggregator<T, R>
where
    T: 'static + Debug + Send + Sync,
    R: 'static + Send + Sync,
{
    /// Creates an aggregator for the provided batch function.
    pub fn new<F>(batch_fn: F, config: BatchConfig) -> Self
    where
        F: BatchFunction<T, R>,
    {
        Self::with_shared(Arc::new(batch_fn), config)
    }

    pub fn builder() -> AggregatorBuilder<T, R> {
        AggregatorBuilder::default()
    }

    fn with_shared(batch_fn: Arc<dyn BatchFunction<T, R>>, config: BatchConfig) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        Self {
            config,
            batch_fn,
            state: AtomicU8::new(State::Created as u8),
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        if self.state.load(Ordering::Acquire) == State::Created as u8 {
            State::Created
        } else {
            State::Running
        }
    }

    /// Starts the flush coordinator and `workers` batch workers on the current tokio runtime.
    ///
    /// `workers` is raised to 1 if smaller. Calling `start` on a running aggregator does nothing.
    pub fn start(&self, workers: usize) -> Result<(), BatchError> {
        tokio::runtime::Handle::try_current().map_err(|_| BatchError::NoRuntime)?;
        if self
            .state
            .compare_exchange(
                State::Created as u8,
                State::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::debug!("aggregator already running");
            return Ok(());
        }
        let intake_rx = match self.intake_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
        {
            Some(intake_rx) => intake_rx,
            None => return Ok(()),
        };

        let workers = workers.max(1);
        if !self.config.flushes_by_time() && !self.config.flushes_by_size() {
            tracing::warn!(config = ?self.config, "aggregator only flushes when closed");
        }
        tracing::info!(workers, config = ?self.config, "starting aggregator");

        let (flush_tx, flush_rx) = mpsc::channel(workers);
        let coordinator = FlushCoordinator::new(self.config, intake_rx, flush_tx);
        let mut handles = WorkerPool::new(Arc::clone(&self.batch_fn), flush_rx).spawn(workers);
        handles.push(tokio::spawn(coordinator.start().instrument(tracing::trace_span!(
            "FlushCoordinator",
            kv = std::any::type_name::<(T, R)>()
        ))));
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).extend(handles);
        Ok(())
    }

    /// Submits an item and returns its task immediately.
    ///
    /// If the aggregator can no longer accept items the task is already failed with
    /// [`BatchError::Closed`].
    pub fn submit(&self, item: T) -> Task<T, R> {
        let task = Task::new(item);
        if let Err(mpsc::error::SendError(task)) = self.intake_tx.send(task.clone()) {
            tracing::error!(item = ?task.value(), "intake channel closed");
            task.fail_with(BatchError::Closed);
        }
        task
    }

    /// Submits an item and waits for its result.
    pub async fn submit_and_wait(&self, item: T) -> TaskResult<R>
    where
        R: Clone,
    {
        self.submit(item).wait().await
    }

    /// Submits every item and waits for all results, returned in input order.
    pub async fn submit_many<I>(&self, items: I) -> Vec<TaskResult<R>>
    where
        I: IntoIterator<Item = T>,
        R: Clone,
    {
        let tasks = items.into_iter().map(|item| self.submit(item)).collect::<Vec<_>>();
        future::join_all(tasks.iter().map(Task::wait)).await
    }

    /// Closes the intake and waits until every submitted item has been processed.
    ///
    /// Items collected into a batch that would never fill are flushed one last time. If the
    /// aggregator was never started, pending items fail with [`BatchError::Closed`].
    pub async fn shutdown(self) {
        let handles = mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        // Dropping closes the intake channel and fails anything queued before `start`.
        drop(self);

        for result in future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(?e, "aggregator task failed");
            }
        }
        tracing::info!("aggregator shut down");
    }
}

impl<T, R> Aggregator<T, R> {
    /// Fails every task still queued on an intake channel that no coordinator ever took.
    fn close_pending(&mut self) {
        let intake_rx = self.intake_rx.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut intake_rx) = intake_rx {
            intake_rx.close();
            let mut closed = 0usize;
            while let Ok(task) = intake_rx.try_recv() {
                task.fail_with(BatchError::Closed);
                closed += 1;
            }
            if closed > 0 {
                tracing::debug!(closed, "aggregator closed before start");
            }
        }
    }
}

impl<T, R> Drop for Aggregator<T, R> {
    fn drop(&mut self) {
        self.close_pending();
    }
}

/// Builds an [`Aggregator`], failing if no batch function was provided.
pub struct AggregatorBuilder<T, R> {
    batch_fn: Option<Arc<dyn BatchFunction<T, R>>>,
    config: BatchConfig,
}

impl<T, R> Default for AggregatorBuilder<T, R> {
    fn default() -> Self {
        Self { batch_fn: None, config: BatchConfig::default() }
    }
}

impl<T, R> AggregatorBuilder<T, R>
where
    T: 'static + Debug + Send + Sync,
    R: 'static + Send + Sync,
{
    pub fn batch_fn<F>(mut self, batch_fn: F) -> Self
    where
        F: BatchFunction<T, R>,
    {
        self.batch_fn = Some(Arc::new(batch_fn));
        self
    }

    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = Some(max_wait);
        self
    }

    /// Disables time based flushing.
    pub fn never_flush_by_time(mut self) -> Self {
        self.config.max_wait = None;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn build(self) -> Result<Aggregator<T, R>, BatchError> {
        let batch_fn = self.batch_fn.ok_or(BatchError::MissingBatchFunction)?;
        Ok(Aggregator::with_shared(batch_fn, self.config))
    }
}
