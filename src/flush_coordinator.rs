use std::fmt::Debug;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Sleep};

#[cfg(feature = "stats")]
use crate::flush_stats::FlushStats;
use crate::{
    config::BatchConfig,
    task::Task,
    task_list::{FlushReason, TaskList},
};

/// A `FlushCoordinator` is the single task that decides where one batch ends and the next begins.
///
/// Once started, it runs until the intake channel is closed, which happens when the parent
/// `Aggregator` is dropped or shut down.
///
/// Each batch cycle moves through three states:
///
/// 1. Idle: waiting on the intake channel for the first task of a new batch.
/// 2. Collecting: appending arriving tasks until the batch is full or its deadline elapses.
/// 3. Flushing: handing the cut batch to the worker pool.
///
/// The deadline is armed once, when the first task of a batch arrives, and is not pushed back by
/// later arrivals. This bounds the time any task waits in a forming batch to `max_wait`.
///
/// In state (3) the hand-off channel is bounded by the number of workers. When every worker is busy
/// and the channel is full, the coordinator waits here, so no new batch is cut until a worker
/// frees up. Submissions keep queueing on the unbounded intake channel in the meantime.
pub(crate) struct FlushCoordinator<T, R> {
    config: BatchConfig,
    intake_rx: mpsc::UnboundedReceiver<Task<T, R>>,
    flush_tx: mpsc::Sender<TaskList<T, R>>,
    #[cfg(feature = "stats")]
    stats: FlushStats,
}

impl<T, R> FlushCoordinator<T, R>
where
    T: 'static + Debug + Send + Sync,
    R: 'static + Send + Sync,
{
    pub fn new(
        config: BatchConfig,
        intake_rx: mpsc::UnboundedReceiver<Task<T, R>>,
        flush_tx: mpsc::Sender<TaskList<T, R>>,
    ) -> Self {
        Self {
            config,
            intake_rx,
            flush_tx,
            #[cfg(feature = "stats")]
            stats: FlushStats::new(std::any::type_name::<(T, R)>()),
        }
    }

    pub async fn start(mut self) {
        let mut deadline = FlushDeadline::new();

        loop {
            // Async await until we receive the first task of the next batch.
            let first = match self.intake_rx.recv().await {
                None => {
                    tracing::info!("Intake channel closed. Terminating FlushCoordinator.");
                    return;
                }
                Some(task) => task,
            };
            tracing::trace!(item = ?first.value(), "task arrived");
            #[cfg(feature = "stats")]
            self.stats.record_task();

            let mut tasks = vec![first];
            deadline.stop();

            let reason = if self.config.is_unbatched() {
                FlushReason::MaxSize
            } else if let Some(max_wait) = self.config.max_wait {
                deadline.arm(max_wait);
                self.collect_until_deadline(&mut tasks, &mut deadline).await
            } else {
                self.collect_until_full(&mut tasks).await
            };

            tracing::debug!(%reason, size = tasks.len(), "batch cut");
            #[cfg(feature = "stats")]
            self.stats.record_flush(reason, tasks.len());

            if self.flush_tx.send(TaskList::new(tasks, reason)).await.is_err() {
                tracing::error!("Worker pool closed. Terminating FlushCoordinator.");
                return;
            }
            if reason == FlushReason::Closed {
                tracing::info!("Intake channel closed. Terminating FlushCoordinator.");
                return;
            }
        }
    }

    async fn collect_until_deadline(
        &mut self,
        tasks: &mut Vec<Task<T, R>>,
        deadline: &mut FlushDeadline,
    ) -> FlushReason {
        loop {
            tokio::select! {
                next = self.intake_rx.recv() => match next {
                    None => return FlushReason::Closed,
                    Some(task) => {
                        tracing::trace!(item = ?task.value(), "task appended");
                        #[cfg(feature = "stats")]
                        self.stats.record_task();
                        tasks.push(task);
                        if self.config.is_full(tasks.len()) {
                            return FlushReason::MaxSize;
                        }
                    }
                },
                _ = deadline.elapsed() => return FlushReason::Timeout,
            }
        }
    }

    async fn collect_until_full(&mut self, tasks: &mut Vec<Task<T, R>>) -> FlushReason {
        while !self.config.is_full(tasks.len()) {
            match self.intake_rx.recv().await {
                None => return FlushReason::Closed,
                Some(task) => {
                    tracing::trace!(item = ?task.value(), "task appended");
                    #[cfg(feature = "stats")]
                    self.stats.record_task();
                    tasks.push(task);
                }
            }
        }
        FlushReason::MaxSize
    }
}

/// The single flush deadline, reused across batch cycles.
///
/// A `Sleep` that has passed its deadline completes as soon as it is polled. When a batch is cut by
/// size, its deadline may pass before anything observes it, and reusing the timer as is would
/// flush the next batch immediately. [`FlushDeadline::stop`] must therefore run before
/// [`FlushDeadline::arm`] on every cycle.
struct FlushDeadline {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl FlushDeadline {
    fn new() -> Self {
        Self { sleep: Box::pin(time::sleep_until(far_future())), armed: false }
    }

    /// Disarms the deadline and discards an expiry that fired but was never observed.
    fn stop(&mut self) {
        if self.armed && self.sleep.is_elapsed() {
            tracing::trace!("discarding stale flush deadline");
        }
        self.armed = false;
        self.sleep.as_mut().reset(far_future());
    }

    fn arm(&mut self, wait: Duration) {
        self.sleep.as_mut().reset(Instant::now() + wait);
        self.armed = true;
    }

    /// Completes once the armed deadline passes. Never completes while disarmed.
    async fn elapsed(&mut self) {
        if !self.armed {
            return futures::future::pending().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(
        config: BatchConfig,
        workers: usize,
    ) -> (
        mpsc::UnboundedSender<Task<u32, u32>>,
        mpsc::Receiver<TaskList<u32, u32>>,
        tokio::task::JoinHandle<()>,
    ) {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (flush_tx, flush_rx) = mpsc::channel(workers);
        let handle = tokio::spawn(FlushCoordinator::new(config, intake_rx, flush_tx).start());
        (intake_tx, flush_rx, handle)
    }

    fn assert_near(elapsed: Duration, want: Duration) {
        assert!(
            elapsed >= want && elapsed < want + Duration::from_millis(5),
            "elapsed {:?}, want {:?}",
            elapsed,
            want
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cuts_by_size_in_arrival_order() {
        let (intake_tx, mut flush_rx, _handle) = coordinator(BatchConfig::new(None, 3), 1);
        for i in 0..3 {
            intake_tx.send(Task::new(i)).unwrap();
        }
        let batch = flush_rx.recv().await.unwrap();
        assert_eq!(batch.flush_reason(), FlushReason::MaxSize);
        assert_eq!(batch.values().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cuts_by_deadline_from_first_item() {
        let max_wait = Duration::from_millis(50);
        let (intake_tx, mut flush_rx, _handle) = coordinator(BatchConfig::new(Some(max_wait), 0), 1);
        let start = Instant::now();
        intake_tx.send(Task::new(1)).unwrap();
        time::sleep(Duration::from_millis(30)).await;
        intake_tx.send(Task::new(2)).unwrap();

        let batch = flush_rx.recv().await.unwrap();
        assert_eq!(batch.flush_reason(), FlushReason::Timeout);
        assert_eq!(batch.len(), 2);
        assert_near(start.elapsed(), max_wait);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_deadline_does_not_flush_next_batch() {
        let max_wait = Duration::from_millis(50);
        let (intake_tx, mut flush_rx, _handle) = coordinator(BatchConfig::new(Some(max_wait), 2), 1);
        intake_tx.send(Task::new(1)).unwrap();
        intake_tx.send(Task::new(2)).unwrap();
        assert_eq!(flush_rx.recv().await.unwrap().flush_reason(), FlushReason::MaxSize);

        // Let the first batch's deadline pass unobserved.
        time::sleep(max_wait * 2).await;

        let start = Instant::now();
        intake_tx.send(Task::new(3)).unwrap();
        let batch = flush_rx.recv().await.unwrap();
        assert_eq!(batch.flush_reason(), FlushReason::Timeout);
        assert_near(start.elapsed(), max_wait);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_partial_batch_on_close() {
        let (intake_tx, mut flush_rx, handle) = coordinator(BatchConfig::new(None, 10), 1);
        intake_tx.send(Task::new(1)).unwrap();
        drop(intake_tx);
        let batch = flush_rx.recv().await.unwrap();
        assert_eq!(batch.flush_reason(), FlushReason::Closed);
        assert_eq!(batch.len(), 1);
        handle.await.unwrap();
        assert!(flush_rx.recv().await.is_none());
    }
}
