use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing_futures::Instrument;

use crate::{batch_function::BatchFunction, error::BatchError, task_list::TaskList};

/// A fixed set of workers competing for cut batches on the hand-off channel.
///
/// Once a batch is taken by a worker, no other worker touches it. With more than one worker,
/// batches may complete out of the order they were cut in.
pub(crate) struct WorkerPool<T, R> {
    batch_fn: Arc<dyn BatchFunction<T, R>>,
    flush_rx: Arc<Mutex<mpsc::Receiver<TaskList<T, R>>>>,
}

impl<T, R> WorkerPool<T, R>
where
    T: 'static + Debug + Send + Sync,
    R: 'static + Send + Sync,
{
    pub fn new(
        batch_fn: Arc<dyn BatchFunction<T, R>>,
        flush_rx: mpsc::Receiver<TaskList<T, R>>,
    ) -> Self {
        Self { batch_fn, flush_rx: Arc::new(Mutex::new(flush_rx)) }
    }

    /// Spawns `workers` worker tasks on the current runtime.
    pub fn spawn(self, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|id| {
                let worker = Worker {
                    batch_fn: Arc::clone(&self.batch_fn),
                    flush_rx: Arc::clone(&self.flush_rx),
                };
                tokio::spawn(worker.start().instrument(tracing::trace_span!("BatchWorker", id)))
            })
            .collect()
    }
}

struct Worker<T, R> {
    batch_fn: Arc<dyn BatchFunction<T, R>>,
    flush_rx: Arc<Mutex<mpsc::Receiver<TaskList<T, R>>>>,
}

impl<T, R> Worker<T, R>
where
    T: 'static + Debug + Send + Sync,
    R: 'static + Send + Sync,
{
    async fn start(self) {
        loop {
            // The lock is only held while waiting for the next batch, not while processing it.
            let next = self.flush_rx.lock().await.recv().await;
            match next {
                None => {
                    tracing::info!("Hand-off channel closed. Terminating BatchWorker.");
                    return;
                }
                Some(tasks) => self.execute(tasks).await,
            }
        }
    }

    #[tracing::instrument(skip_all, fields(size = tasks.len(), reason = %tasks.flush_reason()))]
    async fn execute(&self, tasks: TaskList<T, R>) {
        let outcome = AssertUnwindSafe(self.batch_fn.process(tasks.clone())).catch_unwind().await;
        let settled = match outcome {
            Ok(Ok(())) => tasks.settle_remaining(None),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "batch function failed");
                tasks.settle_remaining(Some(&BatchError::batch(e)))
            }
            Err(_) => {
                tracing::error!("batch function panicked");
                tasks.settle_remaining(Some(&BatchError::Panicked))
            }
        };
        tracing::debug!(unresolved = settled, "batch processed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::BoxError,
        task::Task,
        task_list::FlushReason,
    };

    fn pool(
        batch_fn: Arc<dyn BatchFunction<u32, String>>,
    ) -> (mpsc::Sender<TaskList<u32, String>>, Vec<JoinHandle<()>>) {
        let (flush_tx, flush_rx) = mpsc::channel(1);
        (flush_tx, WorkerPool::new(batch_fn, flush_rx).spawn(1))
    }

    fn batch(values: &[u32]) -> TaskList<u32, String> {
        TaskList::new(values.iter().map(|v| Task::new(*v)).collect(), FlushReason::MaxSize)
    }

    #[tokio::test]
    async fn item_results_take_priority_over_batch_error() {
        let (flush_tx, _handles) = pool(Arc::new(|tasks: TaskList<u32, String>| async move {
            for task in tasks.iter().filter(|t| *t.value() % 2 == 0) {
                task.complete(format!("even {}", task.value()));
            }
            Err::<(), BoxError>("odd keys unsupported".into())
        }));
        let tasks = batch(&[1, 2, 3, 4]);
        flush_tx.send(tasks.clone()).await.unwrap();

        let mut results = Vec::new();
        for task in &tasks {
            results.push(task.wait().await);
        }
        assert!(matches!(results[0], Err(BatchError::Batch(_))));
        assert_eq!(results[1].as_ref().unwrap(), &Some("even 2".to_owned()));
        assert!(matches!(results[2], Err(BatchError::Batch(_))));
        assert_eq!(results[3].as_ref().unwrap(), &Some("even 4".to_owned()));
    }

    #[tokio::test]
    async fn survives_panicking_batch_function() {
        let (flush_tx, _handles) = pool(Arc::new(|tasks: TaskList<u32, String>| async move {
            if tasks.values().any(|v| *v == 0) {
                panic!("zero");
            }
            tasks.complete("ok".to_owned());
            Ok::<(), BoxError>(())
        }));

        let first = batch(&[0]);
        flush_tx.send(first.clone()).await.unwrap();
        assert!(matches!(first.iter().next().unwrap().wait().await, Err(BatchError::Panicked)));

        let second = batch(&[1]);
        flush_tx.send(second.clone()).await.unwrap();
        assert_eq!(second.iter().next().unwrap().wait().await.unwrap(), Some("ok".to_owned()));
    }

    #[tokio::test]
    async fn workers_exit_when_hand_off_closes() {
        let (flush_tx, handles) =
            pool(Arc::new(|_: TaskList<u32, String>| async move { Ok::<(), BoxError>(()) }));
        drop(flush_tx);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
