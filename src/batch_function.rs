use std::future::Future;

use async_trait::async_trait;

use crate::{error::BoxError, task_list::TaskList};

/// A `BatchFunction` processes one batch of submitted items at a time.
///
/// The function receives every task the coordinator collected during the most recent flush cycle,
/// in arrival order, and resolves them through [`Task::complete`](crate::Task::complete) and
/// [`Task::fail`](crate::Task::fail) (or the list and group wide helpers). It is not required to
/// resolve every task. Once it returns, the worker settles whatever is left:
///
/// - if the function returned `Ok(())`, the remaining tasks resolve to "no result" (`Ok(None)`);
/// - if it returned `Err(e)`, the remaining tasks fail with [`BatchError::Batch`](crate::BatchError::Batch).
///
/// Tasks the function resolved itself always keep their own result.
///
/// Closures of the form `Fn(TaskList<T, R>) -> impl Future<Output = Result<(), BoxError>>` are
/// batch functions too.
#[async_trait]
pub trait BatchFunction<T, R>: Send + Sync + 'static {
    async fn process(&self, tasks: TaskList<T, R>) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut, T, R> BatchFunction<T, R> for F
where
    F: Fn(TaskList<T, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    async fn process(&self, tasks: TaskList<T, R>) -> Result<(), BoxError> {
        (self)(tasks).await
    }
}
