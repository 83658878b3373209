use std::fmt::{self, Debug};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;

use crate::error::{BatchError, BoxError};

/// Result observed by the submitter of a [`Task`].
///
/// `Ok(Some(value))` when the batch function resolved the item, `Ok(None)` when the batch finished
/// without resolving it ("no result"), and `Err(_)` when the item or its whole batch failed.
pub type TaskResult<R> = Result<Option<R>, BatchError>;

#[derive(Debug)]
enum Outcome<R> {
    Value(R),
    Error(BatchError),
    Unresolved,
}

struct Inner<T, R> {
    value: T,
    outcome: OnceLock<Outcome<R>>,
    completed: Notify,
}

/// Handle to one submitted item and its eventual result.
///
/// A `Task` is shared between the submitter, which waits on it, and the worker executing its
/// batch, which completes it. Cloning is cheap and every clone observes the same completion.
///
/// A task transitions from pending to completed exactly once. The first of [`Task::complete`],
/// [`Task::fail`] or the worker's own settlement wins; later attempts return `false` and leave the
/// stored result untouched.
pub struct Task<T, R> {
    inner: Arc<Inner<T, R>>,
}

impl<T, R> Clone for Task<T, R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Debug, R: Debug> Debug for Task<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("value", &self.inner.value)
            .field("outcome", &self.inner.outcome.get())
            .finish()
    }
}

impl<T, R> Task<T, R> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner { value, outcome: OnceLock::new(), completed: Notify::new() }),
        }
    }

    /// The submitted item.
    pub fn value(&self) -> &T {
        &self.inner.value
    }

    /// Completes the task with a value. Returns `false` if it was already completed.
    pub fn complete(&self, result: R) -> bool {
        self.settle(Outcome::Value(result))
    }

    /// Completes the task with an item-level error. Returns `false` if it was already completed.
    ///
    /// An item error always takes precedence over an error later returned for the whole batch.
    pub fn fail(&self, err: impl Into<BoxError>) -> bool {
        self.settle(Outcome::Error(BatchError::item(err.into())))
    }

    /// Whether the task has been completed in any way.
    pub fn is_completed(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// Whether neither a value nor an error has been stored, either because the task is still
    /// pending or because its batch finished without resolving it.
    pub fn is_unset(&self) -> bool {
        matches!(self.inner.outcome.get(), None | Some(Outcome::Unresolved))
    }

    pub(crate) fn fail_with(&self, err: BatchError) -> bool {
        self.settle(Outcome::Error(err))
    }

    pub(crate) fn leave_unresolved(&self) -> bool {
        self.settle(Outcome::Unresolved)
    }

    fn settle(&self, outcome: Outcome<R>) -> bool {
        if self.inner.outcome.set(outcome).is_err() {
            return false;
        }
        self.inner.completed.notify_waiters();
        true
    }
}

impl<T, R: Clone> Task<T, R> {
    /// The result, or `None` while the task is still pending.
    pub fn try_result(&self) -> Option<TaskResult<R>> {
        self.inner.outcome.get().map(|outcome| match outcome {
            Outcome::Value(value) => Ok(Some(value.clone())),
            Outcome::Error(err) => Err(err.clone()),
            Outcome::Unresolved => Ok(None),
        })
    }

    /// Waits until the task is completed and returns its result.
    ///
    /// There is no timeout; wrap the call in `tokio::time::timeout` to bound it. Dropping the
    /// future does not cancel the task.
    pub async fn wait(&self) -> TaskResult<R> {
        loop {
            // Register before checking so a completion in between still wakes us.
            let completed = self.inner.completed.notified();
            if let Some(result) = self.try_result() {
                return result;
            }
            completed.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_task_has_no_result() {
        let task = Task::<&str, String>::new("foo");
        assert_eq!(task.value(), &"foo");
        assert!(task.try_result().is_none());
        assert!(task.is_unset());
        assert!(!task.is_completed());
    }

    #[test]
    fn first_completion_wins() {
        let task = Task::<&str, String>::new("foo");
        assert!(task.complete("first".to_owned()));
        assert!(!task.complete("second".to_owned()));
        assert!(!task.fail("too late"));
        assert_eq!(task.try_result().unwrap().unwrap(), Some("first".to_owned()));
        assert!(!task.is_unset());
    }

    #[test]
    fn unresolved_task_reports_no_result() {
        let task = Task::<&str, String>::new("foo");
        assert!(task.leave_unresolved());
        assert!(task.is_completed());
        assert!(task.is_unset());
        assert_eq!(task.try_result().unwrap().unwrap(), None);
    }

    #[test]
    fn item_error_is_reported() {
        let task = Task::<&str, String>::new("foo");
        task.fail("not found");
        match task.try_result() {
            Some(Err(BatchError::Item(err))) => assert_eq!(err.to_string(), "not found"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn all_waiters_observe_the_same_value() {
        let task = Task::<u32, String>::new(7);
        let waiters = (0..3)
            .map(|_| {
                let task = task.clone();
                tokio::spawn(async move { task.wait().await })
            })
            .collect::<Vec<_>>();
        tokio::task::yield_now().await;
        task.complete("seven".to_owned());
        task.complete("eight".to_owned());
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), Some("seven".to_owned()));
        }
        // Late waiters see the stored value immediately.
        assert_eq!(task.wait().await.unwrap(), Some("seven".to_owned()));
    }
}
