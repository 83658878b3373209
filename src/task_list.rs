use std::collections::hash_map::{self, HashMap};
use std::fmt;
use std::hash::Hash;
use std::slice;

use crate::{
    error::{BatchError, BoxError},
    task::Task,
};

/// Why the coordinator closed off a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The batch reached the configured maximum size.
    MaxSize,
    /// The flush deadline, measured from the batch's first item, elapsed.
    Timeout,
    /// The aggregator was closed while the batch was being collected.
    Closed,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushReason::MaxSize => "max-size",
            FlushReason::Timeout => "timeout",
            FlushReason::Closed => "closed",
        })
    }
}

/// The tasks of one cut batch, in arrival order.
#[derive(Debug)]
pub struct TaskList<T, R> {
    tasks: Vec<Task<T, R>>,
    reason: FlushReason,
}

impl<T, R> Clone for TaskList<T, R> {
    fn clone(&self) -> Self {
        Self { tasks: self.tasks.clone(), reason: self.reason }
    }
}

impl<T, R> TaskList<T, R> {
    pub(crate) fn new(tasks: Vec<Task<T, R>>, reason: FlushReason) -> Self {
        Self { tasks, reason }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Task<T, R>> {
        self.tasks.iter()
    }

    /// The submitted items, in arrival order.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.tasks.iter().map(Task::value)
    }

    pub fn flush_reason(&self) -> FlushReason {
        self.reason
    }

    /// Completes every task in the list with the same value.
    pub fn complete(&self, result: R)
    where
        R: Clone,
    {
        for task in &self.tasks {
            task.complete(result.clone());
        }
    }

    /// Fails every task in the list with the same item-level error.
    pub fn fail(&self, err: impl Into<BoxError>) {
        self.fail_with(BatchError::item(err.into()));
    }

    pub(crate) fn fail_with(&self, err: BatchError) {
        for task in &self.tasks {
            task.fail_with(err.clone());
        }
    }

    /// Settles every task the batch function left pending: with `err` if the batch failed, as
    /// unresolved otherwise. Returns how many tasks were settled here.
    pub(crate) fn settle_remaining(&self, err: Option<&BatchError>) -> usize {
        self.tasks
            .iter()
            .filter(|task| match err {
                Some(err) => task.fail_with(err.clone()),
                None => task.leave_unresolved(),
            })
            .count()
    }
}

impl<T, R> TaskList<T, R>
where
    T: Eq + Hash + Clone,
{
    /// Groups the tasks by submitted item, so that duplicate items can be resolved once.
    ///
    /// Each group keeps the arrival order of its tasks.
    pub fn group(&self) -> TaskGroup<T, R> {
        let mut groups: HashMap<T, Vec<Task<T, R>>> = HashMap::new();
        for task in &self.tasks {
            groups.entry(task.value().clone()).or_default().push(task.clone());
        }
        TaskGroup {
            groups: groups
                .into_iter()
                .map(|(key, tasks)| (key, TaskList::new(tasks, self.reason)))
                .collect(),
        }
    }
}

impl<'a, T, R> IntoIterator for &'a TaskList<T, R> {
    type Item = &'a Task<T, R>;
    type IntoIter = slice::Iter<'a, Task<T, R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A batch's tasks keyed by submitted item.
#[derive(Debug)]
pub struct TaskGroup<T, R> {
    groups: HashMap<T, TaskList<T, R>>,
}

impl<T, R> TaskGroup<T, R>
where
    T: Eq + Hash,
{
    /// The tasks submitted for `key`.
    pub fn get(&self, key: &T) -> Option<&TaskList<T, R>> {
        self.groups.get(key)
    }

    /// Number of distinct items.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn keys(&self) -> hash_map::Keys<'_, T, TaskList<T, R>> {
        self.groups.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, T, TaskList<T, R>> {
        self.groups.iter()
    }

    /// Completes every task of every item with the same value.
    pub fn complete(&self, result: R)
    where
        R: Clone,
    {
        for tasks in self.groups.values() {
            tasks.complete(result.clone());
        }
    }

    /// Fails every task of every item with the same item-level error.
    pub fn fail(&self, err: impl Into<BoxError>) {
        let err = BatchError::item(err.into());
        for tasks in self.groups.values() {
            tasks.fail_with(err.clone());
        }
    }
}

impl<'a, T, R> IntoIterator for &'a TaskGroup<T, R> {
    type Item = (&'a T, &'a TaskList<T, R>);
    type IntoIter = hash_map::Iter<'a, T, TaskList<T, R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}
