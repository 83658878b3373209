mod aggregator;
mod batch_function;
mod config;
mod error;
mod flush_coordinator;
#[cfg(feature = "stats")]
mod flush_stats;
mod task;
mod task_list;
mod worker_pool;

pub use aggregator::{Aggregator, AggregatorBuilder, State};
pub use batch_function::BatchFunction;
pub use config::{BatchConfig, NEVER_FLUSH_TIMEOUT};
pub use error::{BatchError, BoxError, SharedError};
pub use task::{Task, TaskResult};
pub use task_list::{FlushReason, TaskGroup, TaskList};
