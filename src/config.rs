use std::time::Duration;

/// Value for [`BatchConfig::max_wait`] that disables time based flushing.
pub const NEVER_FLUSH_TIMEOUT: Option<Duration> = None;

/// Flush policy of an [`Aggregator`](crate::Aggregator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Time budget from the first item of a forming batch until it is flushed.
    ///
    /// [`NEVER_FLUSH_TIMEOUT`] (`None`) never flushes by time.
    pub max_wait: Option<Duration>,
    /// Number of items that forces a flush.
    ///
    /// `0` never flushes by size, `1` flushes every item on its own.
    pub max_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_wait: Some(Duration::from_millis(10)), max_size: 100 }
    }
}

impl BatchConfig {
    pub fn new(max_wait: Option<Duration>, max_size: usize) -> Self {
        Self { max_wait, max_size }
    }

    pub fn flushes_by_time(&self) -> bool {
        self.max_wait.is_some()
    }

    pub fn flushes_by_size(&self) -> bool {
        self.max_size > 0
    }

    /// Whether every item is flushed as a batch of one.
    pub fn is_unbatched(&self) -> bool {
        self.max_size == 1
    }

    /// A batch is full once it holds `max_size` items. Never true when size flushing is disabled.
    pub(crate) fn is_full(&self, len: usize) -> bool {
        self.flushes_by_size() && len >= self.max_size
    }
}
