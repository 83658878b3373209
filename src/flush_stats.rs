use crate::task_list::FlushReason;

#[derive(Debug, Default)]
pub struct FlushStats {
    /// Human readable name used to identify these stats when they are reported.
    tag: &'static str,
    /// Number of tasks received on the intake channel.
    tasks_received: u32,
    /// Number of batches handed to the worker pool.
    batches: u32,
    /// Batches cut because they reached the maximum size.
    cut_by_size: u32,
    /// Batches cut because their deadline elapsed.
    cut_by_timeout: u32,
    /// Batches cut because the intake channel closed.
    cut_by_close: u32,
    /// The average number of tasks per batch.
    average_batch_size: f32,
    max_batch_size: u32,
    min_batch_size: u32,
}

impl FlushStats {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, min_batch_size: u32::MAX, ..Default::default() }
    }

    pub fn record_task(&mut self) {
        self.tasks_received += 1;
    }

    /// Batch sizes beyond `u32::MAX` are recorded as `u32::MAX`.
    pub fn record_flush(&mut self, reason: FlushReason, batch_size: usize) {
        let batch_size = u32::try_from(batch_size).unwrap_or(u32::MAX);
        match reason {
            FlushReason::MaxSize => self.cut_by_size += 1,
            FlushReason::Timeout => self.cut_by_timeout += 1,
            FlushReason::Closed => self.cut_by_close += 1,
        }
        let batches = self.batches + 1;
        self.average_batch_size = (((self.average_batch_size as f64 * self.batches as f64)
            + batch_size as f64)
            / batches as f64) as f32;
        self.batches = batches;
        self.max_batch_size = self.max_batch_size.max(batch_size);
        self.min_batch_size = self.min_batch_size.min(batch_size);
    }
}

impl Drop for FlushStats {
    fn drop(&mut self) {
        tracing::debug!(flush_stats = ?self);
    }
}
