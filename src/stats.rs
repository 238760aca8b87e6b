use std::sync::atomic::{AtomicU64, Ordering};

/// Processed/error counters shared across a pipeline stage.
///
/// Constructed once per process and passed into each component as an
/// explicit handle; nothing here is process-global.
#[derive(Debug, Default)]
pub struct PipelineStats {
    processed: AtomicU64,
    errors: AtomicU64,
}

impl PipelineStats {
    /// Returns the new running total.
    pub fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new running total.
    pub fn record_error(&self) -> u64 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}
