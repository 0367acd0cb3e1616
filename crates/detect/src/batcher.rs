use std::time::Duration;

use tokio::time::Instant;

use crate::features::FeatureVector;

/// Accumulates feature vectors into micro-batches.
///
/// A batch is ready when it reaches `capacity` or when `timeout` has
/// elapsed since the first vector entered the buffer, whichever comes
/// first. The caller drives time by polling [`ScoreBatcher::deadline`].
pub struct ScoreBatcher {
    capacity: usize,
    timeout: Duration,
    buffer: Vec<FeatureVector>,
    first_at: Option<Instant>,
}

impl ScoreBatcher {
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            timeout,
            buffer: Vec::new(),
            first_at: None,
        }
    }

    /// Add a vector; returns a full batch when capacity is reached.
    pub fn push(&mut self, vector: FeatureVector) -> Option<Vec<FeatureVector>> {
        if self.buffer.is_empty() {
            self.first_at = Some(Instant::now());
        }
        self.buffer.push(vector);
        if self.buffer.len() >= self.capacity {
            self.take()
        } else {
            None
        }
    }

    /// When the currently-buffered batch must be dispatched, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.first_at.map(|t| t + self.timeout)
    }

    /// Dispatch whatever is buffered once the deadline has passed.
    pub fn take_if_due(&mut self, now: Instant) -> Option<Vec<FeatureVector>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.take(),
            _ => None,
        }
    }

    /// Drain the buffer unconditionally (shutdown / end of stream).
    pub fn take(&mut self) -> Option<Vec<FeatureVector>> {
        if self.buffer.is_empty() {
            return None;
        }
        self.first_at = None;
        Some(std::mem::take(&mut self.buffer))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
