//! Bounded buffer for metric samples the master has not accepted yet
//!
//! Samples are kept in arrival order. When the buffer is full the oldest
//! sample is evicted, so the buffer always holds the most recent history.

use crate::models::ServerMetrics;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// Default maximum number of buffered samples
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Drop-oldest FIFO of unsent samples
#[derive(Debug)]
pub struct ReportBuffer {
    samples: VecDeque<ServerMetrics>,
    capacity: usize,
    /// Samples evicted since the buffer was created
    dropped: u64,
}

impl ReportBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1_000)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a sample, returning the sample evicted to make room, if any
    pub fn add(&mut self, sample: ServerMetrics) -> Option<ServerMetrics> {
        if self.capacity == 0 {
            self.dropped += 1;
            return Some(sample);
        }

        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.dropped += 1;
            let evicted = self.samples.pop_front();
            if let Some(ref s) = evicted {
                debug!(timestamp = %s.timestamp, "Buffer full, evicted oldest sample");
            }
            evicted
        } else {
            None
        }
    }

    /// Append samples in order, returning how many were evicted
    pub fn add_all(&mut self, samples: impl IntoIterator<Item = ServerMetrics>) -> usize {
        samples
            .into_iter()
            .filter_map(|s| self.add(s))
            .count()
    }

    /// Take every buffered sample, oldest first, leaving the buffer empty
    pub fn flush(&mut self) -> Vec<ServerMetrics> {
        self.samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            entries: self.samples.len(),
            capacity: self.capacity,
            dropped: self.dropped,
            oldest_timestamp: self.samples.front().map(|s| s.timestamp),
            newest_timestamp: self.samples.back().map(|s| s.timestamp),
        }
    }
}

impl Default for ReportBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

#[derive(Debug, Clone)]
pub struct BufferStats {
    pub entries: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
}
