//! # Consumer Batch Detection
//!
//! Consumers typically receive messages in bursts: a fetch returns several
//! messages which are then consumed back to back. The segmenter recovers those
//! bursts from the stream of `CONSUME` timestamps using an adaptive gap rule:
//! a new batch starts whenever the gap to the previous event is more than
//! twice the previous gap.
//!
//! A batch's duration is measured from its first event to the first event of
//! the batch that closes it, i.e. it is the batch interval.
//!
//! ## Edge Cases
//!
//! - The first event always opens a batch and, having no previous gap to
//!   compare with, the second event never splits.
//! - A zero previous gap makes any non-zero gap split. `min_gap_cycles`
//!   raises the threshold floor for logs with coarse timestamps.
//! - The batch still open at end of stream is dropped unless
//!   [`TrailingBatch::Emit`] is requested; in that case its duration runs to
//!   its last event.

use serde::{Deserialize, Serialize};

/// A detected batch, in raw cycle units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub start_cycles: u64,
    pub size: u32,
    pub duration_cycles: u64,
}

/// What to do with the batch still open when the stream ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingBatch {
    /// Drop it, matching reports produced by earlier versions of the harness
    #[default]
    Drop,
    /// Emit it with the span up to its last event
    Emit,
}

#[derive(Debug, Clone, Copy)]
struct OpenBatch {
    start: u64,
    count: u32,
    last: u64,
}

/// Incremental batch segmenter over `CONSUME` timestamps.
#[derive(Debug, Clone, Default)]
pub struct BatchSegmenter {
    prev_timestamp: Option<u64>,
    prev_gap: Option<u64>,
    current: Option<OpenBatch>,
    min_gap_cycles: u64,
}

impl BatchSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never split on gaps of `min_gap_cycles` or fewer.
    pub fn with_min_gap(min_gap_cycles: u64) -> Self {
        Self {
            min_gap_cycles,
            ..Self::default()
        }
    }

    /// Feed the next event; returns the batch it closed, if any.
    pub fn push(&mut self, timestamp: u64) -> Option<Batch> {
        let prev = match self.prev_timestamp {
            Some(prev) => prev,
            None => {
                self.prev_timestamp = Some(timestamp);
                self.current = Some(OpenBatch {
                    start: timestamp,
                    count: 1,
                    last: timestamp,
                });
                return None;
            }
        };

        let gap = timestamp.saturating_sub(prev);
        let starts_batch = match self.prev_gap {
            Some(prev_gap) => gap > prev_gap.saturating_mul(2).max(self.min_gap_cycles),
            None => false,
        };

        let mut closed = None;
        if starts_batch || self.current.is_none() {
            closed = self.current.take().map(|open| Batch {
                start_cycles: open.start,
                size: open.count,
                duration_cycles: timestamp.saturating_sub(open.start),
            });
            self.current = Some(OpenBatch {
                start: timestamp,
                count: 0,
                last: timestamp,
            });
        }
        if let Some(batch) = self.current.as_mut() {
            batch.count += 1;
            batch.last = timestamp;
        }

        self.prev_gap = Some(gap);
        self.prev_timestamp = Some(timestamp);
        closed
    }

    /// End the stream, applying `policy` to the open batch.
    pub fn finish(self, policy: TrailingBatch) -> Option<Batch> {
        match policy {
            TrailingBatch::Drop => None,
            TrailingBatch::Emit => self.current.map(|open| Batch {
                start_cycles: open.start,
                size: open.count,
                duration_cycles: open.last.saturating_sub(open.start),
            }),
        }
    }

    /// Segment a whole timestamp sequence.
    pub fn segment<I>(&mut self, timestamps: I) -> Vec<Batch>
    where
        I: IntoIterator<Item = u64>,
    {
        timestamps
            .into_iter()
            .filter_map(|timestamp| self.push(timestamp))
            .collect()
    }
}
