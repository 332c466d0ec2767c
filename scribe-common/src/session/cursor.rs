//! Session cursor state machine
//!
//! Pure transitions shared by every backend. A backend loads the cursor,
//! applies one transition and persists the result.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::ops::Range;

use super::{LogEntry, SessionParams, SessionStatus};
use crate::{Error, Result};

/// `(epoch, batch_id)`; serialized as a two-element array
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchKey(pub u64, pub usize);

/// Fast-changing part of a training session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCursor {
    pub current_epoch: u64,
    pub next_index: usize,
    pub batches_served: BTreeSet<BatchKey>,
    pub batches_done: BTreeSet<BatchKey>,
    pub logs: VecDeque<LogEntry>,
}

/// Position of one served batch within the dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSlot {
    pub batch_id: usize,
    pub epoch: u64,
    pub range: Range<usize>,
}

impl SessionCursor {
    /// Serve the next batch of at most `batch_size` items
    ///
    /// The batch id is the starting offset. When the previous call consumed
    /// the last item, the epoch increments and the offset restarts at 0.
    pub fn advance(&mut self, num_samples: usize, batch_size: usize) -> Result<BatchSlot> {
        if num_samples == 0 {
            return Err(Error::EmptyDataset);
        }
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch size must be positive".to_string()));
        }

        if self.next_index >= num_samples {
            self.current_epoch += 1;
            self.next_index = 0;
        }

        let start = self.next_index;
        let end = (start + batch_size).min(num_samples);

        self.batches_served.insert(BatchKey(self.current_epoch, start));
        self.next_index = end;

        Ok(BatchSlot {
            batch_id: start,
            epoch: self.current_epoch,
            range: start..end,
        })
    }

    /// Mark a served batch as done; marking twice is harmless
    pub fn mark_done(&mut self, epoch: u64, batch_id: usize) -> Result<()> {
        let key = BatchKey(epoch, batch_id);
        if !self.batches_served.contains(&key) {
            return Err(Error::UnknownBatch { epoch, batch_id });
        }
        self.batches_done.insert(key);
        Ok(())
    }

    /// Append a log entry, keeping at most `capacity` of the newest entries
    pub fn push_log(&mut self, entry: LogEntry, capacity: usize) {
        self.logs.push_back(entry);
        while self.logs.len() > capacity {
            self.logs.pop_front();
        }
    }

    pub fn status(
        &self,
        session_id: &str,
        params: &SessionParams,
        num_samples: usize,
        log_tail: usize,
    ) -> SessionStatus {
        let skip = self.logs.len().saturating_sub(log_tail);
        SessionStatus {
            session_id: session_id.to_string(),
            language: params.language.clone(),
            batch_size: params.batch_size,
            order: params.order,
            min_duration: params.min_duration,
            max_duration: params.max_duration,
            current_epoch: self.current_epoch,
            next_index: self.next_index,
            num_samples,
            num_batches_served: self.batches_served.len(),
            num_batches_done: self.batches_done.len(),
            logs: self.logs.iter().skip(skip).cloned().collect(),
        }
    }
}
