//! Allocation engine
//!
//! Single-item allocation samples a group first and an item within it second,
//! so every author with open work is equally likely to be picked regardless of
//! how many episodes it has. Batch allocation skips the fairness correction
//! and returns similarly sized jobs, shortest first.
//!
//! Allocation does not claim; the worker registers the item afterwards and a
//! lost race surfaces there as a conflict.

use tracing::{debug, warn};

use crate::db::{WorkItem, WorkItemStore};
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct AllocationEngine {
    store: WorkItemStore,
    group_retry_attempts: u32,
}

impl AllocationEngine {
    pub fn new(store: WorkItemStore, group_retry_attempts: u32) -> Self {
        Self {
            store,
            group_retry_attempts,
        }
    }

    /// One unclaimed item in `language`, group-uniform
    ///
    /// When the sampled group drains between the two stages, the group is
    /// re-sampled up to `group_retry_attempts` more times.
    pub async fn get_work(&self, language: &str) -> Result<WorkItem> {
        let mut attempt = 0;
        loop {
            let group = self.store.find_candidate_group_key(language).await?;
            match self.store.find_candidate_item(language, &group).await {
                Ok(item) => {
                    debug!(id = item.id, group = %group, attempt, "Allocated work item");
                    return Ok(item);
                }
                Err(Error::NoWorkAvailable(reason)) if attempt < self.group_retry_attempts => {
                    attempt += 1;
                    warn!(group = %group, attempt, "Sampled group drained, re-sampling: {}", reason);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Up to `n` unclaimed items of at least `min_duration` seconds
    pub async fn get_work_batch(
        &self,
        language: &str,
        n: usize,
        min_duration: f64,
    ) -> Result<Vec<WorkItem>> {
        if n == 0 {
            return Err(Error::InvalidInput("n must be positive".to_string()));
        }
        if !min_duration.is_finite() || min_duration < 0.0 {
            return Err(Error::InvalidInput(
                "min_duration must be a non-negative number".to_string(),
            ));
        }

        let items = self.store.sample_batch(language, n, min_duration).await?;
        if items.is_empty() {
            return Err(Error::NoWorkAvailable(format!(
                "no episodes of at least {}s left without transcription for language '{}'",
                min_duration, language
            )));
        }
        debug!(language, requested = n, returned = items.len(), "Allocated work batch");
        Ok(items)
    }
}
