use std::{collections::BTreeMap, num::NonZeroU64, sync::Arc};

use comms::ModelState;

use super::{Contribution, WorkerId, WorkerRecord};
use crate::{
    clock::Timestamp,
    error::{CoordinatorErr, Result},
};

/// Tracks every known worker and the latest update it submitted.
///
/// A worker is registered as long as it's present in the registry, even if it hasn't submitted
/// anything yet.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, Option<WorkerRecord>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new worker without any update.
    ///
    /// # Arguments
    /// * `worker_id` - The id of the new worker.
    ///
    /// # Returns
    /// An `AlreadyRegistered` error if the worker is already known, re-registering
    /// must go through `unregister` first.
    pub fn register(&mut self, worker_id: WorkerId) -> Result<()> {
        if self.workers.contains_key(&worker_id) {
            return Err(CoordinatorErr::AlreadyRegistered(worker_id));
        }

        self.workers.insert(worker_id, None);
        Ok(())
    }

    /// Removes a worker and its latest update.
    ///
    /// # Arguments
    /// * `worker_id` - The id of the worker to remove.
    ///
    /// # Returns
    /// A `NotRegistered` error if the worker is unknown.
    pub fn unregister(&mut self, worker_id: &WorkerId) -> Result<()> {
        match self.workers.remove(worker_id) {
            Some(_) => Ok(()),
            None => Err(CoordinatorErr::NotRegistered(worker_id.clone())),
        }
    }

    /// Replaces the latest update of a worker.
    ///
    /// # Arguments
    /// * `worker_id` - The id of the submitting worker.
    /// * `timestamp` - When the update was received.
    /// * `sample_count` - The amount of samples the update was trained on.
    /// * `state` - The submitted model.
    /// * `round_start` - When the current round started.
    ///
    /// # Returns
    /// Whether this is the worker's first update since `round_start`, or a `NotRegistered`
    /// error if the worker is unknown.
    pub fn record_update(
        &mut self,
        worker_id: &WorkerId,
        timestamp: Timestamp,
        sample_count: NonZeroU64,
        state: Arc<ModelState>,
        round_start: Timestamp,
    ) -> Result<bool> {
        let Some(slot) = self.workers.get_mut(worker_id) else {
            return Err(CoordinatorErr::NotRegistered(worker_id.clone()));
        };

        let fresh = match slot {
            Some(prev) => prev.timestamp <= round_start,
            None => true,
        };

        *slot = Some(WorkerRecord {
            timestamp,
            sample_count,
            state,
        });

        Ok(fresh)
    }

    /// Collects the latest update of every worker that submitted strictly after `round_start`.
    ///
    /// # Arguments
    /// * `round_start` - When the current round started.
    ///
    /// # Returns
    /// The contributions, ordered by worker id.
    pub fn contributors(&self, round_start: Timestamp) -> Vec<Contribution> {
        self.workers
            .iter()
            .filter_map(|(worker_id, record)| {
                let record = record.as_ref()?;
                (record.timestamp > round_start).then(|| Contribution {
                    worker_id: worker_id.clone(),
                    sample_count: record.sample_count,
                    state: Arc::clone(&record.state),
                })
            })
            .collect()
    }

    pub fn is_registered(&self, worker_id: &WorkerId) -> bool {
        self.workers.contains_key(worker_id)
    }

    pub fn record(&self, worker_id: &WorkerId) -> Option<&WorkerRecord> {
        self.workers.get(worker_id)?.as_ref()
    }

    pub fn worker_ids(&self) -> impl Iterator<Item = &WorkerId> {
        self.workers.keys()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
