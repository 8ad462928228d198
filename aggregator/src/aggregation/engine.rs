use std::{
    num::{NonZeroU64, NonZeroUsize},
    sync::Arc,
};

use comms::ModelState;
use log::{debug, info};

use super::weighted_average;
use crate::{
    clock::Timestamp,
    error::{CoordinatorErr, Result},
    registry::{Contribution, WorkerId, WorkerRegistry},
};

/// The counters driving the aggregation rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationState {
    /// When the current round started, only updates strictly after it contribute.
    pub last_global_update: Timestamp,
    /// The amount of workers that submitted at least once during the current round.
    pub unique_updates: usize,
    pub update_threshold: NonZeroUsize,
    pub iteration: u64,
    pub model_version: u64,
}

/// The canonical model and its version.
#[derive(Debug, Clone)]
pub struct GlobalModel {
    pub state: Arc<ModelState>,
    pub version: u64,
}

/// A completed aggregation round.
#[derive(Debug, Clone)]
pub struct AggregatedRound {
    pub version: u64,
    pub iteration: u64,
    pub round_start: Timestamp,
    pub finished_at: Timestamp,
    pub model: Arc<ModelState>,
    /// The updates that were averaged, as they were when the round closed.
    pub contributors: Vec<Contribution>,
}

impl AggregatedRound {
    pub fn contributor_ids(&self) -> Vec<WorkerId> {
        self.contributors.iter().map(|c| c.worker_id.clone()).collect()
    }
}

/// The result of accepting an update.
#[derive(Debug, Clone)]
pub enum Submission {
    Pending {
        unique_updates: usize,
        update_threshold: usize,
    },
    Aggregated(AggregatedRound),
}

/// Counts fresh updates and replaces the global model once enough of them arrived.
///
/// The engine owns the worker registry, so a single lock around it makes the whole
/// "check freshness, count, maybe aggregate" sequence atomic.
#[derive(Debug)]
pub struct AggregationEngine {
    registry: WorkerRegistry,
    state: AggregationState,
    global: GlobalModel,
}

impl AggregationEngine {
    /// Creates a new `AggregationEngine`.
    ///
    /// # Arguments
    /// * `update_threshold` - The amount of unique updates that triggers an aggregation.
    /// * `initial` - The global model at version 0, it fixes the expected architecture.
    pub fn new(update_threshold: NonZeroUsize, initial: ModelState) -> Self {
        Self {
            registry: WorkerRegistry::new(),
            state: AggregationState {
                last_global_update: Timestamp::EPOCH,
                unique_updates: 0,
                update_threshold,
                iteration: 0,
                model_version: 0,
            },
            global: GlobalModel {
                state: Arc::new(initial),
                version: 0,
            },
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut WorkerRegistry {
        &mut self.registry
    }

    pub fn state(&self) -> &AggregationState {
        &self.state
    }

    pub fn global(&self) -> &GlobalModel {
        &self.global
    }

    /// Records a worker's update and aggregates if the threshold has been reached.
    ///
    /// The threshold is checked on every submission, so a round that previously failed to
    /// aggregate is retried without waiting for the counter to grow.
    ///
    /// # Arguments
    /// * `worker_id` - The id of the submitting worker.
    /// * `timestamp` - When the update was received, it's also when the round closes if this
    ///                 submission triggers the aggregation.
    /// * `sample_count` - The amount of samples the update was trained on.
    /// * `state` - The submitted model.
    ///
    /// # Returns
    /// Whether the update is pending or completed a round. `NotRegistered` if the worker is
    /// unknown, or the aggregation error, in which case the update is still recorded.
    pub fn submit(
        &mut self,
        worker_id: &WorkerId,
        timestamp: Timestamp,
        sample_count: NonZeroU64,
        state: Arc<ModelState>,
    ) -> Result<Submission> {
        let fresh = self.registry.record_update(
            worker_id,
            timestamp,
            sample_count,
            state,
            self.state.last_global_update,
        )?;

        if fresh {
            self.state.unique_updates += 1;
        }

        debug!(
            worker_id = worker_id.short(),
            fresh = fresh,
            unique_updates = self.state.unique_updates;
            "update recorded"
        );

        let update_threshold = self.state.update_threshold.get();
        if self.state.unique_updates < update_threshold {
            return Ok(Submission::Pending {
                unique_updates: self.state.unique_updates,
                update_threshold,
            });
        }

        self.aggregate(timestamp).map(Submission::Aggregated)
    }

    /// Replaces the global model with the weighted average of this round's updates.
    ///
    /// On failure nothing is modified, the counters included.
    ///
    /// # Arguments
    /// * `now` - When the round closes, it becomes the start of the next one.
    ///
    /// # Returns
    /// The completed round, `NoContributors` if no update is newer than the round start or
    /// `IncompatibleModelShape` if any of them doesn't match the global model.
    pub fn aggregate(&mut self, now: Timestamp) -> Result<AggregatedRound> {
        let round_start = self.state.last_global_update;
        let contributors = self.registry.contributors(round_start);

        if contributors.is_empty() {
            return Err(CoordinatorErr::NoContributors);
        }

        for contribution in &contributors {
            self.global
                .state
                .check_compatible(&contribution.state)
                .map_err(|source| CoordinatorErr::IncompatibleModelShape {
                    worker_id: contribution.worker_id.clone(),
                    source,
                })?;
        }

        info!(contributors = contributors.len(); "updating the global model");
        let model = Arc::new(weighted_average(&contributors)?);

        self.state.last_global_update = now;
        self.state.unique_updates = 0;
        self.state.iteration += 1;
        self.state.model_version += 1;

        self.global = GlobalModel {
            state: Arc::clone(&model),
            version: self.state.model_version,
        };

        Ok(AggregatedRound {
            version: self.state.model_version,
            iteration: self.state.iteration,
            round_start,
            finished_at: now,
            model,
            contributors,
        })
    }
}
