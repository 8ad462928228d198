use std::sync::Arc;

use comms::{Codec, Update};
use log::{info, warn};
use parking_lot::Mutex;
use tokio::task;

use crate::{
    aggregation::{AggregatedRound, AggregationEngine, GlobalModel, Submission},
    audit::{RobustnessAuditor, RoniRecord},
    clock::MonotonicClock,
    error::{CoordinatorErr, Result},
    registry::WorkerId,
    training::{Evaluator, ModelTrainer},
};

/// The reply sent to workers submitting before registering.
const REGISTER_FIRST: &str = "Please register before sending an update.";

/// The trainer mirroring the global model, shared with the blocking tasks testing it.
pub(super) type SharedTrainer = Arc<Mutex<Box<dyn ModelTrainer>>>;

/// What happened to an accepted update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The update was recorded, the round needs more workers.
    Pending {
        unique_updates: usize,
        update_threshold: usize,
    },
    /// The update completed a round and the global model was replaced.
    Aggregated {
        version: u64,
        contributors: Vec<WorkerId>,
        /// The robustness record of the round, if it was audited.
        roni: Option<RoniRecord>,
    },
}

/// The federated averaging coordinator.
///
/// Exposes the callbacks the transport layer invokes on behalf of already authenticated
/// workers. Submissions go through a single pipeline, so counting, aggregating, refreshing
/// the trainer and auditing never interleave between two updates. Registrations and global
/// model reads only take the engine lock and never wait for an audit.
pub struct Coordinator {
    engine: Mutex<AggregationEngine>,
    pipeline: tokio::sync::Mutex<()>,
    clock: MonotonicClock,
    codec: Box<dyn Codec>,
    trainer: SharedTrainer,
    auditor: Option<RobustnessAuditor>,
}

impl Coordinator {
    pub(super) fn new(
        engine: AggregationEngine,
        codec: Box<dyn Codec>,
        trainer: SharedTrainer,
        auditor: Option<RobustnessAuditor>,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            pipeline: tokio::sync::Mutex::new(()),
            clock: MonotonicClock::new(),
            codec,
            trainer,
            auditor,
        }
    }

    /// Registers a worker.
    ///
    /// # Returns
    /// `AlreadyRegistered` if the worker is known.
    pub fn on_register(&self, worker_id: impl Into<WorkerId>) -> Result<()> {
        let worker_id = worker_id.into();
        self.engine.lock().registry_mut().register(worker_id.clone())?;

        info!(worker_id = worker_id.short(); "registered worker");
        Ok(())
    }

    /// Unregisters a worker, dropping its latest update.
    ///
    /// # Returns
    /// `NotRegistered` if the worker is unknown.
    pub fn on_unregister(&self, worker_id: impl Into<WorkerId>) -> Result<()> {
        let worker_id = worker_id.into();
        self.engine.lock().registry_mut().unregister(&worker_id)?;

        info!(worker_id = worker_id.short(); "unregistered worker");
        Ok(())
    }

    /// Serializes the current global model.
    ///
    /// # Returns
    /// The encoded model and its version.
    pub fn on_return_global_model(&self) -> Result<(Vec<u8>, u64)> {
        let GlobalModel { state, version } = self.global_model();
        let bytes = self.codec.encode_state(&state)?;
        Ok((bytes, version))
    }

    /// Checks whether a worker holds the latest global model.
    ///
    /// # Arguments
    /// * `version` - The version the worker holds, as reported by it.
    pub fn on_is_global_model_current(&self, version: i64) -> bool {
        u64::try_from(version).is_ok_and(|version| version == self.model_version())
    }

    /// Accepts a serialized update from a worker.
    ///
    /// Unregistered workers get a rejection message and a failed aggregation is only logged,
    /// the update stays recorded for the retry.
    ///
    /// # Arguments
    /// * `worker_id` - The id of the submitting worker.
    /// * `payload` - The encoded `Update`.
    ///
    /// # Returns
    /// The message for the worker, or a `Serialization` error if the payload can't be decoded.
    pub async fn on_receive_update(
        &self,
        worker_id: impl Into<WorkerId>,
        payload: &[u8],
    ) -> Result<String> {
        let worker_id = worker_id.into();
        let update = self.codec.decode_update(payload)?;

        match self.submit_update(&worker_id, update).await {
            Ok(_) => {}
            Err(CoordinatorErr::NotRegistered(_)) => {
                warn!(worker_id = worker_id.short(); "unregistered worker tried to send an update");
                return Ok(REGISTER_FIRST.to_string());
            }
            Err(e) => warn!(worker_id = worker_id.short(); "aggregation aborted: {e}"),
        }

        Ok(format!("Update received for worker {}", worker_id.short()))
    }

    /// Records an update and runs the aggregation pipeline if it completes a round.
    ///
    /// # Arguments
    /// * `worker_id` - The id of the submitting worker.
    /// * `update` - The decoded update.
    ///
    /// # Returns
    /// What happened to the update, or the error that stopped the aggregation.
    pub async fn submit_update(&self, worker_id: &WorkerId, update: Update) -> Result<UpdateOutcome> {
        let _pipeline = self.pipeline.lock().await;

        let timestamp = self.clock.now();
        let submission =
            self.engine
                .lock()
                .submit(worker_id, timestamp, update.sample_count, Arc::new(update.state))?;

        info!(worker_id = worker_id.short(); "model update accepted");

        let round = match submission {
            Submission::Pending {
                unique_updates,
                update_threshold,
            } => {
                return Ok(UpdateOutcome::Pending {
                    unique_updates,
                    update_threshold,
                });
            }
            Submission::Aggregated(round) => round,
        };

        info!(
            version = round.version,
            iteration = round.iteration,
            contributors = round.contributors.len();
            "global model updated"
        );

        self.refresh_trainer(&round).await;
        let roni = self.audit(&round).await;

        Ok(UpdateOutcome::Aggregated {
            version: round.version,
            contributors: round.contributor_ids(),
            roni,
        })
    }

    /// Loads the new global model into the trainer and logs its performance.
    async fn refresh_trainer(&self, round: &AggregatedRound) {
        let trainer = Arc::clone(&self.trainer);
        let model = Arc::clone(&round.model);

        let res = task::spawn_blocking(move || {
            let mut trainer = trainer.lock();
            trainer.load_state(&model)?;
            trainer.test()
        })
        .await;

        match res {
            Ok(Ok(eval)) => info!(
                version = round.version,
                loss = eval.loss,
                accuracy = eval.accuracy;
                "global model tested"
            ),
            Ok(Err(e)) => warn!(version = round.version; "couldn't test the global model: {e}"),
            Err(e) => warn!(version = round.version; "global model test aborted: {e}"),
        }
    }

    async fn audit(&self, round: &AggregatedRound) -> Option<RoniRecord> {
        let auditor = self.auditor.as_ref()?;

        match auditor.audit(round, &self.clock).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(version = round.version; "robustness audit skipped: {e}");
                None
            }
        }
    }

    pub fn model_version(&self) -> u64 {
        self.engine.lock().state().model_version
    }

    pub fn iteration(&self) -> u64 {
        self.engine.lock().state().iteration
    }

    /// Returns how many unique updates the current round has.
    pub fn pending_updates(&self) -> usize {
        self.engine.lock().state().unique_updates
    }

    pub fn registered_workers(&self) -> Vec<WorkerId> {
        self.engine.lock().registry().worker_ids().cloned().collect()
    }

    /// Returns a snapshot of the global model.
    pub fn global_model(&self) -> GlobalModel {
        self.engine.lock().global().clone()
    }

    pub fn auditor(&self) -> Option<&RobustnessAuditor> {
        self.auditor.as_ref()
    }
}
