use std::{collections::BTreeMap, io, sync::Arc, time::Duration};

use comms::ModelState;
use log::{debug, info, warn};
use tokio::{sync::Mutex, task, time};

use super::{AuditErr, AuditStore, Result, RoniEntry, RoniOutcome, RoniRecord};
use crate::{
    aggregation::{AggregatedRound, weighted_average},
    clock::MonotonicClock,
    training::{EvalErr, Evaluation, Evaluator},
};

/// Accuracy a worker's exclusion has to gain before it's reported.
const NEGATIVE_IMPACT_MARGIN: f64 = 0.01;

/// An evaluator shared between the auditor and the blocking tasks running it.
type SharedEvaluator = Arc<Mutex<Box<dyn Evaluator>>>;

/// Runs the "Record Of Negative Impact" audit over completed rounds.
///
/// For every contributor it evaluates the model averaged without it, then the model averaged
/// from everyone, and appends the results to an `AuditStore`. The audit is advisory, a failed
/// evaluation is recorded in its own entry and the rest of the audit carries on.
pub struct RobustnessAuditor {
    evaluator: SharedEvaluator,
    store: Arc<dyn AuditStore>,
    eval_timeout: Option<Duration>,
}

impl RobustnessAuditor {
    /// Creates a new `RobustnessAuditor`.
    ///
    /// # Arguments
    /// * `evaluator` - The harness evaluating every audited model.
    /// * `store` - Where the records are appended.
    /// * `eval_timeout` - The limit for a single evaluation, none waits forever.
    pub fn new(
        evaluator: Box<dyn Evaluator>,
        store: Arc<dyn AuditStore>,
        eval_timeout: Option<Duration>,
    ) -> Self {
        Self {
            evaluator: Arc::new(Mutex::new(evaluator)),
            store,
            eval_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Audits a completed round and persists its record.
    ///
    /// Works only with the contributions captured in `round`, newer submissions never leak into
    /// the audit.
    ///
    /// # Arguments
    /// * `round` - The round to audit.
    /// * `clock` - The source of the evaluation timestamps.
    ///
    /// # Returns
    /// The persisted record, `InsufficientContributors` if the round had less than two
    /// contributors or the store's error if the record couldn't be appended.
    pub async fn audit(&self, round: &AggregatedRound, clock: &MonotonicClock) -> Result<RoniRecord> {
        let got = round.contributors.len();
        if got < 2 {
            return Err(AuditErr::InsufficientContributors { got });
        }

        let evaluated_at = clock.now();
        info!(version = round.version, contributors = got; "starting the robustness audit");

        let mut excluded = BTreeMap::new();
        for (i, excluded_worker) in round.contributors.iter().enumerate() {
            let others: Vec<_> = round
                .contributors
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, c)| c.clone())
                .collect();

            let res = self
                .evaluate(move || {
                    weighted_average(&others)
                        .map(Arc::new)
                        .map_err(|e| EvalErr::Failed(e.to_string()))
                })
                .await;

            if let Err(e) = &res {
                warn!(
                    worker_id = excluded_worker.worker_id.short();
                    "leave-one-out evaluation failed: {e}"
                );
            }

            let entry = RoniEntry {
                outcome: RoniOutcome::from(res),
                evaluated_at: clock.now(),
            };
            excluded.insert(excluded_worker.worker_id.clone(), entry);
        }

        let model = Arc::clone(&round.model);
        let res = self.evaluate(move || Ok(model)).await;
        if let Err(e) = &res {
            warn!(version = round.version; "global model evaluation failed: {e}");
        }

        let record = RoniRecord {
            model_version: round.version,
            evaluated_at,
            excluded,
            global: RoniEntry {
                outcome: RoniOutcome::from(res),
                evaluated_at: clock.now(),
            },
        };

        self.persist(&record).await?;
        debug!(version = round.version, failures = record.failures(); "robustness record persisted");

        for (worker_id, gain) in record.negative_impact(NEGATIVE_IMPACT_MARGIN) {
            warn!(
                worker_id = worker_id.short(),
                version = round.version,
                accuracy_gain = gain;
                "excluding this worker improves the global model"
            );
        }

        Ok(record)
    }

    /// Appends a record to the store on the blocking pool.
    async fn persist(&self, record: &RoniRecord) -> Result<()> {
        let store = Arc::clone(&self.store);
        let record = record.clone();

        task::spawn_blocking(move || store.append(record.model_version, &record))
            .await
            .map_err(|e| AuditErr::Io(io::Error::other(e.to_string())))?
    }

    /// Builds a model and evaluates it on the blocking pool.
    ///
    /// The time limit only starts once the evaluator is free, a previous evaluation that timed
    /// out but is still running delays this one without eating into its budget.
    ///
    /// # Arguments
    /// * `build` - Produces the model to evaluate, it runs on the blocking task as well.
    ///
    /// # Returns
    /// The evaluation, or the reason it couldn't be obtained.
    async fn evaluate<F>(&self, build: F) -> std::result::Result<Evaluation, EvalErr>
    where
        F: FnOnce() -> std::result::Result<Arc<ModelState>, EvalErr> + Send + 'static,
    {
        let mut evaluator = Arc::clone(&self.evaluator).lock_owned().await;
        let handle = task::spawn_blocking(move || {
            let state = build()?;
            evaluator.load_state(&state)?;
            evaluator.test()
        });

        let joined = match self.eval_timeout {
            Some(limit) => time::timeout(limit, handle)
                .await
                .map_err(|_| EvalErr::TimedOut(limit))?,
            None => handle.await,
        };

        joined.map_err(|e| EvalErr::Aborted(e.to_string()))?
    }
}
