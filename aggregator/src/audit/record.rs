use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    clock::Timestamp,
    registry::WorkerId,
    training::{EvalErr, Evaluation},
};

/// The result of evaluating one of the audited models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoniOutcome {
    Evaluated { loss: f64, accuracy: f64 },
    Failed { reason: String },
}

impl RoniOutcome {
    pub fn accuracy(&self) -> Option<f64> {
        match self {
            RoniOutcome::Evaluated { accuracy, .. } => Some(*accuracy),
            RoniOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RoniOutcome::Failed { .. })
    }
}

impl From<Result<Evaluation, EvalErr>> for RoniOutcome {
    fn from(value: Result<Evaluation, EvalErr>) -> Self {
        match value {
            Ok(Evaluation { loss, accuracy }) => Self::Evaluated { loss, accuracy },
            Err(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoniEntry {
    pub outcome: RoniOutcome,
    pub evaluated_at: Timestamp,
}

/// The "Record Of Negative Impact" of an aggregation round.
///
/// Holds the evaluation of every leave-one-out model, keyed by the excluded worker, next to the
/// evaluation of the model built from every contribution. Records are written once and never
/// modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoniRecord {
    pub model_version: u64,
    pub evaluated_at: Timestamp,
    pub excluded: BTreeMap<WorkerId, RoniEntry>,
    pub global: RoniEntry,
}

impl RoniRecord {
    /// Finds the workers whose exclusion makes the model more accurate.
    ///
    /// # Arguments
    /// * `margin` - How much the accuracy has to improve for a worker to be reported.
    ///
    /// # Returns
    /// Every such worker along with the accuracy gained by leaving it out, empty if the full
    /// model couldn't be evaluated.
    pub fn negative_impact(&self, margin: f64) -> Vec<(&WorkerId, f64)> {
        let Some(global) = self.global.outcome.accuracy() else {
            return Vec::new();
        };

        self.excluded
            .iter()
            .filter_map(|(worker_id, entry)| {
                let gain = entry.outcome.accuracy()? - global;
                (gain > margin).then_some((worker_id, gain))
            })
            .collect()
    }

    /// Returns how many of the evaluations in this record failed.
    pub fn failures(&self) -> usize {
        self.excluded
            .values()
            .chain([&self.global])
            .filter(|entry| entry.outcome.is_failure())
            .count()
    }
}
