use std::num::NonZeroU64;

use crate::state::ModelState;

/// A locally trained model submitted by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// The amount of training samples the worker used, the weight of this update.
    pub sample_count: NonZeroU64,
    pub state: ModelState,
}

impl Update {
    /// Creates a new `Update`.
    ///
    /// # Arguments
    /// * `sample_count` - The amount of samples this update was trained on.
    /// * `state` - The resulting model parameters.
    pub fn new(sample_count: NonZeroU64, state: ModelState) -> Self {
        Self {
            sample_count,
            state,
        }
    }
}
