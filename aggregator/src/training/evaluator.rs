use comms::ModelState;
use serde::{Deserialize, Serialize};

use super::EvalErr;

/// The performance of a model over a test set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// Loads model states and measures them against a fixed test set.
///
/// The coordinator never trains nor knows the model architecture, it only hands states to an
/// `Evaluator` and reads back the results.
pub trait Evaluator: Send {
    /// Should replace the evaluated model's parameters with `state`.
    ///
    /// # Arguments
    /// * `state` - The parameters to load.
    fn load_state(&mut self, state: &ModelState) -> Result<(), EvalErr>;

    /// Should evaluate the currently loaded model.
    ///
    /// # Returns
    /// The loss and accuracy of the model.
    fn test(&mut self) -> Result<Evaluation, EvalErr>;
}

/// The authoritative owner of the model, it provides the initial global model and mirrors
/// every new one.
pub trait ModelTrainer: Evaluator {
    /// Should return the current parameters of the model.
    fn model(&self) -> ModelState;
}
