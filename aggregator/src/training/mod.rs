mod error;
mod evaluator;

pub use error::EvalErr;
pub use evaluator::{Evaluation, Evaluator, ModelTrainer};
