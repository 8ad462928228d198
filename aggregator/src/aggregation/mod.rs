mod engine;
mod fedavg;

pub use engine::{AggregatedRound, AggregationEngine, AggregationState, GlobalModel, Submission};
pub use fedavg::weighted_average;
