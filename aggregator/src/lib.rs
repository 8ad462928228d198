//! The federated averaging coordinator.
//!
//! Workers register, submit locally trained models and fetch the global model through the
//! callbacks of a [`Coordinator`]. Once enough workers submitted during a round their models
//! are averaged, weighted by the amount of samples each one trained on, and optionally audited
//! with a leave-one-out robustness pass.

pub mod aggregation;
pub mod audit;
pub mod clock;
pub mod error;
pub mod registry;
pub mod service;
pub mod training;

pub use error::{CoordinatorErr, Result};
pub use registry::WorkerId;
pub use service::{Coordinator, CoordinatorBuilder, UpdateOutcome};
