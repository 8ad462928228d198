mod registry;
mod worker;

pub use registry::WorkerRegistry;
pub use worker::{Contribution, WorkerId, WorkerRecord};
