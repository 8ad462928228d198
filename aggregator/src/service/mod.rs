mod builder;
mod coordinator;

pub use builder::CoordinatorBuilder;
pub use coordinator::{Coordinator, UpdateOutcome};
